//! Session file loading
//!
//! A session file describes the server and the tasks it runs:
//!
//! ```toml
//! name = "web"
//!
//! [server]
//! port = 4242
//!
//! [[task]]
//! name = "api"
//! command = ["cargo", "run"]
//!
//! [[task]]
//! name = "styles"
//! watch = "assets/"
//! recursive = true
//! on_change = ["npm", "run", "css"]
//! pty = true
//!
//! [[task]]
//! name = "deploy"
//! rsync = { source = "public/", dest = "web1:/srv/site", delete = true }
//! ```

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::process::{ProcessSpec, ProcessTask};
use crate::registry::TaskRegistry;
use crate::watch::{WatchSpec, WatchTask, DEFAULT_DELAY};

pub const DEFAULT_PORT: u16 = 4242;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_name")]
    pub name: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, rename = "task")]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TaskConfig {
    Rsync(RsyncConfig),
    Watch(WatchConfig),
    Process(ProcessConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    pub command: Vec<String>,
    pub name: Option<String>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub pty: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    pub watch: PathBuf,
    pub on_change: Vec<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub force_once: bool,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub pty: bool,
}

/// Keep `dest` in sync with `source`: a watch on the source that runs
/// rsync, once at start and again after every change.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsyncConfig {
    pub rsync: RsyncOptions,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsyncOptions {
    pub source: PathBuf,
    /// Local path or remote `host:path`.
    pub dest: String,
    #[serde(default = "enabled")]
    pub archive: bool,
    #[serde(default = "enabled")]
    pub compress: bool,
    /// Remove files from `dest` that are gone from `source`.
    #[serde(default)]
    pub delete: bool,
    #[serde(default = "enabled")]
    pub recursive: bool,
    /// Skip files that are newer on the receiver.
    #[serde(default)]
    pub update: bool,
    #[serde(default = "enabled")]
    pub verbose: bool,
}

impl RsyncOptions {
    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![
            "rsync".to_string(),
            self.source.to_string_lossy().into_owned(),
            self.dest.clone(),
        ];
        let flags = [
            ("archive", self.archive),
            ("compress", self.compress),
            ("delete", self.delete),
            ("recursive", self.recursive),
            ("update", self.update),
            ("verbose", self.verbose),
        ];
        argv.extend(
            flags
                .into_iter()
                .filter(|(_, set)| *set)
                .map(|(flag, _)| format!("--{flag}")),
        );
        argv
    }
}

fn enabled() -> bool {
    true
}

fn default_session_name() -> String {
    "taskdeck".to_string()
}

fn default_bind() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl SessionConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading session file {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("parsing session file {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (index, task) in self.tasks.iter().enumerate() {
            let argv = match task {
                TaskConfig::Process(p) => &p.command,
                TaskConfig::Watch(w) => &w.on_change,
                TaskConfig::Rsync(r) => {
                    if r.rsync.dest.is_empty() {
                        bail!("task #{} has an empty rsync destination", index + 1);
                    }
                    continue;
                }
            };
            if argv.is_empty() {
                bail!("task #{} has an empty command", index + 1);
            }
        }
        Ok(())
    }

    /// Relative watch paths, rsync sources and working directories are
    /// relative to the session file. Remote rsync destinations are left alone.
    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        for task in &mut self.tasks {
            match task {
                TaskConfig::Process(p) => p.cwd.iter_mut().for_each(resolve),
                TaskConfig::Watch(w) => {
                    resolve(&mut w.watch);
                    w.cwd.iter_mut().for_each(resolve);
                }
                TaskConfig::Rsync(r) => resolve(&mut r.rsync.source),
            }
        }
    }

    pub fn build_registry(&self) -> TaskRegistry {
        let mut registry = TaskRegistry::new(self.name.clone());
        for task in &self.tasks {
            let id = registry.next_id();
            match task {
                TaskConfig::Process(p) => {
                    let spec = ProcessSpec {
                        argv: p.command.clone(),
                        cwd: p.cwd.clone(),
                        env: p.env.clone(),
                        pty: p.pty,
                    };
                    registry.add(Arc::new(ProcessTask::new(id, p.name.clone(), spec)));
                }
                TaskConfig::Watch(w) => {
                    let handler = ProcessSpec {
                        argv: w.on_change.clone(),
                        cwd: w.cwd.clone(),
                        env: w.env.clone(),
                        pty: w.pty,
                    };
                    let name = w
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("watch {}", w.watch.display()));
                    let spec = WatchSpec {
                        path: w.watch.clone(),
                        recursive: w.recursive,
                        delay: w.delay_ms.map_or(DEFAULT_DELAY, Duration::from_millis),
                        force_once: w.force_once,
                        handler,
                    };
                    registry.add(Arc::new(WatchTask::new(id, name, spec)));
                }
                TaskConfig::Rsync(r) => {
                    let name = r
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("rsync {}", r.rsync.source.display()));
                    let spec = WatchSpec {
                        path: r.rsync.source.clone(),
                        recursive: r.rsync.recursive,
                        delay: DEFAULT_DELAY,
                        force_once: true,
                        handler: ProcessSpec::new(r.rsync.argv()),
                    };
                    registry.add(Arc::new(WatchTask::new(id, name, spec)));
                }
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use taskdeck_protocol::TaskStatus;

    use crate::task::TaskRunner;

    const SAMPLE: &str = r#"
name = "web"

[server]
port = 5000

[[task]]
name = "api"
command = ["sleep", "1"]
env = { RUST_LOG = "debug" }

[[task]]
watch = "src"
recursive = true
delay_ms = 250
on_change = ["make"]
pty = true

[[task]]
name = "mirror"
rsync = { source = "public/", dest = "backup:/srv/public", delete = true, verbose = false }
"#;

    #[test]
    fn parses_processes_and_watches() {
        let config = SessionConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.name, "web");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.bind, default_bind());
        assert_eq!(config.tasks.len(), 3);

        let TaskConfig::Process(api) = &config.tasks[0] else {
            panic!("expected process task");
        };
        assert_eq!(api.command, vec!["sleep", "1"]);
        assert_eq!(api.env.get("RUST_LOG").map(String::as_str), Some("debug"));

        let TaskConfig::Watch(watch) = &config.tasks[1] else {
            panic!("expected watch task");
        };
        assert!(watch.recursive);
        assert!(watch.pty);
        assert_eq!(watch.delay_ms, Some(250));
        assert!(!api.pty);
    }

    #[test]
    fn rsync_entry_builds_flagged_command() {
        let config = SessionConfig::parse(SAMPLE).unwrap();
        let TaskConfig::Rsync(mirror) = &config.tasks[2] else {
            panic!("expected rsync task");
        };
        assert_eq!(
            mirror.rsync.argv(),
            vec![
                "rsync",
                "public/",
                "backup:/srv/public",
                "--archive",
                "--compress",
                "--delete",
                "--recursive",
            ]
        );
    }

    #[test]
    fn rsync_defaults_match_plain_archive_copy() {
        let config = SessionConfig::parse("[[task]]\nrsync = { source = \"a\", dest = \"b\" }\n").unwrap();
        let TaskConfig::Rsync(r) = &config.tasks[0] else {
            panic!("expected rsync task");
        };
        assert_eq!(
            r.rsync.argv(),
            vec!["rsync", "a", "b", "--archive", "--compress", "--recursive", "--verbose"]
        );
    }

    #[test]
    fn rsync_needs_destination() {
        let err = SessionConfig::parse("[[task]]\nrsync = { source = \"a\", dest = \"\" }\n").unwrap_err();
        assert!(err.to_string().contains("rsync destination"));
    }

    #[tokio::test]
    async fn rsync_task_syncs_once_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir(&source).unwrap();
        let raw = format!(
            "[[task]]\nname = \"mirror\"\nrsync = {{ source = \"{}\", dest = \"{}\" }}\n",
            source.display(),
            dir.path().join("dest").display()
        );
        let registry = SessionConfig::parse(&raw).unwrap().build_registry();
        let task = registry.get(taskdeck_protocol::TaskId(0)).unwrap();
        assert_eq!(task.core().name(), "mirror");
        assert_eq!(task.info().actions, vec!["Trigger"]);

        task.clone().start();
        let output = task.core().output();
        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while !output.contents().contains("Invoking task once unconditionally") {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert!(output.contents().contains("Watching:"));
    }

    #[test]
    fn defaults_apply_to_minimal_file() {
        let config = SessionConfig::parse("").unwrap();
        assert_eq!(config.name, "taskdeck");
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = SessionConfig::parse("[[task]]\ncommand = []\n").unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[test]
    fn unknown_task_shape_is_rejected() {
        assert!(SessionConfig::parse("[[task]]\nrun = \"x\"\n").is_err());
    }

    #[test]
    fn registry_preserves_file_order() {
        let registry = SessionConfig::parse(SAMPLE).unwrap().build_registry();
        let tasks = registry.tasks();
        assert_eq!(tasks[0].name, "api");
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[1].name, "watch src");
        assert_eq!(tasks[1].actions, vec!["Trigger"]);
        assert_eq!(tasks[2].name, "mirror");
        assert_eq!(tasks[2].actions, vec!["Trigger"]);
    }

    #[test]
    fn load_resolves_paths_against_file_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = SessionConfig::load(&path).unwrap();
        let TaskConfig::Watch(watch) = &config.tasks[1] else {
            panic!("expected watch task");
        };
        assert_eq!(watch.watch, dir.path().join("src"));
        let TaskConfig::Rsync(mirror) = &config.tasks[2] else {
            panic!("expected rsync task");
        };
        assert_eq!(mirror.rsync.source, dir.path().join("public/"));
        assert_eq!(mirror.rsync.dest, "backup:/srv/public");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SessionConfig::load(Path::new("/nonexistent/session.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/session.toml"));
    }
}
