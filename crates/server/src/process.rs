//! Process tasks: run a command, capture its output, expose Stop/Restart.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use taskdeck_protocol::{TaskId, TaskStatus};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::color;
use crate::stream::Utf8Decoder;
use crate::task::{TaskCore, TaskError, TaskEvent, TaskRunner};

const BLOCK_SIZE: usize = 1024;
const STOP_GRACE: Duration = Duration::from_secs(5);
const PTY_DRAIN_GRACE: Duration = Duration::from_secs(1);
const PTY_SIZE: PtySize = PtySize {
    rows: 40,
    cols: 120,
    pixel_width: 0,
    pixel_height: 0,
};

pub const ACTION_STOP: &str = "Stop";
pub const ACTION_RESTART: &str = "Restart";

/// What to run. `env` is layered over the inherited environment.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    /// Attach the child to a pseudo-terminal instead of pipes.
    pub pty: bool,
}

impl ProcessSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_pty(mut self, pty: bool) -> Self {
        self.pty = pty;
        self
    }

    pub fn display_name(&self) -> String {
        self.argv.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running { pid: u32 },
    Exited(ExitStatus),
    SpawnFailed,
}

impl RunState {
    fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }
}

pub struct ProcessTask {
    core: TaskCore,
    spec: ProcessSpec,
    run: watch::Sender<RunState>,
    restarting: AtomicBool,
}

impl ProcessTask {
    pub fn new(id: TaskId, name: Option<String>, spec: ProcessSpec) -> Self {
        let name = name.unwrap_or_else(|| spec.display_name());
        let (run, _) = watch::channel(RunState::NotStarted);
        Self {
            core: TaskCore::new(id, name),
            spec,
            run,
            restarting: AtomicBool::new(false),
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.run.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.run_state().is_running()
    }

    /// Spawn the process and the tasks that pump its output and await its exit.
    pub fn launch(self: &Arc<Self>) -> Result<(), TaskError> {
        if self.is_running() {
            return Ok(());
        }
        let (program, args) = self.spec.argv.split_first().ok_or(TaskError::EmptyCommand)?;
        if self.spec.pty {
            self.launch_pty(program, args)
        } else {
            self.launch_piped(program, args)
        }
    }

    fn launch_piped(self: &Arc<Self>, program: &str, args: &[String]) -> Result<(), TaskError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        self.mark_spawned(child.id().unwrap_or_default());

        let stdout = child.stdout.take().map(|out| tokio::spawn(pump(self.clone(), out)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(pump(self.clone(), err)));

        let task = self.clone();
        tokio::spawn(async move {
            let exit = child.wait().await;
            // Drain remaining output before the exit banner.
            for reader in [stdout, stderr].into_iter().flatten() {
                let _ = reader.await;
            }
            task.finish(exit);
        });
        Ok(())
    }

    /// Run under a pseudo-terminal so the program keeps its colour output.
    /// The child leads its own session, so its pid doubles as the group id
    /// that `stop` signals.
    fn launch_pty(self: &Arc<Self>, program: &str, args: &[String]) -> Result<(), TaskError> {
        let pair = native_pty_system()
            .openpty(PTY_SIZE)
            .map_err(|e| TaskError::Pty(e.to_string()))?;

        let mut builder = CommandBuilder::new(program);
        builder.args(args);
        // Without an explicit cwd the child would start in $HOME.
        match &self.spec.cwd {
            Some(cwd) => builder.cwd(cwd),
            None => builder.cwd(std::env::current_dir()?),
        }
        if std::env::var_os("TERM").is_none() {
            builder.env("TERM", "xterm-256color");
        }
        for (key, value) in &self.spec.env {
            builder.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| TaskError::Pty(e.to_string()))?;
        drop(pair.slave);
        let pid = child
            .process_id()
            .ok_or_else(|| TaskError::Pty("child has no process id".to_string()))?;
        // Reaped through waitpid below to keep the raw exit status.
        drop(child);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TaskError::Pty(e.to_string()))?;
        self.mark_spawned(pid);

        let pump = tokio::task::spawn_blocking({
            let task = self.clone();
            move || pump_blocking(task, reader)
        });

        let task = self.clone();
        let master = pair.master;
        tokio::spawn(async move {
            let exit = tokio::task::spawn_blocking(move || wait_pid(pid))
                .await
                .unwrap_or_else(|e| Err(io::Error::other(e)));
            // A background grandchild can hold the terminal open after the
            // leader exits; don't let it delay the exit banner forever.
            let _ = tokio::time::timeout(PTY_DRAIN_GRACE, pump).await;
            drop(master);
            task.finish(exit);
        });
        Ok(())
    }

    fn mark_spawned(&self, pid: u32) {
        self.run.send_replace(RunState::Running { pid });
        info!(
            component = "process",
            event = "process.spawned",
            task_id = %self.core.id(),
            pid,
            pty = self.spec.pty,
            command = %self.spec.display_name(),
        );
        self.core.publish(TaskEvent::StatusChanged);
    }

    fn finish(&self, exit: io::Result<ExitStatus>) {
        match exit {
            Ok(status) => self.on_exit(status),
            Err(e) => {
                warn!(
                    component = "process",
                    event = "process.wait_failed",
                    task_id = %self.core.id(),
                    error = %e,
                );
                self.core.write_output(&color::red("\n[Process exited due to unknown reasons]\n\n"));
                self.run.send_replace(RunState::SpawnFailed);
                self.core.publish(TaskEvent::StatusChanged);
            }
        }
    }

    fn launch_or_report(self: &Arc<Self>) {
        if let Err(e) = self.launch() {
            warn!(
                component = "process",
                event = "process.spawn_failed",
                task_id = %self.core.id(),
                command = %self.spec.display_name(),
                error = %e,
            );
            self.core.write_line(&color::red(&format!("[{e}]")));
            self.run.send_replace(RunState::SpawnFailed);
            self.core.publish(TaskEvent::StatusChanged);
        }
    }

    fn on_exit(&self, status: ExitStatus) {
        self.core.write_output(&termination_message(status));
        self.run.send_replace(RunState::Exited(status));
        info!(
            component = "process",
            event = "process.exited",
            task_id = %self.core.id(),
            code = ?status.code(),
        );
        self.core.publish(TaskEvent::StatusChanged);
    }

    /// Ask the process to terminate; kill it if it is still alive after the grace period.
    pub fn stop(&self) {
        let RunState::Running { pid } = self.run_state() else {
            return;
        };
        send_signal(pid, libc::SIGTERM);

        let mut run = self.run.subscribe();
        tokio::spawn(async move {
            let exited = tokio::time::timeout(STOP_GRACE, run.wait_for(|s| !s.is_running()))
                .await
                .is_ok();
            if !exited && *run.borrow() == (RunState::Running { pid }) {
                send_signal(pid, libc::SIGKILL);
            }
        });
    }

    /// Stop (if running), wait for exit, start again. Overlapping restarts collapse into one.
    pub fn restart(self: &Arc<Self>) {
        if self.restarting.swap(true, Ordering::SeqCst) {
            return;
        }
        let task = self.clone();
        tokio::spawn(async move {
            if task.is_running() {
                task.stop();
                task.wait_for_exit().await;
            }
            task.launch_or_report();
            task.restarting.store(false, Ordering::SeqCst);
        });
    }

    pub async fn wait_for_exit(&self) {
        let mut run = self.run.subscribe();
        let _ = run.wait_for(|s| !s.is_running()).await;
    }
}

impl TaskRunner for ProcessTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn start(self: Arc<Self>) {
        self.launch_or_report();
    }

    fn status(&self) -> TaskStatus {
        match self.run_state() {
            RunState::NotStarted => TaskStatus::Pending,
            RunState::Running { .. } => TaskStatus::Running,
            RunState::Exited(status) if status.success() => TaskStatus::Succeeded,
            RunState::Exited(_) | RunState::SpawnFailed => TaskStatus::Failed,
        }
    }

    fn actions(&self) -> Vec<&'static str> {
        vec![ACTION_STOP, ACTION_RESTART]
    }

    fn perform_action(self: Arc<Self>, action: &str) -> Result<Option<String>, TaskError> {
        match action {
            ACTION_STOP => self.stop(),
            ACTION_RESTART => self.restart(),
            other => return Err(TaskError::UnsupportedAction(other.to_string())),
        }
        Ok(None)
    }
}

async fn pump<R>(task: Arc<ProcessTask>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8Decoder::default();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        match reader.read(&mut block).await {
            Ok(0) => break,
            Ok(n) => task.core.write_output(&decoder.decode(&block[..n])),
            Err(e) => {
                warn!(
                    component = "process",
                    event = "process.read_failed",
                    task_id = %task.core.id(),
                    error = %e,
                );
                break;
            }
        }
    }
}

fn pump_blocking(task: Arc<ProcessTask>, mut reader: Box<dyn Read + Send>) {
    let mut decoder = Utf8Decoder::default();
    let mut block = [0u8; BLOCK_SIZE];
    loop {
        match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => task.core.write_output(&decoder.decode(&block[..n])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports EIO once the last slave descriptor closes.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
            Err(e) => {
                warn!(
                    component = "process",
                    event = "process.read_failed",
                    task_id = %task.core.id(),
                    error = %e,
                );
                break;
            }
        }
    }
}

fn wait_pid(pid: u32) -> io::Result<ExitStatus> {
    use std::os::unix::process::ExitStatusExt;

    let pid = libc::pid_t::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    if pid <= 0 {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: `status` outlives the call and is the only pointer passed.
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == pid {
            return Ok(ExitStatus::from_raw(status));
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Signal the whole process group so children of a shell wrapper go too.
fn send_signal(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    if pid <= 0 {
        return;
    }
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        warn!(
            component = "process",
            event = "process.signal_failed",
            pid,
            signal,
            error = %std::io::Error::last_os_error(),
        );
    }
}

fn termination_message(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    let (reason, success) = if let Some(code) = status.code() {
        (format!("with code {code}"), code == 0)
    } else if let Some(signal) = status.signal() {
        match signal_name(signal) {
            Some(name) => (format!("due to signal {signal} ({name})"), false),
            None => (format!("due to signal {signal}"), false),
        }
    } else {
        ("due to unknown reasons".to_string(), false)
    };
    let text = format!("\n[Process exited {reason}]\n\n");
    if success {
        color::green(&text)
    } else {
        color::red(&text)
    }
}

fn signal_name(signal: i32) -> Option<&'static str> {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGABRT => "SIGABRT",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGTERM => "SIGTERM",
        _ => return None,
    };
    Some(name)
}
