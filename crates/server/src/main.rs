//! taskdeck
//!
//! Runs a session of background tasks and serves their live status and
//! output; `watch` is the terminal dashboard for a running session.

mod cmd_serve;
mod cmd_watch;
mod color;
mod config;
mod logging;
mod paths;
mod process;
mod registry;
mod stream;
mod task;
mod watch;
mod websocket;

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use taskdeck_client::config::DEFAULT_SERVER_URL;

use crate::logging::{init_logging, LogTarget};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "taskdeck", version = VERSION, about = "Task runner with a live dashboard")]
struct Cli {
    /// Data directory for logs
    #[arg(long, global = true, env = "TASKDECK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tasks in a session file and serve the dashboard endpoints
    Serve {
        /// Session file (TOML)
        #[arg(long, short, env = "TASKDECK_CONFIG")]
        config: PathBuf,

        /// Address to bind, overriding the session file
        #[arg(long, env = "TASKDECK_BIND")]
        bind: Option<IpAddr>,

        /// Preferred port, overriding the session file
        #[arg(long, short, env = "TASKDECK_PORT")]
        port: Option<u16>,
    },

    /// Terminal dashboard for a running server
    Watch {
        #[arg(long, env = "TASKDECK_URL", default_value = DEFAULT_SERVER_URL)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    paths::init_data_dir(cli.data_dir.as_deref());

    match cli.command {
        Command::Serve { config, bind, port } => {
            let _logging = init_logging(LogTarget::Stderr)?;
            cmd_serve::run(cmd_serve::ServeOptions {
                config_path: &config,
                bind,
                port,
            })
            .await
        }
        Command::Watch { url } => {
            paths::ensure_dirs()?;
            let logging = init_logging(LogTarget::File("watch.log"))?;
            if let Some(path) = &logging.log_path {
                color::status_ok("Logging", &path.display().to_string());
            }
            cmd_watch::run(&url).await
        }
    }
}
