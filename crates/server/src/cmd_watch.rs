//! `taskdeck watch`: terminal dashboard for a running server.
//!
//! Prints the task list whenever it changes, streams the selected task's
//! output to stdout and reads commands from stdin.

use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::{Arc, Mutex};

use taskdeck_client::{
    ActionDispatcher, AppState, ClientConfig, Dashboard, DashboardHandle, OutputEvent, OutputView,
    PlainRenderer, StateSubscriber, WsOutputTransport,
};
use taskdeck_protocol::TaskId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::color;

const HELP: &str = "\
Commands:
  select <id>    show a task's output
  do <action>    run an action on the selected task
  connect        reopen the output stream
  disconnect     close the output stream
  toggle         connect or disconnect
  list           print the task list
  quit           exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Select(TaskId),
    Action(String),
    Connect,
    Disconnect,
    Toggle,
    List,
    Help,
    Quit,
}

/// `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let command = match word {
        "" => return Ok(None),
        "select" | "s" => {
            let id = rest
                .parse::<TaskId>()
                .map_err(|_| format!("invalid task id: {rest:?}"))?;
            ConsoleCommand::Select(id)
        }
        "do" | "d" => {
            if rest.is_empty() {
                return Err("usage: do <action>".to_string());
            }
            ConsoleCommand::Action(rest.to_string())
        }
        "connect" => ConsoleCommand::Connect,
        "disconnect" => ConsoleCommand::Disconnect,
        "toggle" | "t" => ConsoleCommand::Toggle,
        "list" | "ls" => ConsoleCommand::List,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command: {other}")),
    };
    Ok(Some(command))
}

/// Returns false once the console should exit.
fn execute(command: ConsoleCommand, handle: &DashboardHandle, list: &TaskListPrinter) -> bool {
    let sent = match command {
        ConsoleCommand::Select(id) => handle.select_task(id),
        ConsoleCommand::Action(action) => handle.perform_action(action),
        ConsoleCommand::Connect => handle.connect(),
        ConsoleCommand::Disconnect => handle.disconnect(),
        ConsoleCommand::Toggle => handle.toggle_connection(),
        ConsoleCommand::List => {
            list.print_latest();
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{HELP}");
            Ok(())
        }
        ConsoleCommand::Quit => return false,
    };
    sent.is_ok()
}

/// Prints the task list when it or the selection changes.
#[derive(Default)]
pub struct TaskListPrinter {
    last: Mutex<Option<Arc<AppState>>>,
}

impl TaskListPrinter {
    pub fn print_latest(&self) {
        let latest = self.last.lock().ok().and_then(|last| last.clone());
        if let Some(state) = latest {
            print!("{}", render_task_list(&state));
        }
    }
}

impl StateSubscriber for TaskListPrinter {
    fn on_new_state(&self, state: &Arc<AppState>) {
        let Ok(mut last) = self.last.lock() else {
            return;
        };
        let unchanged = last.as_deref().is_some_and(|prev| {
            prev.tasks == state.tasks && prev.selected_id() == state.selected_id()
        });
        *last = Some(state.clone());
        if !unchanged {
            print!("{}", render_task_list(state));
        }
    }
}

pub fn render_task_list(state: &AppState) -> String {
    let mut out = String::new();
    if state.tasks.is_empty() {
        out.push_str("No tasks\n");
        return out;
    }
    let name_width = state.tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);
    for task in &state.tasks {
        let marker = if state.selected_id() == Some(task.id) { ">" } else { " " };
        let status = task.status.as_str();
        let status = match task.status {
            taskdeck_protocol::TaskStatus::Failed => color::red(status),
            taskdeck_protocol::TaskStatus::Succeeded => color::green(status),
            taskdeck_protocol::TaskStatus::Running => color::blue(status),
            _ => color::yellow(status),
        };
        let _ = writeln!(
            out,
            "{marker} {:>3}  {:<name_width$}  {status}  [{}]",
            task.id,
            task.name,
            task.actions.join(", "),
        );
    }
    out
}

/// Streams output events to stdout.
struct TerminalOutput;

impl OutputView for TerminalOutput {
    fn on_output_event(&self, event: &OutputEvent) {
        let mut stdout = std::io::stdout().lock();
        let _ = match event {
            OutputEvent::Reset => writeln!(stdout, "{}", color::magenta("---- output ----")),
            OutputEvent::Appended(text) => write!(stdout, "{text}"),
            OutputEvent::ScrollToEnd => stdout.flush(),
            OutputEvent::ConnectionChanged { task_id, connected } => {
                let line = match (task_id, connected) {
                    (Some(id), true) => color::green(&format!("[streaming task {id}]")),
                    (Some(id), false) => color::yellow(&format!("[disconnected from task {id}]")),
                    (None, _) => color::yellow("[not streaming]"),
                };
                writeln!(stdout, "{line}")
            }
        };
    }
}

pub async fn run(url: &str) -> anyhow::Result<()> {
    let config = ClientConfig::new(url)?;
    let mut dashboard: Dashboard<WsOutputTransport, PlainRenderer, ActionDispatcher> =
        Dashboard::connect(&config)?;

    let printer = Arc::new(TaskListPrinter::default());
    dashboard.add_subscriber(printer.clone());
    dashboard.set_output_view(Arc::new(TerminalOutput));

    let handle = dashboard.handle();
    let running = tokio::spawn(dashboard.run());
    color::status_ok("Watching", config.base_url.as_str());
    info!(
        component = "console",
        event = "console.started",
        url = %config.base_url,
        "Console started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(
                    component = "console",
                    event = "console.stdin_failed",
                    error = %e,
                    "Failed to read stdin"
                );
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(command)) => {
                if !execute(command, &handle, &printer) {
                    break;
                }
            }
            Ok(None) => {}
            Err(message) => eprintln!("{}", color::red(&message)),
        }
    }

    // Already stopped if the loop exited on its own.
    let _ = handle.shutdown();
    running.await?;
    info!(component = "console", event = "console.stopped", "Console stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdeck_protocol::{Task, TaskStatus};

    fn task(id: u64, name: &str, status: TaskStatus) -> Task {
        Task {
            id: TaskId(id),
            name: name.to_string(),
            status,
            actions: vec!["Stop".to_string()],
        }
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("select 3"), Ok(Some(ConsoleCommand::Select(TaskId(3)))));
        assert_eq!(
            parse_command("  do   Restart "),
            Ok(Some(ConsoleCommand::Action("Restart".into())))
        );
        assert_eq!(parse_command("toggle"), Ok(Some(ConsoleCommand::Toggle)));
        assert_eq!(parse_command("q"), Ok(Some(ConsoleCommand::Quit)));
        assert_eq!(parse_command("   "), Ok(None));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("select x").unwrap_err().contains("invalid task id"));
        assert!(parse_command("do").is_err());
        assert_eq!(parse_command("jump"), Err("unknown command: jump".to_string()));
    }

    #[test]
    fn renders_marker_on_selected_task() {
        let running = task(0, "api", TaskStatus::Running);
        let state = AppState {
            tasks: vec![running.clone(), task(1, "worker", TaskStatus::Failed)],
            selected_task: Some(running),
        };
        let rendered = render_task_list(&state);
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(">   0  api   "));
        assert!(lines[1].starts_with("    1  worker"));
        assert!(lines[1].contains(&color::red("failed")));
    }

    #[test]
    fn empty_list_is_reported() {
        assert_eq!(render_task_list(&AppState::default()), "No tasks\n");
    }

    #[test]
    fn printer_remembers_latest_state() {
        let printer = TaskListPrinter::default();
        let state = Arc::new(AppState {
            tasks: vec![task(0, "api", TaskStatus::Pending)],
            selected_task: None,
        });
        printer.on_new_state(&state);
        let last = printer.last.lock().unwrap().clone().unwrap();
        assert!(Arc::ptr_eq(&last, &state));
    }
}
