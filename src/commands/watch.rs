use super::verify::print_report;
use super::{build_supervisor, load_settings};
use anyhow::{Context, Result};
use launcher::clienv;
use launcher::supervisor::instance::ensure_single_instance;
use launcher::supervisor::state::StatusBoard;
use launcher::supervisor::{
    Action, ActionGate, ActionOutcome, BackgroundVerifier, LauncherState, Liveness, Poller,
    Supervisor,
};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

const HELP: &str = "commands: start <service> | stop <service> | open <tool> | status | quit";

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Service(Action, String),
    Open(String),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<std::result::Result<ConsoleCommand, String>> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let arg = words.next().map(str::to_string);

    let command = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("start", Some(name)) => ConsoleCommand::Service(Action::Start, name),
        ("stop", Some(name)) => ConsoleCommand::Service(Action::Stop, name),
        ("open", Some(name)) => ConsoleCommand::Open(name),
        ("status", None) => ConsoleCommand::Status,
        ("help" | "?", None) => ConsoleCommand::Help,
        ("quit" | "exit", None) => ConsoleCommand::Quit,
        _ => return Some(Err(format!("unrecognised command '{}'", line.trim()))),
    };
    Some(Ok(command))
}

pub(crate) async fn cmd_watch(config: Option<&Path>) -> Result<()> {
    let settings = load_settings(config)?;
    let interval = settings.poll_interval;
    let supervisor = build_supervisor(settings);

    ensure_single_instance(supervisor.query(), &clienv::instance_marker())
        .await
        .context("Refusing to start")?;

    let state = Arc::new(LauncherState::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let verifier = BackgroundVerifier::new(supervisor.clone()).with_state(Arc::clone(&state));
    let verify_task = tokio::spawn(async move {
        let report = verifier.run().await;
        print_report(&report);
    });
    let pollers =
        Poller::new(supervisor.clone(), Arc::clone(&state), interval).spawn_all(shutdown_rx.clone());
    let printer = tokio::spawn(print_transitions(state.subscribe(), shutdown_rx));

    println!("Verifying services, polling every {interval:?}");
    println!("{HELP}");

    let gate = ActionGate::new(supervisor.clone(), Arc::clone(&state));
    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => None,
        };
        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
            None => break,
        };

        match parse_command(&line) {
            None => {}
            Some(Err(message)) => println!("{message}; {HELP}"),
            Some(Ok(ConsoleCommand::Quit)) => break,
            Some(Ok(command)) => run_command(command, &gate, &supervisor, &state).await,
        }
    }

    debug!("Shutting down pollers");
    let _ = shutdown_tx.send(true);
    for handle in pollers {
        if let Err(e) = handle.await {
            warn!(error = %e, "Poller task failed");
        }
    }
    verify_task.abort();
    let _ = printer.await;
    Ok(())
}

/// Forward lines from `reader` on a plain thread. A blocking read cannot be
/// cancelled, and left on the runtime's blocking pool it would hold up
/// shutdown until the next line arrives.
fn spawn_line_reader<R>(reader: R) -> Result<mpsc::Receiver<std::io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in reader.lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to start console reader")?;
    Ok(rx)
}

async fn run_command(
    command: ConsoleCommand,
    gate: &ActionGate,
    supervisor: &Supervisor,
    state: &LauncherState,
) {
    match command {
        ConsoleCommand::Service(action, name) => {
            if state.is_initializing() {
                println!("still verifying services, try again shortly");
                return;
            }
            match gate.request(action, &name).await {
                Ok(ActionOutcome::Issued) => println!("{action} {name}: issued"),
                Ok(ActionOutcome::AlreadyThere) => {
                    let status = match action {
                        Action::Start => Liveness::Running,
                        Action::Stop => Liveness::Stopped,
                    };
                    println!("{name} is already {status}");
                }
                Ok(ActionOutcome::Busy) => println!("another action is still in progress"),
                Err(e) => println!("{action} {name} failed: {e}"),
            }
        }
        ConsoleCommand::Open(tool) => match supervisor.launch_tool(&tool).await {
            Ok(()) => println!("opened {tool}"),
            Err(e) => println!("open {tool} failed: {e}"),
        },
        ConsoleCommand::Status => {
            let board = state.snapshot();
            if board.is_empty() {
                println!("no status yet");
            }
            for (name, liveness) in &board {
                println!("{name:<8} {liveness}");
            }
            if state.is_busy() {
                println!("(action in progress)");
            }
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
}

async fn print_transitions(
    mut board: watch::Receiver<StatusBoard>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut last = board.borrow_and_update().clone();
    loop {
        tokio::select! {
            changed = board.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }

        let current = board.borrow_and_update().clone();
        for (name, liveness) in &current {
            if last.get(name) != Some(liveness) {
                println!("{name}: {liveness}");
            }
        }
        last = current;
    }
}
