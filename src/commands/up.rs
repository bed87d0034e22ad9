use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::io::BufRead;
use tokio::sync::mpsc;
use tracing::debug;

use crate::cli::GlobalOpts;
use crate::orchestrator::error::{StartError, Transition};
use crate::orchestrator::supervisor::ServiceSupervisor;
use crate::orchestrator::Fleet;
use crate::ui::logs::{ConsoleWriter, Follow};
use crate::ui::summary::{print_session_help, render_bulk_report, render_status, use_color};

/// One line typed into an interactive `up` session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Start(String),
    Stop(String),
    Toggle(String),
    StartAll,
    StopAll,
    Status,
    Logs(String),
    Show(String),
    Hide(String),
    Help,
    Quit,
}

impl SessionCommand {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let arg = words.next().map(str::to_string);
        if words.next().is_some() {
            return Err(format!("too many arguments for '{}'", verb));
        }

        let needs_service = |make: fn(String) -> SessionCommand| {
            arg.clone()
                .map(make)
                .ok_or_else(|| format!("usage: {} <service>", verb))
        };
        let no_args = |cmd: SessionCommand| match &arg {
            Some(_) => Err(format!("'{}' takes no arguments", verb)),
            None => Ok(cmd),
        };

        let cmd = match verb.to_lowercase().as_str() {
            "start" => needs_service(SessionCommand::Start)?,
            "stop" => needs_service(SessionCommand::Stop)?,
            "toggle" => needs_service(SessionCommand::Toggle)?,
            "logs" => needs_service(SessionCommand::Logs)?,
            "show" => needs_service(SessionCommand::Show)?,
            "hide" => needs_service(SessionCommand::Hide)?,
            "start-all" => no_args(SessionCommand::StartAll)?,
            "stop-all" => no_args(SessionCommand::StopAll)?,
            "ps" | "status" => no_args(SessionCommand::Status)?,
            "help" | "?" => no_args(SessionCommand::Help)?,
            "quit" | "exit" | "q" => no_args(SessionCommand::Quit)?,
            other => return Err(format!("unknown command '{}', type 'help'", other)),
        };
        Ok(Some(cmd))
    }
}

pub async fn run(global: &GlobalOpts, services: Vec<String>, follow: bool) -> Result<()> {
    let fleet = super::load_fleet(global)?;
    if fleet.services.is_empty() {
        bail!(
            "no services found under {}",
            fleet.root.join("src").display()
        );
    }

    let supervisor = fleet.supervisor();
    let max_name_len = fleet
        .services
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0);
    let follow = if follow {
        Follow::All
    } else {
        Follow::Visible(supervisor.subscribe())
    };
    let writer = ConsoleWriter::new(
        supervisor.subscribe_console(),
        follow,
        BTreeSet::new(),
        max_name_len,
    );
    let writer_handle = tokio::spawn(writer.run());

    let interrupted = tokio::select! {
        _ = initial_start(&fleet, &supervisor, &services) => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if !interrupted {
        print_status(&fleet, &supervisor).await;
        print_session_help();
        session(&fleet, &supervisor).await;
    }

    println!();
    println!("Shutting down...");
    supervisor.shutdown().await;
    writer_handle.abort();
    println!("All services stopped.");
    Ok(())
}

async fn initial_start(fleet: &Fleet, supervisor: &ServiceSupervisor, services: &[String]) {
    if services.is_empty() {
        bulk_start(fleet, supervisor).await;
        return;
    }
    for name in services {
        let result = supervisor.start(name).await;
        report(name, result);
    }
}

async fn bulk_start(fleet: &Fleet, supervisor: &ServiceSupervisor) {
    let planner = fleet.planner(supervisor.clone());
    println!(
        "  Starting services by tier ({} between sequential starts)...",
        humantime::format_duration(planner.policy().settle_delay)
    );
    match planner.start_all().await {
        Ok(report) => {
            print!("{}", render_bulk_report(&report, use_color()));
            if !report.is_success() {
                eprintln!("  {} service(s) failed to start", report.failed.len());
            }
        }
        Err(e) => eprintln!("  bulk start refused: {}", e),
    }
}

async fn print_status(fleet: &Fleet, supervisor: &ServiceSupervisor) {
    let states = supervisor.snapshot().await;
    println!();
    print!(
        "{}",
        render_status(
            &states,
            &fleet.keywords(),
            &fleet.config.launch.url_scheme,
            use_color()
        )
    );
}

async fn session(fleet: &Fleet, supervisor: &ServiceSupervisor) {
    let mut lines = stdin_lines();
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => return,
        };
        let Some(line) = line else {
            debug!("stdin closed, ending session");
            return;
        };

        let cmd = match SessionCommand::parse(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("  {}", msg);
                continue;
            }
        };
        if cmd == SessionCommand::Quit {
            return;
        }

        tokio::select! {
            _ = execute(fleet, supervisor, cmd) => {}
            _ = tokio::signal::ctrl_c() => return,
        }
    }
}

async fn execute(fleet: &Fleet, supervisor: &ServiceSupervisor, cmd: SessionCommand) {
    match cmd {
        SessionCommand::Start(name) => report(&name, supervisor.start(&name).await),
        SessionCommand::Stop(name) => report(&name, supervisor.stop(&name).await),
        SessionCommand::Toggle(name) => report(&name, supervisor.toggle(&name).await),
        SessionCommand::StartAll => {
            if supervisor.can_start_all().await {
                bulk_start(fleet, supervisor).await;
            } else {
                println!("  Nothing to start.");
            }
        }
        SessionCommand::StopAll => {
            if !supervisor.can_stop_all().await {
                println!("  Nothing to stop.");
                return;
            }
            for name in supervisor.stop_all().await {
                println!("  stopped {}", name);
            }
        }
        SessionCommand::Status => print_status(fleet, supervisor).await,
        SessionCommand::Logs(name) => match supervisor.console(&name).await {
            Ok(text) if text.is_empty() => println!("  No output captured for {}.", name),
            Ok(text) => print!("{}", text),
            Err(e) => eprintln!("  {}", e),
        },
        SessionCommand::Show(name) => {
            if let Err(e) = supervisor.set_console_visible(&name, true).await {
                eprintln!("  {}", e);
            }
        }
        SessionCommand::Hide(name) => {
            if let Err(e) = supervisor.set_console_visible(&name, false).await {
                eprintln!("  {}", e);
            }
        }
        SessionCommand::Help => print_session_help(),
        SessionCommand::Quit => {}
    }
}

fn report(name: &str, result: Result<Transition, StartError>) {
    match result {
        Ok(Transition::Started { pid }) => println!("  started {} (PID {})", name, pid),
        Ok(Transition::AlreadyRunning) => println!("  {} is already running", name),
        Ok(Transition::AlreadyStarting) => println!("  {} is already starting", name),
        Ok(Transition::Stopped) => println!("  stopped {}", name),
        Ok(Transition::NotRunning) => println!("  {} is not running", name),
        Err(e) => {
            let mut message = e.to_string();
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                message.push_str(&format!(": {}", cause));
                source = cause.source();
            }
            eprintln!("  Error: {}", message);
        }
    }
}

/// Lines from stdin, read on a plain thread so a blocked read never holds the
/// runtime open at shutdown.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
