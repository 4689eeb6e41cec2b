// Output formatting and display for CLI

use crate::daemon::DaemonStatus;
use crate::ipc::protocol::ResponseData;
use crate::process::{HealthStatus, ProcessId, ProcessStatus, StartOutcome, StatusSnapshot};
use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print a success response to stdout
pub fn print_success(data: &ResponseData) {
    match data {
        ResponseData::Started { id, outcome } => print_start_outcome(*id, outcome),

        ResponseData::Stopped { id } => {
            println!("{}", format!("✓ Process {} stopped", id).green().bold());
        }

        ResponseData::NotFound { id } => {
            println!("{}", format!("No process with PID {}", id).yellow());
        }

        ResponseData::Status(snapshot) => print_detailed_status(snapshot),

        ResponseData::ProcessList(processes) => {
            if processes.is_empty() {
                println!("{}", "No processes are being supervised".yellow());
            } else {
                print_process_table(processes);
            }
        }

        ResponseData::Logs { id, text } => {
            if text.is_empty() {
                println!("{}", format!("No output captured for {}", id).yellow());
            } else {
                print!("{}", text);
                if !text.ends_with('\n') {
                    println!();
                }
            }
        }

        ResponseData::Health { id, status } => {
            println!("  {}: {}", format!("Process {}", id).bold(), format_health_colored(status));
        }

        ResponseData::ShuttingDown => {
            println!("{} {}", "✓".green().bold(), "Daemon is shutting down");
        }
    }
}

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

pub fn is_successful_start(outcome: &StartOutcome) -> bool {
    matches!(outcome, StartOutcome::Ready | StartOutcome::Started)
}

fn print_start_outcome(id: ProcessId, outcome: &StartOutcome) {
    match outcome {
        StartOutcome::Ready => {
            println!("{}", "✓ Process is ready".green().bold());
        }
        StartOutcome::Started => {
            println!("{}", "✓ Process launched".green().bold());
        }
        StartOutcome::TimedOut => {
            println!("{}", "✗ Process did not become ready in time".red().bold());
        }
        StartOutcome::Failed(reason) => {
            println!("{}", "✗ Process failed to start".red().bold());
            println!("  {}: {}", "Reason".bold(), reason);
        }
    }
    println!("  {}: {}", "PID".bold(), id);
}

pub fn print_daemon_status(status: &DaemonStatus) {
    match status.pid {
        Some(pid) if status.running => {
            println!("{}", "✓ Daemon is running".green().bold());
            println!("  {}: {}", "PID".bold(), pid);
        }
        _ => println!("{}", "✗ Daemon is not running".red().bold()),
    }
    println!("  {}: {}", "PID file".bold(), status.pid_file.display());
}

/// Print a formatted table of processes
fn print_process_table(processes: &[StatusSnapshot]) {
    #[derive(Tabled)]
    struct ProcessRow {
        #[tabled(rename = "PID")]
        pid: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Port")]
        port: String,
        #[tabled(rename = "Uptime")]
        uptime: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
    }

    let rows: Vec<ProcessRow> = processes
        .iter()
        .map(|p| ProcessRow {
            pid: p.identity.to_string(),
            name: truncate(&p.name, 24),
            status: format_status_colored(&p.status),
            port: format_port(p.launch_config.port),
            uptime: format_duration(&p.uptime),
            restarts: p.restarts.to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} process(es)", processes.len())
            .dimmed()
            .italic()
    );
}

/// Print detailed status view for a single process
fn print_detailed_status(process: &StatusSnapshot) {
    let config = &process.launch_config;

    println!("\n{}", "Process Details".bold().underline());
    println!();
    println!("  {:<15} {}", "PID:".bold(), process.identity);
    println!("  {:<15} {}", "Name:".bold(), process.name.cyan());
    println!("  {:<15} {}", "Status:".bold(), format_status_colored(&process.status));
    println!("  {:<15} {}", "Entry point:".bold(), config.entry_point);
    println!("  {:<15} {}:{}", "Address:".bold(), config.host, format_port(config.port));
    println!("  {:<15} {}", "Directory:".bold(), config.working_dir.display());

    let started: DateTime<Local> = process.start_time.into();
    println!("  {:<15} {}", "Started:".bold(), started.format("%Y-%m-%d %H:%M:%S"));
    println!("  {:<15} {}", "Uptime:".bold(), format_duration(&process.uptime));
    println!("  {:<15} {}", "Restarts:".bold(), process.restarts);

    if !config.watch_patterns.is_empty() {
        let patterns: Vec<&str> = config.watch_patterns.iter().map(String::as_str).collect();
        println!("  {:<15} {}", "Watching:".bold(), patterns.join(", "));
    }

    if let Some(exit) = &process.exit {
        println!("  {:<15} {}", "Exited:".bold(), exit);
    }

    println!();
}

/// Format a process status with color coding
fn format_status_colored(status: &ProcessStatus) -> String {
    match status {
        ProcessStatus::Running => status.to_string().green().to_string(),
        ProcessStatus::Starting => status.to_string().yellow().to_string(),
        ProcessStatus::Unhealthy => status.to_string().yellow().bold().to_string(),
        ProcessStatus::Stopped => status.to_string().bright_black().to_string(),
        ProcessStatus::Failed => status.to_string().red().bold().to_string(),
    }
}

fn format_health_colored(status: &HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => status.to_string().green().to_string(),
        HealthStatus::Unhealthy => status.to_string().red().bold().to_string(),
        HealthStatus::NotFound => status.to_string().yellow().to_string(),
    }
}

fn format_port(port: u16) -> String {
    if port == 0 {
        "-".to_string()
    } else {
        port.to_string()
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let secs = duration.as_secs();

    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => match secs % 60 {
            0 => format!("{}m", secs / 60),
            rem => format!("{}m {}s", secs / 60, rem),
        },
        3600..=86399 => match (secs % 3600) / 60 {
            0 => format!("{}h", secs / 3600),
            mins => format!("{}h {}m", secs / 3600, mins),
        },
        _ => match (secs % 86400) / 3600 {
            0 => format!("{}d", secs / 86400),
            hours => format!("{}d {}h", secs / 86400, hours),
        },
    }
}

/// Truncate a string to at most `max_len` characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Spinner shown while the daemon works on a request
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);

    let pb = ProgressBar::new_spinner();
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}
