//! REPL for the formation simulator.
//!
//! Supported slash-commands:
//!   /help         – show this list
//!   /status       – leader and follower status
//!   /slots        – distance of each follower from its slot
//!   /quit | /exit – stop the simulation
//!
//! Any other line is an operator command for the leader, e.g. `find;Scout`,
//! `setoffset;0;0;80` or `Drone1;Drone2:stop`.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use colored::Colorize;

use crate::scenario::Scenario;

/// What the caller's loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Read stdin lines on a background thread.  The channel disconnects at EOF.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub fn prompt() {
    print!("{} ", "formation>".bold().cyan());
    io::stdout().flush().ok();
}

/// Execute one input line against `scenario`.
pub fn handle(line: &str, scenario: &mut Scenario) -> Flow {
    let cmd = line.trim();
    match cmd {
        "" => {}
        "/help" => cmd_help(),
        "/status" => cmd_status(scenario),
        "/slots" => cmd_slots(scenario),
        "/quit" | "/exit" => {
            println!("{}", "Goodbye.".green());
            return Flow::Quit;
        }
        other if other.starts_with('/') => {
            println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            );
        }
        other => {
            scenario.command(other);
            println!("  {} {}", "→".green(), other.bold());
        }
    }
    Flow::Continue
}

fn cmd_help() {
    println!();
    println!("{}", "Formation Commands".bold().underline());
    println!("  {}       – leader and follower status", "/status".bold().cyan());
    println!("  {}        – distance from each formation slot", "/slots".bold().cyan());
    println!("  {}  – stop the simulation", "/quit  /exit".bold().cyan());
    println!();
    println!("{}", "Leader".bold().underline());
    println!("  {}", "stop | start | reset | scan | find;<name>".cyan());
    println!("{}", "Followers (relayed; prefix with id1;id2: to address)".bold().underline());
    println!(
        "  {}",
        "setoffset;x;y;z | addoffset;x;y;z | stop | start | starthere | reset".cyan()
    );
    println!("  {}", "save[;name] | savehere[;name] | load;<name> | clear".cyan());
    println!();
}

fn cmd_status(scenario: &Scenario) {
    println!(
        "{} t={:.1}s",
        "Leader".bold().underline(),
        scenario.elapsed_secs()
    );
    for line in scenario.leader().status().to_string().lines() {
        println!("  {}", line.yellow());
    }
    for follower in scenario.followers() {
        println!("{}", follower.id().bold().underline());
        for line in follower.status().to_string().lines() {
            println!("  {line}");
        }
    }
}

fn cmd_slots(scenario: &Scenario) {
    for (id, error) in scenario.slot_errors() {
        match error {
            Some(error) if error < 5.0 => println!("  {} {}", id.bold(), format!("{error:.1} m").green()),
            Some(error) => println!("  {} {}", id.bold(), format!("{error:.1} m").yellow()),
            None => println!("  {} {}", id.bold(), "no leader".red()),
        }
    }
}
