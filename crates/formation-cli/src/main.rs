//! `formation` – leader/follower formation simulator
//!
//! This binary runs a leader and a group of followers in one simulated
//! world.  It:
//!
//! 1. Loads `~/.formation/config.toml`, writing the defaults on first run.
//! 2. Builds the scenario: leader, followers, broadcast medium and stores.
//! 3. Steps the world at 60 game ticks per simulated second, paced to wall
//!    clock by `simulation.time_scale`.
//! 4. Reads operator lines from stdin between ticks (see [`repl`]).
//! 5. Stops on `/quit`, Ctrl-C, stdin EOF or after `simulation.duration_secs`.

mod config;
mod repl;
mod scenario;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::TryRecvError;
use std::time::{Duration, Instant};

use colored::Colorize;
use formation_types::TickRate;
use tracing::{info, warn};

use crate::config::Config;
use crate::repl::Flow;
use crate::scenario::Scenario;

fn main() {
    let _telemetry = formation_runtime::init_tracing("formation");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the simulation …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to stop");
    }

    let cfg = load_config();
    let mut scenario = match Scenario::build(&cfg) {
        Ok(scenario) => scenario,
        Err(e) => {
            println!("{}: {}", "Scenario error".red(), e);
            std::process::exit(1);
        }
    };

    println!(
        "  {} leader and {} follower(s) on system {}.",
        "1".bold(),
        cfg.simulation.followers.to_string().bold(),
        cfg.leader.system_id.yellow()
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    run(&mut scenario, &cfg, &shutdown);
    info!(
        game_ticks = scenario.game_tick(),
        simulated_secs = scenario.elapsed_secs(),
        "simulation stopped"
    );
}

/// Fixed-rate loop: one game tick per period, operator lines in between.
fn run(scenario: &mut Scenario, cfg: &Config, shutdown: &AtomicBool) {
    let sim = &cfg.simulation;
    let period = Duration::from_secs_f64(
        1.0 / (TickRate::GAME_TICKS_PER_SECOND * sim.time_scale.max(0.01)),
    );
    let lines = repl::spawn_stdin_reader();
    let mut stdin_open = true;
    let mut next_tick = Instant::now();
    repl::prompt();

    while !shutdown.load(Ordering::SeqCst) {
        if sim.duration_secs > 0.0 && scenario.elapsed_secs() >= sim.duration_secs {
            println!();
            println!("{}", "Simulation time elapsed.".green());
            break;
        }

        while stdin_open {
            match lines.try_recv() {
                Ok(line) => {
                    if repl::handle(&line, scenario) == Flow::Quit {
                        return;
                    }
                    repl::prompt();
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    stdin_open = false;
                    // Without a duration the run would never end.
                    if sim.duration_secs <= 0.0 {
                        return;
                    }
                }
            }
        }

        if let Err(e) = scenario.step() {
            println!("{}: {}", "Simulation fault".red(), e);
            return;
        }

        // Skip missed periods rather than bursting to catch up.
        next_tick += period;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }
}

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____                     __  _         "#.bold().cyan());
    println!("{}", r#"  / __/__  ______ _  ___ _/ /_(_)__  ___ "#.bold().cyan());
    println!("{}", r#" / _// _ \/ __/  ' \/ _ `/ __/ / _ \/ _ \"#.bold().cyan());
    println!("{}", r#"/_/  \___/_/ /_/_/_/\_,_/\__/_/\___/_//_/"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Formation".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Leader/follower formation simulator");
    println!();
}
