//! SIMT accelerator simulator CLI.
//!
//! This binary loads a JSON configuration and a JSON kernel trace, runs the
//! simulation to completion, and prints the statistics report. Exit code 0
//! on natural termination; nonzero on misconfiguration or deadlock.

use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;

use warpsim_core::config::Config;
use warpsim_core::trace::MemoryTrace;
use warpsim_core::Simulator;

#[derive(Parser, Debug)]
#[command(
    name = "sim",
    author,
    version,
    about = "Cycle-driven SIMT accelerator simulator",
    long_about = "Run a kernel trace through the timing model.\n\nExamples:\n  sim run -t traces/vecadd.json\n  sim run -t traces/vecadd.json -c configs/mesh_8x8.json --max-cycles 1000000"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a kernel trace to completion.
    Run {
        /// Kernel trace (JSON).
        #[arg(short, long)]
        trace: String,

        /// Configuration file (JSON); defaults apply when omitted.
        #[arg(short, long)]
        config: Option<String>,

        /// Override the simulated-cycle limit.
        #[arg(long)]
        max_cycles: Option<u64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            trace,
            config,
            max_cycles,
        } => cmd_run(&trace, config.as_deref(), max_cycles),
    }
}

/// Loads config + trace, runs to completion, prints the report.
fn cmd_run(trace_path: &str, config_path: Option<&str>, max_cycles: Option<u64>) {
    let mut config: Config = match config_path {
        Some(path) => {
            let text = read_or_die(path);
            match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("error: bad configuration {path}: {err}");
                    process::exit(2);
                }
            }
        }
        None => Config::default(),
    };
    if let Some(limit) = max_cycles {
        config.sim.max_cycles = limit;
    }

    let trace_text = read_or_die(trace_path);
    let trace: MemoryTrace = match serde_json::from_str(&trace_text) {
        Ok(trace) => trace,
        Err(err) => {
            eprintln!("error: bad trace {trace_path}: {err}");
            process::exit(2);
        }
    };

    let mut simulator = match Simulator::new(config) {
        Ok(simulator) => simulator,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(2);
        }
    };
    if let Err(err) = simulator.launch(Arc::new(trace)) {
        eprintln!("error: {err}");
        process::exit(2);
    }

    match simulator.run() {
        Ok(()) => {
            simulator.stats().print();
        }
        Err(err) => {
            simulator.stats().print();
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}

fn read_or_die(path: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error: cannot read {path}: {err}");
            process::exit(2);
        }
    }
}
