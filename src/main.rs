use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};
use commands::StressOptions;

fn main() {
    match run() {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {} ({})", e, e.errno());
            std::process::exit(1);
        }
    }
}

fn run() -> fstrans::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("FSTRANS_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Stress {
            threads,
            iterations,
            cycles,
            json,
        } => {
            let config = fstrans::load_config()?;
            let options = StressOptions {
                threads: threads.unwrap_or_else(|| config.stress.get_threads()),
                iterations: iterations.unwrap_or_else(|| config.stress.get_iterations()),
                cycles: cycles.unwrap_or_else(|| config.stress.get_cycles()),
            };
            let report = commands::run_stress(&config, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
            Ok(if report.leaked_mount_infos == 0 { 0 } else { 1 })
        }
        Commands::Dump { json, verbose } => {
            commands::print_dump(json, verbose)?;
            Ok(0)
        }
        Commands::Config { action } => {
            commands::handle_config_command(action)?;
            Ok(0)
        }
    }
}
