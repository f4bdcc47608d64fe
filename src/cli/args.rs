use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "fstrans")]
#[command(about = "Exercise and inspect the filesystem transaction coordinator")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Run concurrent transactions against repeated suspend/resume cycles")]
    Stress {
        #[arg(short, long, help = "Number of worker threads")]
        threads: Option<usize>,

        #[arg(short, long, help = "Transactions per worker thread")]
        iterations: Option<usize>,

        #[arg(short, long, help = "Suspend/resume cycles")]
        cycles: Option<usize>,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
    #[command(about = "Print the state of a demonstration mount topology")]
    Dump {
        #[arg(long, help = "JSON output")]
        json: bool,

        #[arg(short, long, help = "Include idle bindings and mounts")]
        verbose: bool,
    },
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show current configuration values")]
    Show,
    #[command(about = "Show config file path")]
    Path,
}
