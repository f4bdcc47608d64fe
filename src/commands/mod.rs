pub mod config;
pub mod dump;
pub mod stress;

pub use config::handle_config_command;
pub use dump::print_dump;
pub use stress::{run_stress, StressOptions};
