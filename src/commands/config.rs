use crate::cli::ConfigAction;
use fstrans::config::{get_config_path, load_config};
use fstrans::Result;

pub fn handle_config_command(action: Option<ConfigAction>) -> Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            let config_path = get_config_path()?;
            println!("Config location: {}", config_path.display());
        }
        None | Some(ConfigAction::Show) => {
            let config_path = get_config_path()?;
            let config = load_config()?;
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("Config file: {} (not present, using defaults)", config_path.display());
            }
            println!();
            println!("Current configuration:");
            println!("  Wait:");
            println!("    wait_recheck_ms: {}", config.wait.get_wait_recheck_ms());
            println!("    grace_spin_limit: {}", config.wait.get_grace_spin_limit());
            println!("  Registry:");
            println!(
                "    binding_cache_limit: {}",
                config.registry.get_binding_cache_limit()
            );
            println!("  Stress:");
            println!("    threads: {}", config.stress.get_threads());
            println!("    iterations: {}", config.stress.get_iterations());
            println!("    cycles: {}", config.stress.get_cycles());
        }
    }
    Ok(())
}
