use crate::error::{FstransError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIN_WAIT_RECHECK_MS: u64 = 1;
const MAX_WAIT_RECHECK_MS: u64 = 60000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WaitConfig {
    /// Interval after which a blocked waiter re-evaluates its predicate even
    /// without a wakeup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_recheck_ms: Option<u64>,
    /// Spins before a writer starts yielding while it waits out readers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_spin_limit: Option<u32>,
}

impl WaitConfig {
    pub fn get_wait_recheck_ms(&self) -> u64 {
        self.wait_recheck_ms
            .unwrap_or_else(super::default_wait_recheck_ms)
    }

    pub fn get_wait_recheck(&self) -> Duration {
        Duration::from_millis(self.get_wait_recheck_ms())
    }

    pub fn get_grace_spin_limit(&self) -> u32 {
        self.grace_spin_limit
            .unwrap_or_else(super::default_grace_spin_limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    /// Free bindings kept around for reuse before they are released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_cache_limit: Option<usize>,
}

impl RegistryConfig {
    pub fn get_binding_cache_limit(&self) -> usize {
        self.binding_cache_limit
            .unwrap_or_else(super::default_binding_cache_limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StressConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycles: Option<usize>,
}

impl StressConfig {
    pub fn get_threads(&self) -> usize {
        self.threads.unwrap_or_else(super::default_stress_threads)
    }

    pub fn get_iterations(&self) -> usize {
        self.iterations
            .unwrap_or_else(super::default_stress_iterations)
    }

    pub fn get_cycles(&self) -> usize {
        self.cycles.unwrap_or_else(super::default_stress_cycles)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub stress: StressConfig,
}

pub fn validate_config(config: &Config) -> Result<()> {
    let recheck_ms = config.wait.get_wait_recheck_ms();

    if recheck_ms < MIN_WAIT_RECHECK_MS {
        return Err(FstransError::Config(format!(
            "wait_recheck_ms must be at least {}ms",
            MIN_WAIT_RECHECK_MS
        )));
    }

    if recheck_ms > MAX_WAIT_RECHECK_MS {
        tracing::warn!(
            "wait_recheck_ms ({}) is above recommended maximum of {}ms. \
             Missed wakeups will take a long time to recover.",
            recheck_ms,
            MAX_WAIT_RECHECK_MS
        );
    }

    if config.stress.get_threads() == 0 {
        return Err(FstransError::Config(
            "stress.threads must be at least 1".to_string(),
        ));
    }

    Ok(())
}
