pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

fn default_wait_recheck_ms() -> u64 {
    100
}

fn default_grace_spin_limit() -> u32 {
    64
}

fn default_binding_cache_limit() -> usize {
    64
}

fn default_stress_threads() -> usize {
    4
}

fn default_stress_iterations() -> usize {
    1000
}

fn default_stress_cycles() -> usize {
    10
}
