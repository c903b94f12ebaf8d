//! Test utilities for the block transition.

mod evm;
mod keys;

pub use evm::*;
pub use keys::*;

/// Installs a `tracing` subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
