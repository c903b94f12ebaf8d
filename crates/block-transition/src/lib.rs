//! Block state transition.
//!
//! Applies an ordered batch of transactions to a pre-state under a block environment and a
//! chain configuration, and produces the post-state, the block body and an
//! [`ExecutionResult`]: state, transaction and receipt roots, logs bloom, gas used, receipts,
//! rejected transactions and, from Prague on, the EIP-7685 requests.
//!
//! The EVM and the state storage are collaborators behind the [`BlockEvm`] and [`StateDb`]
//! traits. [`run`] wires the full pipeline: signing, environment validation, pre-state
//! construction and execution.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod constants;
pub mod io;

mod config;
pub use config::*;

mod rules;
pub use rules::*;

mod env;
pub use env::*;

mod prestate;
pub use prestate::*;

mod state;
pub use state::*;

mod signer;
pub use signer::*;

mod source;
pub use source::*;

mod evm;
pub use evm::*;

mod requests;
pub use requests::*;

mod result;
pub use result::*;

mod transition;
pub use transition::*;

mod error;
pub use error::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
