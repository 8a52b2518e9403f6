//! Fleet deployment orchestrator for Aerospike clusters.
//!
//! The crate is layered leaves-first: [`fanout`] and [`confpatch`] are pure
//! building blocks, [`backend`] holds the provider contract and adapters,
//! [`template`] caches installer images on top of a backend, and
//! [`services`] drives whole operations (cluster create/grow, XDR wiring,
//! mesh repair, lifecycle).

pub mod backend;
pub mod confpatch;
pub mod error;
pub mod fanout;
pub mod features;
pub mod installer;
pub mod scripts;
pub mod services;
pub mod shutdown;
pub mod template;
pub mod types;

pub use error::{DeployError, NodeFailure};
pub use types::*;
