//! Error taxonomy for orchestration operations

use thiserror::Error;

use crate::confpatch::PatchError;
use crate::types::NodeId;

/// A single node's failure inside a fan-out step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: NodeId,
    pub error: String,
}

/// Main error type for orchestration operations
///
/// Only the services layer classifies errors into these variants. Adapters
/// return `anyhow::Error`, which lands in [`DeployError::Backend`] when it
/// escapes outside of a classified step.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeployError {
    /// Bad input detected before any mutating call
    #[error("validation error: {0}")]
    Validation(String),

    /// Version or installer could not be resolved
    #[error("template resolution error: {0}")]
    Resolution(String),

    /// Template build or cluster deployment failed
    #[error("provisioning error: {0}")]
    Provisioning(String),

    /// One or more nodes failed during a fan-out step
    #[error("{step}: some nodes returned errors: {}", summarize(.failures))]
    Distribution {
        step: String,
        failures: Vec<NodeFailure>,
    },

    /// Config text could not be patched
    #[error("config patch error: {0}")]
    Patch(#[from] PatchError),

    /// Optional capability not offered by the selected backend
    #[error("operation '{operation}' is not supported by the {provider} backend")]
    Unsupported { provider: String, operation: String },

    /// Unclassified backend failure
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl DeployError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn provisioning(msg: impl Into<String>) -> Self {
        Self::Provisioning(msg.into())
    }

    pub fn unsupported(provider: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            provider: provider.into(),
            operation: operation.into(),
        }
    }

    pub fn distribution(step: impl Into<String>, failures: Vec<NodeFailure>) -> Self {
        Self::Distribution {
            step: step.into(),
            failures,
        }
    }

    /// Nodes that failed, if this is a distribution error
    pub fn failed_nodes(&self) -> Vec<NodeId> {
        match self {
            Self::Distribution { failures, .. } => failures.iter().map(|f| f.node).collect(),
            _ => Vec::new(),
        }
    }
}

fn summarize(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("node {}: {}", f.node, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
