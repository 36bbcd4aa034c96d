use thiserror::Error;

use crate::core::types::MembraneId;
use crate::tunnel::TunnelKind;

#[derive(Error, Debug)]
pub enum PsimError {
    /// A rule's result references a bound-variable quantity that no consuming
    /// condition of the same rule establishes. A model-definition bug, never
    /// retried.
    #[error("unpredictable dimension: rule '{rule}' on membrane '{membrane}' uses variable '{variable}' without a consuming binding")]
    UnpredictableDimension {
        membrane: String,
        rule: String,
        variable: String,
    },

    /// A rule needs a tunnel of the given kind (and optionally target name)
    /// that does not exist on the membrane at fetch time.
    #[error("tunnel not found on membrane '{membrane}': {kind:?} -> {target:?}")]
    TunnelNotFound {
        membrane: String,
        kind: TunnelKind,
        target: Option<String>,
    },

    /// A membrane could not be deep-cloned when division required it.
    #[error("clone failure on membrane '{membrane}': {reason}")]
    CloneFailure { membrane: String, reason: String },

    #[error("membrane not found: {0:?}")]
    MembraneNotFound(MembraneId),

    #[error("membrane {0:?} is deleted")]
    MembraneDeleted(MembraneId),

    #[error("unknown membrane class: {0}")]
    UnknownMembraneClass(String),

    #[error("invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PsimError>;
