//! Error types for the core primitives.

use crate::lifecycle::LifecycleState;

/// A client-supplied stored name that cannot be mapped to a storage path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("Malformed artifact identifier")]
    MalformedIdentifier,
}

/// A bitrate string outside the accepted `<kbps>k` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitrateError {
    #[error("Bitrate must look like '192k', got '{0}'")]
    Format(String),

    #[error("Bitrate {kbps}k is outside the supported range ({min}k-{max}k)")]
    OutOfRange { kbps: u32, min: u32, max: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Illegal lifecycle transition: {from} -> {to}")]
    IllegalTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}
