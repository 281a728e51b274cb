use derive_more::{Display, Error};

/// Errors reported by the pacer engine.
///
/// All of these are recoverable: the caller keeps its previous state and
/// the tick loop carries on.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum PacerError {
    /// A proposed configuration value is outside its valid range.
    #[display("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
    /// A lane's frame buffer could not be grown to the requested length.
    #[display("could not allocate {requested} LEDs for lane {lane}")]
    AllocationFailure { lane: usize, requested: usize },
    /// The render driver did not finish within its budget.
    #[display("LED output did not complete within {budget_ms}ms")]
    RenderTimeout { budget_ms: u32 },
    /// The render driver failed outright.
    #[display("LED output failed: {reason}")]
    Render { reason: String },
}

impl PacerError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// Errors from a [`SettingsStore`](crate::store::SettingsStore) backend.
///
/// These are never propagated past [`SharedSettings`](crate::store::SharedSettings);
/// the in-memory settings stay authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum StoreError {
    /// Nothing has been stored yet.
    #[display("no settings stored")]
    NotFound,
    /// The stored blob could not be decoded.
    #[display("stored settings are corrupt: {reason}")]
    Corrupt { reason: String },
    /// The backend failed to read or write.
    #[display("settings storage failed: {reason}")]
    Backend { reason: String },
}
