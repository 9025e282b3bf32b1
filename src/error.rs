use thiserror::Error;

/// Errors surfaced by the matching core.
///
/// Expected no-result outcomes (no block for an assignment, no acceptable
/// spatial or temporal candidate) are `Option::None` at the component
/// boundaries, never errors. Only genuine invariant violations and bad
/// configuration become an `Err`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A programming error inside the orchestrator call contract, e.g.
    /// running the continuing-match path for a vehicle that is not
    /// predictable. Never caused by feed data.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Failed to read config file: {0}")]
    ConfigRead(String),
    #[error("Failed to parse config: {0}")]
    ConfigParse(String),
}
