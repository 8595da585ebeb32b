use thiserror::Error;

/// Errors raised by the instantiation and scheduling core.
///
/// Only two categories are expected during a normal run and are
/// swallowed-and-logged by the batch drivers: [`CoreError::Skip`] and
/// [`CoreError::Construction`]. Everything else propagates to the caller.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid test or fixture declaration: bad scope, fixture name
    /// conflicts, re-declared fixture, constructing an abstract test.
    /// Fatal to that one class's registration.
    #[error("registration error: {0}")]
    Registration(String),

    /// The test requested to be skipped during construction. Expected and
    /// non-fatal; logged at warning level and the instance is dropped.
    #[error("test skipped: {0}")]
    Skip(String),

    /// Any other failure during instance construction. Non-fatal; logged
    /// and the instance is dropped while the batch continues.
    #[error("construction failed: {0}")]
    Construction(String),

    /// Structurally broken test setup: undefined valid_systems or
    /// valid_prog_environs, out-of-range fixture index, fixture dependency
    /// cycle. Fatal, surfaced to the caller immediately.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed version string or compatibility expression. Fatal at
    /// validator construction time.
    #[error("invalid version: {0}")]
    VersionFormat(String),
}

impl CoreError {
    /// Whether this error belongs to one of the two expected categories
    /// that the instantiation drivers log and drop instead of propagating.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Skip(_) | Self::Construction(_))
    }
}
