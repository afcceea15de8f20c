use std::sync::Arc;
use thiserror::Error;

/// Boxed error type accepted from caller-supplied setup functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Represents the ways in which [`Lifecycle::start`](crate::Lifecycle::start)
/// may fail.
///
/// Both variants are local and recoverable: nothing is leaked, the
/// coordinator remains stopped (or keeps its active run untouched), and the
/// caller is free to retry later.
#[derive(Error, Debug, Clone)]
pub enum StartError {
    /// A run is already active on this coordinator; at most one run may be
    /// active at a time.
    #[error("lifecycle is already running")]
    AlreadyStarted,

    /// The caller-supplied setup function failed; the run was not started.
    #[error("lifecycle setup failed")]
    Setup(#[source] Arc<dyn std::error::Error + Send + Sync>),
}

impl StartError {
    /// Internal constructor wrapping a setup failure. The `Arc` keeps the
    /// error cloneable, so the same failure can be both returned and
    /// delivered on the outcome channel.
    pub(crate) fn setup(error: BoxError) -> Self {
        Self::Setup(Arc::from(error))
    }

    /// Stable string code for this error, for matching on category across
    /// boxed abstraction boundaries without identity comparison.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyStarted => "STARTSTOP_ERR_ALREADY_STARTED",
            Self::Setup(_) => "STARTSTOP_ERR_SETUP",
        }
    }
}
