#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// One-shot completion signal.
mod signal;
pub use self::signal::{Gate, Latch};

/// Join barrier over N participants.
mod barrier;
pub use self::barrier::{CompletionToken, JoinBarrier};

/// Policy-driven one-shot outcome notification.
mod notify;
pub use self::notify::{ClosePolicy, notify};

/// Error taxonomy.
mod error;
pub use self::error::{BoxError, StartError};

/// The lifecycle coordinator itself.
mod lifecycle;
pub use self::lifecycle::{
    KILL_TIMEOUT_DEFAULT, KillTimeoutProvider, Lifecycle, Running, SetupFn,
};
