use crate::signal::{Gate, Latch};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// Folds a fixed number of independent "I am done" calls into a single
/// completion signal.
///
/// A barrier is constructed for `participants` background tasks. Each task
/// receives one [`CompletionToken`] and [completes](CompletionToken::complete)
/// it exactly once on exit; when the last token is accounted for, the
/// barrier's [`Latch`] is released and every [`Gate`] derived from it opens.
/// The order and concurrency of the completions do not matter.
///
/// The gate produced by [`JoinBarrier::gate`] is the natural `completion`
/// argument for [`Lifecycle::start`](crate::Lifecycle::start): release of the
/// latch is what tells the coordinator that shutdown has actually finished.
///
/// A token that is dropped without being completed still counts, so a
/// participant that unwinds early cannot stall shutdown. The degenerate
/// single-participant case does not need a barrier at all; a plain [`Latch`]
/// does the same job.
///
/// ## Caller contract
///
/// Mint exactly one token per participant. Minting more tokens than the
/// barrier was sized for violates the contract: the latch would release while
/// some participants are still running, and the surplus completions are
/// ignored with a warning. Minting fewer (or holding a token forever) leaves
/// the latch unreleased and stalls whoever waits on the gate.
#[derive(Debug, Clone)]
pub struct JoinBarrier {
    remaining: Arc<AtomicUsize>,
    latch: Latch,
}

/// A single participant's handle on a [`JoinBarrier`].
///
/// Consumed by [`complete`](CompletionToken::complete), or implicitly by
/// going out of scope: the [`Drop`] implementation completes an outstanding
/// token so that an early return or a panic in the participant still counts
/// it out of the barrier.
#[derive(Debug)]
pub struct CompletionToken {
    barrier: JoinBarrier,
    completed: bool,
}

impl JoinBarrier {
    /// Returns a barrier sized for `participants` tasks, with a fresh
    /// internal [`Latch`].
    ///
    /// A barrier for zero participants releases its latch immediately.
    pub fn new(participants: usize) -> Self {
        Self::with_latch(Latch::new(), participants)
    }

    /// Returns a barrier sized for `participants` tasks that releases the
    /// supplied `latch` instead of allocating its own. Useful when the caller
    /// already holds gates on an existing latch.
    pub fn with_latch(latch: Latch, participants: usize) -> Self {
        if participants == 0 {
            latch.release();
        }

        Self {
            remaining: Arc::new(AtomicUsize::new(participants)),
            latch,
        }
    }

    /// Derives a [`Gate`] that opens once every participant has completed.
    pub fn gate(&self) -> Gate {
        self.latch.gate()
    }

    /// Mints the [`CompletionToken`] for one participant.
    pub fn token(&self) -> CompletionToken {
        CompletionToken {
            barrier: self.clone(),
            completed: false,
        }
    }

    /// Counts one participant out; releases the latch when the count reaches
    /// zero. The count saturates: completions beyond the agreed number are
    /// ignored.
    fn leave(&self) {
        let outcome = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match outcome {
            Ok(1) => self.latch.release(),
            Ok(_) => {}
            Err(_) => warn!("Completion reported to an already-drained join barrier"),
        }
    }
}

impl CompletionToken {
    /// Reports this participant as done, consuming the token.
    pub fn complete(mut self) {
        self.completed = true;
        self.barrier.leave();
    }
}

impl Drop for CompletionToken {
    /// A token dropped without an explicit [`complete`](CompletionToken::complete)
    /// call still counts its participant out.
    fn drop(&mut self) {
        if !self.completed {
            self.barrier.leave();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn releases_only_after_last_completion() {
        let barrier = JoinBarrier::new(3);
        let gate = barrier.gate();

        barrier.token().complete();
        assert!(!gate.is_open());

        barrier.token().complete();
        assert!(!gate.is_open());

        barrier.token().complete();
        assert!(gate.is_open());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_completions() {
        let barrier = JoinBarrier::new(3);
        let gate = barrier.gate();

        for _ in 0..3 {
            let token = barrier.token();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                token.complete();
            });
        }

        gate.opened().await;
        assert!(gate.is_open());
    }

    #[test]
    fn zero_participants_release_immediately() {
        let barrier = JoinBarrier::new(0);

        assert!(barrier.gate().is_open());
    }

    #[test]
    fn dropped_token_counts() {
        let barrier = JoinBarrier::new(2);
        let gate = barrier.gate();

        barrier.token().complete();
        assert!(!gate.is_open());

        drop(barrier.token());
        assert!(gate.is_open());
    }

    #[test]
    fn surplus_completions_are_ignored() {
        let barrier = JoinBarrier::new(1);
        let gate = barrier.gate();

        barrier.token().complete();
        barrier.token().complete();

        assert!(gate.is_open());
        assert_eq!(barrier.remaining.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn folds_into_existing_latch() {
        let latch = Latch::new();
        let gate = latch.gate();
        let barrier = JoinBarrier::with_latch(latch, 1);

        assert!(!gate.is_open());
        barrier.token().complete();
        assert!(gate.is_open());
    }
}
