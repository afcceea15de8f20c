use tokio_util::sync::CancellationToken;

/// The releasing half of a one-shot completion signal.
///
/// A [`Latch`] starts unreleased and can be [released](Latch::release) exactly
/// once, at which point every associated [`Gate`] opens permanently. Repeated
/// releases have no additional effect.
///
/// Clones of a latch all refer to the same underlying signal, so a latch may
/// be handed to whichever task ends up being responsible for announcing
/// completion.
///
/// ```
/// use startstop::Latch;
///
/// # tokio_test::block_on(async {
/// let latch = Latch::new();
/// let gate = latch.gate();
///
/// tokio::spawn(async move {
///     // ... finish some work ...
///     latch.release();
/// });
///
/// gate.opened().await;
/// # })
/// ```
#[derive(Debug, Default, Clone)]
pub struct Latch {
    token: CancellationToken,
}

/// The waiting half of a one-shot completion signal.
///
/// A gate is derived from a [`Latch`] (or pre-opened via [`Gate::open`]) and
/// can be cheaply cloned and awaited by any number of tasks. Once the latch is
/// released, every [`opened`](Gate::opened) call resolves immediately, forever.
#[derive(Debug, Clone)]
pub struct Gate {
    token: CancellationToken,
}

impl Latch {
    /// Returns a fresh, unreleased [`Latch`].
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derives a [`Gate`] tied to this latch. Any number of gates may be
    /// derived, before or after the latch is released.
    pub fn gate(&self) -> Gate {
        Gate {
            token: self.token.clone(),
        }
    }

    /// Releases this latch, opening every associated [`Gate`]. Idempotent.
    pub fn release(&self) {
        self.token.cancel();
    }

    /// Reports whether this latch has already been released.
    pub fn is_released(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Gate {
    /// Returns a gate that is already open.
    ///
    /// This is the sentinel handed out for "nothing to wait for": awaiting it
    /// never blocks. The lifecycle coordinator returns it from
    /// [`done`](crate::Lifecycle::done) whenever no run is active.
    pub fn open() -> Self {
        let token = CancellationToken::new();
        token.cancel();

        Self { token }
    }

    /// Waits until the associated [`Latch`] is released. Resolves immediately
    /// if it already has been (or if this gate was created
    /// [pre-opened](Gate::open)).
    pub async fn opened(&self) {
        self.token.cancelled().await;
    }

    /// Reports whether the associated [`Latch`] has been released as of this
    /// moment. Not suitable for waiting; for that, use [`Gate::opened`].
    pub fn is_open(&self) -> bool {
        self.token.is_cancelled()
    }
}
