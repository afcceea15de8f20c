use crate::error::{BoxError, StartError};
use crate::notify::{ClosePolicy, notify};
use crate::signal::{Gate, Latch};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Grace period granted to a run between graceful cancellation and forced
/// kill, unless a [`KillTimeoutProvider`] says otherwise.
pub const KILL_TIMEOUT_DEFAULT: Duration = Duration::from_millis(100);

/// Policy function that maps the kill token of the current run to the grace
/// period it is granted.
///
/// Invoked lazily, once per run, at the moment graceful cancellation is first
/// observed (never at start time), so dynamic policies such as "whatever is
/// left until the hard deadline" work naturally.
pub type KillTimeoutProvider = Arc<dyn Fn(&CancellationToken) -> Duration + Send + Sync>;

/// Fallible setup hook executed by [`Lifecycle::start`] inside its critical
/// section. Must be fast and must not call back into the coordinator.
pub type SetupFn = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// Coordinates the lifecycle of one long-running service: at most one active
/// run at a time, two-phase shutdown (graceful, then kill), and deterministic
/// completion signaling back to every interested caller.
///
/// ## Protocol
///
/// - [`start`](Lifecycle::start) a run, handing over a completion [`Gate`]
///   (typically from a [`JoinBarrier`](crate::JoinBarrier) sized to the
///   number of background tasks about to be launched). It returns the
///   [`Running`] handles: a graceful token, a kill token, and a done gate.
/// - Background tasks watch the two tokens to know when to wind down,
///   prioritizing the kill token, and count themselves out of the barrier on
///   exit.
/// - [`close`](Lifecycle::close) (or [`kill`](Lifecycle::kill)) requests
///   shutdown and waits for the done gate. Once the graceful token is
///   cancelled, the kill token follows automatically after the grace period.
///
/// The coordinator itself never decides that the service has stopped: only
/// the closure of the caller-supplied completion gate flips it back to "not
/// running". It makes no assumption about how many tasks a run consists of or
/// how long their cleanup takes.
///
/// Cloning produces another handle on the same coordinator. All state lives
/// behind one internal lock, so concurrent calls from any number of tasks
/// are linearized.
#[derive(Clone, Default)]
pub struct Lifecycle {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    // First init call wins; start falls back to the default provider if it
    // beats every init.
    kill_timeout: OnceLock<KillTimeoutProvider>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// `Some` exactly while a run is active. Released and cleared only by the
    /// run's watcher task, never by a stop request.
    done: Option<Latch>,
    /// Most recent run's tokens. Stale (cancelled) once the run ends; absent
    /// before the first run.
    graceful: Option<CancellationToken>,
    kill: Option<CancellationToken>,
}

/// Handles of an active run, returned by [`Lifecycle::start`].
#[derive(Debug, Clone)]
pub struct Running {
    /// Cancelled when graceful shutdown begins.
    pub graceful: CancellationToken,
    /// Cancelled when the run must terminate immediately; follows the
    /// graceful token automatically after the grace period.
    pub kill: CancellationToken,
    /// Opens once the run has fully stopped and the coordinator is ready for
    /// the next [`start`](Lifecycle::start).
    pub done: Gate,
}

impl Lifecycle {
    /// Returns an initialized coordinator. `kill_timeout` overrides the
    /// [default](KILL_TIMEOUT_DEFAULT) grace-period policy for every run of
    /// this instance.
    pub fn new(kill_timeout: Option<KillTimeoutProvider>) -> Self {
        let lifecycle = Self::default();
        lifecycle.init(kill_timeout);

        lifecycle
    }

    /// Initializes this coordinator: fixes the grace-period policy (the
    /// [default](KILL_TIMEOUT_DEFAULT) one, if `None` is given).
    ///
    /// Exactly-once, first caller wins: concurrent and repeated calls are
    /// safe, and only the winning call has any effect. Returns whether this
    /// call was the winner.
    pub fn init(&self, kill_timeout: Option<KillTimeoutProvider>) -> bool {
        let provider = kill_timeout.unwrap_or_else(default_kill_timeout_provider);

        self.shared.kill_timeout.set(provider).is_ok()
    }

    /// [`init`](Lifecycle::init) plus a report of the (never-failing) outcome
    /// on the optional `outcome` channel with [`ClosePolicy::OnError`]: the
    /// channel stays open and untouched, available for the subsequent
    /// [`start`](Lifecycle::start) outcome. The sender is handed back for
    /// exactly that purpose.
    ///
    /// Intended for services that lazily initialize a default-constructed
    /// coordinator on their own start path.
    pub async fn init_notify<E>(
        &self,
        outcome: Option<mpsc::Sender<E>>,
        kill_timeout: Option<KillTimeoutProvider>,
    ) -> Option<mpsc::Sender<E>> {
        self.init(kill_timeout);

        notify(outcome, None, ClosePolicy::OnError).await
    }

    /// Starts a run, unless one is already active.
    ///
    /// - `parent`: the graceful token is derived as its child, so cancelling
    ///   the parent begins graceful shutdown of this run too.
    /// - `completion`: must open exactly once, when all of the run's
    ///   background work has exited; its opening is the one and only trigger
    ///   that flips this coordinator back to "not running".
    /// - `ready`: optional outcome channel, served with
    ///   [`ClosePolicy::Always`] on every branch: at most one [`StartError`],
    ///   then closure.
    /// - `setup`: optional fallible hook, executed inside the critical
    ///   section before any tokens are created. It must be fast, synchronous,
    ///   and must not reenter this coordinator. If it fails, the run does not
    ///   start and the error is propagated verbatim.
    ///
    /// On success, spawns the run's watcher task (waits for `completion`,
    /// then cancels the graceful token for hygiene, opens the done gate and
    /// resets state) and returns the [`Running`] handles.
    ///
    /// Concurrent calls are linearized: exactly one wins per stopped period,
    /// the rest fail with [`StartError::AlreadyStarted`] and leave the active
    /// run untouched.
    pub async fn start(
        &self,
        parent: &CancellationToken,
        completion: Gate,
        ready: Option<mpsc::Sender<StartError>>,
        setup: Option<SetupFn>,
    ) -> Result<Running, StartError> {
        let outcome = self.try_start(parent, completion, setup);

        let reported = match &outcome {
            Ok(_) => None,
            Err(error) => Some(error.clone()),
        };
        notify(ready, reported, ClosePolicy::Always).await;

        outcome
    }

    /// The locked portion of [`start`](Lifecycle::start), plus spawning of
    /// the per-run tasks once the lock is released.
    fn try_start(
        &self,
        parent: &CancellationToken,
        completion: Gate,
        setup: Option<SetupFn>,
    ) -> Result<Running, StartError> {
        let mut state = self.shared.state.lock();

        if state.done.is_some() {
            return Err(StartError::AlreadyStarted);
        }

        if let Some(setup) = setup {
            setup().map_err(StartError::setup)?;
        }

        let graceful = parent.child_token();
        let kill = CancellationToken::new();
        let done = Latch::new();

        state.graceful = Some(graceful.clone());
        state.kill = Some(kill.clone());
        state.done = Some(done.clone());

        drop(state);

        self.arm_escalation(graceful.clone(), kill.clone());
        self.spawn_watcher(completion, graceful.clone(), done.clone());

        info!("Lifecycle run started");

        Ok(Running {
            graceful,
            kill,
            done: done.gate(),
        })
    }

    /// Spawns the task that escalates graceful cancellation into a kill.
    ///
    /// The timer is armed only once graceful cancellation is observed, and
    /// its duration is computed at that moment. An explicit kill preempts the
    /// timer.
    fn arm_escalation(&self, graceful: CancellationToken, kill: CancellationToken) {
        let provider = self.kill_timeout_provider();

        tokio::spawn(async move {
            graceful.cancelled().await;

            let grace_period = provider(&kill);

            tokio::select! {
                _ = kill.cancelled() => {}
                _ = tokio::time::sleep(grace_period) => {
                    debug!(?grace_period, "Grace period elapsed; cancelling the kill token");
                    kill.cancel();
                }
            }
        });
    }

    /// Spawns the task that performs the one and only Running → Stopped
    /// transition, triggered solely by the completion gate.
    fn spawn_watcher(&self, completion: Gate, graceful: CancellationToken, done: Latch) {
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            completion.opened().await;

            // The run is over whether or not anyone asked it to stop; cancel
            // the graceful token so it cannot leak an un-resolved child.
            graceful.cancel();

            {
                let mut state = shared.state.lock();
                state.done = None;
            }

            // Released strictly after the state reset, so that a waiter
            // unblocked here may immediately start again.
            done.release();

            info!("Lifecycle run stopped");
        });
    }

    /// Returns the done gate of the current run, or the pre-opened sentinel
    /// whenever no run is active. Always safe to await, including before the
    /// first [`start`](Lifecycle::start).
    pub fn done(&self) -> Gate {
        let state = self.shared.state.lock();

        match &state.done {
            Some(done) => done.gate(),
            None => Gate::open(),
        }
    }

    /// Reports whether a run is active as of this moment.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().done.is_some()
    }

    /// The most recent run's graceful token: `None` before the first run,
    /// stale (cancelled) after a run ends. When precise timing matters, use
    /// the [`Running`] handles returned by [`start`](Lifecycle::start)
    /// instead.
    pub fn graceful_token(&self) -> Option<CancellationToken> {
        self.shared.state.lock().graceful.clone()
    }

    /// The most recent run's kill token; same caveats as
    /// [`graceful_token`](Lifecycle::graceful_token).
    pub fn kill_token(&self) -> Option<CancellationToken> {
        self.shared.state.lock().kill.clone()
    }

    /// Requests graceful shutdown of the current run and returns without
    /// waiting. Safe no-op when no run is active.
    pub fn close_async(&self) {
        if let Some(graceful) = self.graceful_token() {
            info!("Graceful shutdown requested");

            graceful.cancel();
        }
    }

    /// Requests immediate termination of the current run, skipping the grace
    /// period, and returns without waiting. Safe no-op when no run is active.
    pub fn kill_async(&self) {
        let (graceful, kill) = {
            let state = self.shared.state.lock();
            (state.graceful.clone(), state.kill.clone())
        };

        if graceful.is_some() || kill.is_some() {
            info!("Immediate shutdown requested");
        }

        if let Some(graceful) = graceful {
            graceful.cancel();
        }
        if let Some(kill) = kill {
            kill.cancel();
        }
    }

    /// Requests graceful shutdown and waits for the run to fully stop.
    /// Returns immediately when no run is active.
    pub async fn close(&self) {
        let done = self.done();

        self.close_async();

        done.opened().await;
    }

    /// Requests immediate termination and waits for the run to fully stop.
    /// Returns immediately when no run is active.
    pub async fn kill(&self) {
        let done = self.done();

        self.kill_async();

        done.opened().await;
    }

    /// The configured grace-period policy, falling back to (and fixing) the
    /// default one if no [`init`](Lifecycle::init) has happened yet.
    fn kill_timeout_provider(&self) -> KillTimeoutProvider {
        self.shared
            .kill_timeout
            .get_or_init(default_kill_timeout_provider)
            .clone()
    }
}

fn default_kill_timeout_provider() -> KillTimeoutProvider {
    Arc::new(|_: &CancellationToken| KILL_TIMEOUT_DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn init_first_caller_wins() {
        let lifecycle = Lifecycle::default();

        let custom: KillTimeoutProvider = Arc::new(|_| Duration::from_secs(7));
        assert!(lifecycle.init(Some(custom)));
        assert!(!lifecycle.init(None));

        let provider = lifecycle.kill_timeout_provider();
        assert_eq!(provider(&CancellationToken::new()), Duration::from_secs(7));
    }

    #[test]
    fn default_provider_is_fixed_constant() {
        let lifecycle = Lifecycle::new(None);

        let provider = lifecycle.kill_timeout_provider();
        assert_eq!(provider(&CancellationToken::new()), KILL_TIMEOUT_DEFAULT);
    }

    #[tokio::test]
    async fn stopped_coordinator_reports_open_done_gate() {
        let lifecycle = Lifecycle::new(None);

        assert!(!lifecycle.is_running());
        assert!(lifecycle.done().is_open());
        assert!(lifecycle.graceful_token().is_none());
        assert!(lifecycle.kill_token().is_none());

        // All of these are safe no-ops while stopped
        lifecycle.close_async();
        lifecycle.kill_async();
        lifecycle.close().await;
        lifecycle.kill().await;
    }

    #[tokio::test]
    async fn init_notify_hands_the_sender_back() {
        let lifecycle = Lifecycle::default();
        let (sender, mut receiver) = mpsc::channel::<StartError>(1);

        let leftover = lifecycle.init_notify(Some(sender), None).await;

        assert!(leftover.is_some());
        assert!(receiver.try_recv().is_err());
    }
}
