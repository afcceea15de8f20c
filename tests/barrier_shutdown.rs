use startstop::{CompletionToken, JoinBarrier, Latch, Lifecycle, Running, SetupFn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// A background worker in the shape the coordinator expects: watches both
/// tokens (kill first), cleans up, counts itself out of the barrier.
fn spawn_worker(running: &Running, token: CompletionToken, cleanups: Arc<AtomicUsize>) {
    let graceful = running.graceful.clone();
    let kill = running.kill.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = kill.cancelled() => {}
            _ = graceful.cancelled() => {
                cleanups.fetch_add(1, Ordering::SeqCst);
            }
        }

        token.complete();
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn three_workers_wind_down_and_a_fresh_start_succeeds() {
    let lifecycle = Lifecycle::new(None);
    let parent = CancellationToken::new();

    let barrier = JoinBarrier::new(3);
    let cleanups = Arc::new(AtomicUsize::new(0));

    let setup_ran = Arc::new(AtomicUsize::new(0));
    let setup: SetupFn = {
        let setup_ran = setup_ran.clone();
        Box::new(move || {
            setup_ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };

    let running = lifecycle
        .start(&parent, barrier.gate(), None, Some(setup))
        .await
        .unwrap();
    assert_eq!(setup_ran.load(Ordering::SeqCst), 1);

    for _ in 0..3 {
        spawn_worker(&running, barrier.token(), cleanups.clone());
    }

    // One and two completions are not enough; only the third opens the gate
    assert!(!barrier.gate().is_open());

    // Graceful close: every worker gets to clean up, then the run stops
    lifecycle.close().await;

    assert_eq!(cleanups.load(Ordering::SeqCst), 3);
    assert!(barrier.gate().is_open());
    assert!(running.done.is_open());
    assert!(!lifecycle.is_running());

    // A fresh start succeeds, with a done gate distinct from the first run's
    let completion = Latch::new();
    let second = lifecycle
        .start(&parent, completion.gate(), None, None)
        .await
        .expect("fresh start after a completed run must succeed");

    assert!(running.done.is_open());
    assert!(!second.done.is_open());

    completion.release();
    second.done.opened().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn killed_workers_skip_cleanup_but_still_complete_the_barrier() {
    let lifecycle = Lifecycle::new(None);
    let parent = CancellationToken::new();

    let barrier = JoinBarrier::new(3);
    let cleanups = Arc::new(AtomicUsize::new(0));

    let running = lifecycle
        .start(&parent, barrier.gate(), None, None)
        .await
        .unwrap();

    for _ in 0..3 {
        spawn_worker(&running, barrier.token(), cleanups.clone());
    }

    lifecycle.kill().await;

    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
    assert!(running.done.is_open());
    assert!(!lifecycle.is_running());
}
