use tokio::sync::mpsc;

/// Governs whether [`notify`] closes the outcome channel after delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Close the channel only if an error was delivered. On the success path
    /// the sender is handed back open, for callers that announce success via
    /// a separate, later event.
    OnError,
    /// Close the channel unconditionally: the receiver observes exactly zero
    /// or one error, then closure.
    Always,
}

/// Delivers at most one error to an opt-in outcome channel and applies the
/// close policy.
///
/// - With no `outcome` sender, this is a no-op (the caller opted out of
///   being notified).
/// - With an error, performs one `send` and awaits it: the channel must be
///   buffered or actively received from, or the notifying task parks here. A
///   receiver that has gone away is tolerated silently.
/// - "Closing" maps to dropping the sender; the receiver observes it as the
///   end of the stream once every other clone of the sender is gone too.
///
/// Returns the sender when the policy leaves the channel open
/// ([`ClosePolicy::OnError`] with no error), `None` otherwise.
pub async fn notify<E>(
    outcome: Option<mpsc::Sender<E>>,
    error: Option<E>,
    policy: ClosePolicy,
) -> Option<mpsc::Sender<E>> {
    let Some(sender) = outcome else {
        return None;
    };

    let delivered = match error {
        Some(error) => {
            let _ = sender.send(error).await;
            true
        }
        None => false,
    };

    if delivered || policy == ClosePolicy::Always {
        drop(sender);
        return None;
    }

    Some(sender)
}
