use tokio::sync::watch;

/// The handle through which an external party aborts a round.
#[derive(Debug)]
pub struct AbortHandle(watch::Sender<bool>);

/// The abort signal checked by the round.
#[derive(Debug, Clone)]
pub struct AbortSignal(watch::Receiver<bool>);

/// Creates a connected abort handle and signal.
pub fn abort_channel() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle(tx), AbortSignal(rx))
}

impl AbortHandle {
    /// Aborts the round at its next poll boundary.
    pub fn abort(&self) {
        // the round may already be over
        let _ = self.0.send(true);
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.0.borrow()
    }
}
