use futures_util::future::select_all;
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation signal.
///
/// A token observes its own flag plus the flags of every ancestor it was
/// derived from with [`CancelToken::child`]. Cancelling a child never affects
/// its parent; cancelling a parent is seen by all of its descendants.
#[derive(Debug, Clone)]
pub struct CancelToken {
    own: Arc<watch::Sender<bool>>,
    observed: Vec<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Create a fresh, uncancelled root token.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            own: Arc::new(tx),
            observed: vec![rx],
        }
    }

    /// Derive a token that is cancelled together with `self`, but that can
    /// also be cancelled on its own.
    pub fn child(&self) -> Self {
        let (tx, rx) = watch::channel(false);
        let mut observed = Vec::with_capacity(self.observed.len() + 1);
        observed.push(rx);
        observed.extend(self.observed.iter().cloned());
        Self {
            own: Arc::new(tx),
            observed,
        }
    }

    /// Signal cancellation to this token and its descendants.
    pub fn cancel(&self) {
        self.own.send_replace(true);
    }

    /// Whether this token or any ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.observed.iter().any(|rx| *rx.borrow())
    }

    /// Resolve once this token or any ancestor is cancelled.
    pub async fn cancelled(&self) {
        let waits = self
            .observed
            .iter()
            .cloned()
            .map(|rx| Box::pin(wait_for_flag(rx)));
        select_all(waits).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_flag(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without cancelling: this flag can never fire.
            std::future::pending::<()>().await;
        }
    }
}
