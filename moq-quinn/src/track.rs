use tokio_util::sync::CancellationToken;

/// The cancellation scope owning every group of one subscription.
///
/// Cancelling it aborts all live group writers and readers of the track;
/// they observe it through their own derived scopes, so a group that already
/// finished is unaffected.
#[derive(Clone, Default)]
pub struct TrackContext {
    token: CancellationToken,
}

impl TrackContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}
