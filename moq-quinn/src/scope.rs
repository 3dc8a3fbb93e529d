use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use moq_proto::StreamErrorCode;

/// Where a group stream is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeState {
    Open,
    /// Gracefully finished; further operations are no-ops.
    Closed,
    /// Terminated with an error code, our own or inherited from the parent.
    Cancelled(StreamErrorCode),
}

/// One level of the cancellation tree: a child token of the owning track plus
/// a write-once cause.
///
/// The token already propagates parent cancellation to every child, so there
/// is no watcher task to arm or leak; a child that terminates first simply
/// never observes the parent.
#[derive(Clone)]
pub(crate) struct Scope {
    token: CancellationToken,

    /// `Some(None)` once closed cleanly, `Some(Some(code))` once cancelled.
    cause: Arc<OnceLock<Option<StreamErrorCode>>>,

    /// The cause reported when the parent cancelled us before anyone recorded
    /// an explicit one.
    inherited: StreamErrorCode,
}

impl Scope {
    pub fn child(parent: &CancellationToken, inherited: StreamErrorCode) -> Self {
        Self {
            token: parent.child_token(),
            cause: Default::default(),
            inherited,
        }
    }

    /// Record the terminal transition: `None` for a clean close, `Some(code)`
    /// for a cancel. Only the first caller wins; the return value says
    /// whether this call performed the transition, which gates the single
    /// allowed touch of the transport stream.
    pub fn close(&self, cause: Option<StreamErrorCode>) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        if self.cause.set(cause).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn state(&self) -> ScopeState {
        match self.cause.get() {
            Some(None) => ScopeState::Closed,
            Some(Some(code)) => ScopeState::Cancelled(*code),
            None if self.token.is_cancelled() => ScopeState::Cancelled(self.inherited),
            None => ScopeState::Open,
        }
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_cause_wins() {
        let parent = CancellationToken::new();
        let scope = Scope::child(&parent, StreamErrorCode::SUBSCRIBE_CANCELED);

        assert_eq!(scope.state(), ScopeState::Open);
        assert!(scope.close(Some(StreamErrorCode::EXPIRED_GROUP)));
        assert!(!scope.close(Some(StreamErrorCode::INTERNAL_ERROR)));
        assert!(!scope.close(None));
        assert_eq!(
            scope.state(),
            ScopeState::Cancelled(StreamErrorCode::EXPIRED_GROUP)
        );
    }

    #[test]
    fn parent_cancel_inherits_cause() {
        let parent = CancellationToken::new();
        let scope = Scope::child(&parent, StreamErrorCode::PUBLISH_ABORTED);

        parent.cancel();
        assert_eq!(
            scope.state(),
            ScopeState::Cancelled(StreamErrorCode::PUBLISH_ABORTED)
        );

        // An explicit cancel after the parent already fired loses.
        assert!(!scope.close(Some(StreamErrorCode::INTERNAL_ERROR)));
        assert_eq!(
            scope.state(),
            ScopeState::Cancelled(StreamErrorCode::PUBLISH_ABORTED)
        );
    }

    #[test]
    fn close_is_terminal() {
        let parent = CancellationToken::new();
        let scope = Scope::child(&parent, StreamErrorCode::SUBSCRIBE_CANCELED);

        assert!(scope.close(None));
        assert_eq!(scope.state(), ScopeState::Closed);

        // A later parent cancel doesn't resurrect the scope.
        parent.cancel();
        assert_eq!(scope.state(), ScopeState::Closed);
    }
}
