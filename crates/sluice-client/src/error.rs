// Conditions that end a pull session abnormally.
use sluice_transport::TransportError;

/// Error surfaced through a pull session.
///
/// An empty batch is not an error: a pull that times out with nothing to
/// deliver simply ends.
///
/// ```
/// use sluice_client::PullError;
/// use sluice_transport::TransportError;
///
/// assert!(matches!(PullError::from(TransportError::Closed), PullError::Disconnected));
/// assert!(PullError::HeartbeatMissed.is_session_only());
/// ```
#[derive(thiserror::Error, Debug)]
pub enum PullError {
    #[error("no heartbeat from server for two consecutive intervals")]
    HeartbeatMissed,
    #[error("consumer deleted")]
    ConsumerDeleted,
    #[error("pull ended with status {code}: {description}")]
    Status { code: u16, description: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed")]
    Disconnected,
    #[error("transport error")]
    Transport(#[source] TransportError),
    #[error("wire error")]
    Wire(#[from] sluice_wire::Error),
}

impl PullError {
    /// True when the consumer itself is still usable and a new pull may succeed.
    pub fn is_session_only(&self) -> bool {
        matches!(
            self,
            PullError::HeartbeatMissed | PullError::Status { .. } | PullError::Protocol(_)
        )
    }
}

impl From<TransportError> for PullError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => PullError::Disconnected,
            other => PullError::Transport(other),
        }
    }
}
