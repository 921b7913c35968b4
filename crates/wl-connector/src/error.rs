use thiserror::Error;

/// Everything a connector operation can fail with.
///
/// None of these are retried by the connector itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("a wallet session is already connected")]
    AlreadyConnected,

    #[error("no wallet session is connected")]
    NoSession,

    #[error("request expired before submission: valid until {valid_until}, now {now}")]
    Expired { valid_until: u64, now: u64 },

    #[error("request {request_id} timed out waiting for the wallet")]
    Timeout { request_id: String },

    #[error("wallet declined the request: {message}")]
    UserRejected { message: String },

    #[error("bridge error: {message}")]
    Remote { code: Option<u32>, message: String },

    #[error("wallet session was disconnected")]
    Disconnected,
}

impl ConnectError {
    pub fn remote(err: anyhow::Error) -> Self {
        ConnectError::Remote {
            code: None,
            message: format!("{err:#}"),
        }
    }
}
