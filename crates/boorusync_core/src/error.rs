use thiserror::Error;

/// Failure taxonomy for a sync run. Anything outside these categories
/// travels as a plain `anyhow` error with context.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Non-success HTTP response from either catalog service.
    #[error("{operation} failed: HTTP {status}: {detail}")]
    RemoteService {
        operation: String,
        status: u16,
        detail: String,
    },

    /// External decoder exited non-zero or produced no output file.
    #[error("decode failed: {message}")]
    Decode { message: String },

    /// Response body did not match the expected JSON envelope.
    #[error("{operation} returned an unexpected payload: {message}")]
    PayloadShape { operation: String, message: String },
}
