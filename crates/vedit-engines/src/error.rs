//! Engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Worth retrying: timeouts, connection failures, 429/5xx responses.
    #[error("transient engine failure: {0}")]
    Transient(String),

    /// Not worth retrying: the service rejected the request itself.
    #[error("permanent engine failure: {0}")]
    Permanent(String),

    #[error("engine http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine returned malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Transient(_) => true,
            EngineError::Permanent(_) | EngineError::Decode(_) => false,
            EngineError::Http(err) => {
                if err.is_timeout() || err.is_connect() {
                    return true;
                }
                match err.status() {
                    Some(status) => status.is_server_error() || status.as_u16() == 429,
                    None => true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transience_classification() {
        assert!(EngineError::Transient("timeout".into()).is_transient());
        assert!(!EngineError::Permanent("bad media".into()).is_transient());
        let decode = EngineError::Decode(serde_json::from_str::<u32>("notjson").unwrap_err());
        assert!(!decode.is_transient());
    }
}
