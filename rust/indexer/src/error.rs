use ethers::providers::{ProviderError, RpcError};
use thiserror::Error;

/// Any failure talking to an external read endpoint. Never fatal.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid endpoint url: {0}")]
    Url(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for TransportError {
    fn from(e: ProviderError) -> Self {
        if let Some(resp) = e.as_error_response() {
            return TransportError::Rpc {
                code: resp.code,
                message: resp.message.clone(),
            };
        }
        if e.as_serde_error().is_some() {
            return TransportError::Malformed(e.to_string());
        }
        match e {
            ProviderError::HTTPError(e) => TransportError::Http(e),
            other => TransportError::Unavailable(other.to_string()),
        }
    }
}

/// Why a log was dropped by the decoder. Counted, never surfaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown topic0")]
    UnknownTopic,
    #[error("log has no topics")]
    MissingTopic,
    #[error("malformed log: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("vote action requires a support value")]
    MissingSupport,
    #[error("signing failed: {0}")]
    Signer(#[from] TransportError),
}
