/// Uniform failure value for everything the transport adapter does.
///
/// The adapter never retries; callers decide whether an error is worth another
/// attempt (the status poller always retries, command dispatch never does).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} returned HTTP {status}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub(crate) fn from_reqwest(url: &reqwest::Url, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            TransportError::Timeout { url }
        } else if err.is_decode() {
            TransportError::Decode {
                url,
                message: err.to_string(),
            }
        } else {
            TransportError::Network {
                url,
                message: err.to_string(),
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
