use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),

    #[error("api error: code={code} description={description}")]
    Api { code: i64, description: String },

    /// The edit would leave the message exactly as it is.
    #[error("message is not modified")]
    NotModified,

    #[error("unexpected response format: {0}")]
    ResponseFormat(String),

    #[error("io error: {0}")]
    Io(String),
}

impl TransportError {
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::ResponseFormat(e.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
