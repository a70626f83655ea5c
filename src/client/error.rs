use reqwest::Response;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Non-success answer, carrying the server's message or the operation's fallback.
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token storage failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Turns a failed response into [`ClientError::Server`].
    pub async fn from_response(response: Response, fallback: &str) -> Self {
        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = ["error_description", "message", "msg", "error"]
            .iter()
            .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
            .filter(|m| !m.is_empty())
            .unwrap_or(fallback)
            .to_string();
        Self::Server { status, message }
    }
}
