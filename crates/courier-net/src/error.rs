use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid header `{name}`: {value}")]
    InvalidHeader { name: String, value: String },

    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}
