use thiserror::Error;

#[derive(Error, Debug)]
pub enum BiomarkerError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("audio is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
