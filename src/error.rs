use thiserror::Error;

#[derive(Error, Debug)]
pub enum VibifyError {
    #[error("Spotify authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not authenticated with Spotify, login required")]
    NotAuthenticated,

    #[error("Spotify API error: {0}")]
    SpotifyApiError(String),

    #[error("OAuth callback error: {0}")]
    CallbackError(String),

    #[error("Credentials error: {0}")]
    CredentialsError(String),

    #[error("Artwork error: {0}")]
    ArtworkError(String),

    #[error("UI error: {0}")]
    UIError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<rspotify::ClientError> for VibifyError {
    fn from(e: rspotify::ClientError) -> Self {
        VibifyError::SpotifyApiError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VibifyError>;
