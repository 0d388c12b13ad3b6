use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq)]
pub enum BoardError {
    /// The source list was empty, not a list, or held only blank entries.
    NoValidImages,
    /// A single image could not be fetched or decoded.
    Fetch(String),
    /// Persisted layer state could not be read back.
    State(String),
    /// A load cycle is already in flight for this instance.
    Busy,
    /// Every image of an otherwise valid source list failed.
    NoImagesLoaded { total: usize },
    InvalidParameter(String),
}

impl Display for BoardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardError::NoValidImages => f.write_str("no valid images"),
            BoardError::Fetch(message) => write!(f, "failed to load image: {}", message),
            BoardError::State(message) => write!(f, "invalid layer state: {}", message),
            BoardError::Busy => f.write_str("a load is already in progress"),
            BoardError::NoImagesLoaded { total } => write!(f, "failed to load all {} images", total),
            BoardError::InvalidParameter(message) => write!(f, "invalid parameter: {}", message),
        }
    }
}

impl Error for BoardError {}

impl From<anyhow::Error> for BoardError {
    fn from(value: anyhow::Error) -> Self {
        BoardError::Fetch(format!("{:#}", value))
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(value: serde_json::Error) -> Self {
        BoardError::State(value.to_string())
    }
}

impl From<image::ImageError> for BoardError {
    fn from(value: image::ImageError) -> Self {
        BoardError::Fetch(value.to_string())
    }
}

pub type BoardResult<T> = Result<T, BoardError>;
