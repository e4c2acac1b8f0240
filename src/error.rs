use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("This station is already in your list: {url}")]
    AlreadyExists { url: String },

    #[error("Station has no stream URL")]
    MissingUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackErrorKind {
    InvalidUrl,
    Unsupported,
    Network,
    Timeout,
}

/// A failed attempt to start a stream. Never fatal for the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} ({station_url})", describe(.kind))]
pub struct PlaybackError {
    pub kind: PlaybackErrorKind,
    pub station_url: String,
}

impl PlaybackError {
    pub fn new(kind: PlaybackErrorKind, station_url: impl Into<String>) -> Self {
        Self {
            kind,
            station_url: station_url.into(),
        }
    }
}

fn describe(kind: &PlaybackErrorKind) -> &'static str {
    match kind {
        PlaybackErrorKind::InvalidUrl => "Not a playable stream URL",
        PlaybackErrorKind::Unsupported => "Stream format is not supported",
        PlaybackErrorKind::Network => "Error playing station, it might be unavailable",
        PlaybackErrorKind::Timeout => "Station did not start in time",
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid import data: {reason}")]
    Malformed { reason: String },

    #[error("No stations found in the imported data")]
    Empty,

    #[error("None of the shared stations could be found")]
    NoStationsResolved,

    #[error("Failed to read import file: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("Username must be between {min} and {max} characters")]
    Length { min: usize, max: usize },

    #[error("Username may only contain letters, numbers and spaces")]
    Characters,

    #[error("That username is not allowed")]
    Denied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_error_names_the_station() {
        let err = PlaybackError::new(PlaybackErrorKind::Timeout, "http://x:8000/live");
        assert_eq!(
            err.to_string(),
            "Station did not start in time (http://x:8000/live)"
        );
    }
}
