//! Audio output handles.
//!
//! The playback controller owns the long-lived "main" sink and creates a
//! short-lived "preview" sink per audition. The validator creates throwaway
//! "probe" sinks that must never produce audible output.

use crate::error::PlaybackErrorKind;
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkRole {
    Main,
    Preview,
    Probe,
}

impl SinkRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SinkRole::Main => "main",
            SinkRole::Preview => "preview",
            SinkRole::Probe => "probe",
        }
    }
}

/// Asynchronous notifications a sink emits outside of a `play` call. `url`
/// is the source the sink was loading when the event fired; receivers drop
/// events whose url is no longer the one they are playing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Ended { role: SinkRole, url: String },
    Failed { role: SinkRole, url: String, reason: String },
    Title { role: SinkRole, title: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFailure {
    Unsupported,
    Network,
    Timeout,
}

impl From<SinkFailure> for PlaybackErrorKind {
    fn from(f: SinkFailure) -> Self {
        match f {
            SinkFailure::Unsupported => PlaybackErrorKind::Unsupported,
            SinkFailure::Network => PlaybackErrorKind::Network,
            SinkFailure::Timeout => PlaybackErrorKind::Timeout,
        }
    }
}

#[async_trait]
pub trait AudioSink: Send {
    /// Points the sink at a stream. Takes effect on the next `play`.
    fn set_source(&mut self, url: &str);

    /// Starts or resumes playback and resolves once the stream is ready to
    /// play, or with the reason it could not start.
    async fn play(&mut self) -> Result<(), SinkFailure>;

    fn pause(&mut self);

    /// Volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);

    /// Frees the underlying media resources. Idempotent.
    fn release(&mut self);
}

pub trait SinkFactory: Send + Sync {
    fn create(&self, role: SinkRole) -> anyhow::Result<Box<dyn AudioSink>>;
}

/// Owns a sink and releases it when dropped, including when the owning
/// future is cancelled by a timeout.
pub struct SinkGuard(Box<dyn AudioSink>);

impl SinkGuard {
    pub fn new(sink: Box<dyn AudioSink>) -> Self {
        Self(sink)
    }
}

impl Deref for SinkGuard {
    type Target = dyn AudioSink;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for SinkGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}
