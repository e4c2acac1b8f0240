use crate::error::{PlaybackError, PlaybackErrorKind};
use crate::models::Station;
use crate::sink::{AudioSink, SinkFactory, SinkGuard, SinkRole};
use crate::validator::is_likely_stream;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    PlayingMain(Station),
    PlayingPreview(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewOutcome {
    Started,
    Stopped,
}

struct ActivePreview {
    url: String,
    sink: SinkGuard,
}

/// Sole owner of the main and preview sinks. At most one of them is audible.
pub struct PlaybackController {
    factory: Arc<dyn SinkFactory>,
    main: Box<dyn AudioSink>,
    preview: Option<ActivePreview>,
    preview_volume: f32,
    current: Option<Station>,
    playing: bool,
    volume: f32,
}

impl PlaybackController {
    pub fn new(factory: Arc<dyn SinkFactory>, preview_volume: f32, initial_volume: u8) -> Result<Self> {
        let main = factory.create(SinkRole::Main)?;
        let mut controller = Self {
            factory,
            main,
            preview: None,
            preview_volume: preview_volume.clamp(0.0, 1.0),
            current: None,
            playing: false,
            volume: 1.0,
        };
        controller.set_volume(initial_volume);
        Ok(controller)
    }

    pub fn state(&self) -> PlaybackState {
        if let Some(p) = &self.preview {
            return PlaybackState::PlayingPreview(p.url.clone());
        }
        match (&self.current, self.playing) {
            (Some(st), true) => PlaybackState::PlayingMain(st.clone()),
            _ => PlaybackState::Idle,
        }
    }

    pub fn current_station(&self) -> Option<&Station> {
        self.current.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn preview_url(&self) -> Option<&str> {
        self.preview.as_ref().map(|p| p.url.as_str())
    }

    /// Volume percentage of the main sink.
    pub fn volume(&self) -> u8 {
        (self.volume * 100.0).round() as u8
    }

    /// Starts `station` on the main sink. On failure the sink is left paused
    /// and nothing is audible, even if another station was playing before.
    /// The previous station stays current so a toggle can bring it back.
    pub async fn play_main(&mut self, station: Station) -> Result<(), PlaybackError> {
        if !is_likely_stream(&station.url) {
            warn!(url = %station.url, "refusing to play invalid stream url");
            return Err(PlaybackError::new(PlaybackErrorKind::InvalidUrl, &station.url));
        }
        self.stop_preview();

        self.main.set_source(&station.url);
        match self.main.play().await {
            Ok(()) => {
                info!(name = %station.name, url = %station.url, "playing station");
                self.current = Some(station);
                self.playing = true;
                Ok(())
            }
            Err(failure) => {
                warn!(url = %station.url, ?failure, "failed to start station");
                self.main.pause();
                self.playing = false;
                Err(PlaybackError::new(failure.into(), &station.url))
            }
        }
    }

    /// Pauses or resumes the current station without changing which one is
    /// current. With no current station the sink is paused and nothing else
    /// happens.
    pub async fn toggle_main(&mut self) -> Result<(), PlaybackError> {
        let Some(station) = self.current.clone() else {
            self.main.pause();
            self.playing = false;
            return Ok(());
        };
        if self.playing {
            self.main.pause();
            self.playing = false;
            return Ok(());
        }

        self.stop_preview();
        self.main.set_source(&station.url);
        match self.main.play().await {
            Ok(()) => {
                self.playing = true;
                Ok(())
            }
            Err(failure) => {
                warn!(url = %station.url, ?failure, "failed to resume station");
                self.main.pause();
                Err(PlaybackError::new(failure.into(), &station.url))
            }
        }
    }

    pub fn stop_main(&mut self) {
        self.main.pause();
        self.current = None;
        self.playing = false;
    }

    /// Auditions a stream on its own sink at the fixed preview volume.
    /// Calling it again with the active preview url stops that preview. Main
    /// playback is paused and stays paused afterwards.
    pub async fn play_preview(&mut self, url: &str) -> Result<PreviewOutcome, PlaybackError> {
        if !is_likely_stream(url) {
            return Err(PlaybackError::new(PlaybackErrorKind::InvalidUrl, url));
        }
        // Unconditional: `playing` may already be false while the sink is not.
        self.main.pause();
        self.playing = false;
        if self.preview.as_ref().is_some_and(|p| p.url == url) {
            self.stop_preview();
            return Ok(PreviewOutcome::Stopped);
        }
        self.stop_preview();

        let sink = self
            .factory
            .create(SinkRole::Preview)
            .map_err(|e| {
                warn!(url, error = %e, "could not create preview sink");
                PlaybackError::new(PlaybackErrorKind::Network, url)
            })?;
        let mut sink = SinkGuard::new(sink);
        sink.set_volume(self.preview_volume);
        sink.set_source(url);
        match sink.play().await {
            Ok(()) => {
                info!(url, "previewing station");
                self.preview = Some(ActivePreview {
                    url: url.to_string(),
                    sink,
                });
                Ok(PreviewOutcome::Started)
            }
            Err(failure) => {
                warn!(url, ?failure, "failed to start preview");
                Err(PlaybackError::new(failure.into(), url))
            }
        }
    }

    pub fn stop_preview(&mut self) {
        if let Some(mut p) = self.preview.take() {
            p.sink.pause();
        }
    }

    /// The main stream at `url` ended or failed. The station stays current
    /// so it can be replayed. Returns `false`, changing nothing, when `url`
    /// is not the station currently playing.
    pub fn on_stream_ended(&mut self, url: &str) -> bool {
        let is_current = self.current.as_ref().is_some_and(|s| s.url == url);
        if !self.playing || !is_current {
            return false;
        }
        self.main.pause();
        self.playing = false;
        true
    }

    /// Same as `on_stream_ended` for the preview sink.
    pub fn on_preview_ended(&mut self, url: &str) -> bool {
        if self.preview_url() != Some(url) {
            return false;
        }
        self.stop_preview();
        true
    }

    pub fn set_volume(&mut self, percent: u8) {
        self.volume = f32::from(percent.min(100)) / 100.0;
        self.main.set_volume(self.volume);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkFailure;
    use crate::test_fixtures::{station, FakeSinkFactory};

    const A: &str = "http://a.example:8000/live";
    const B: &str = "http://b.example:8000/live";
    const C: &str = "http://c.example/stream";

    fn controller() -> (FakeSinkFactory, PlaybackController) {
        let factory = FakeSinkFactory::new();
        let pc = PlaybackController::new(Arc::new(factory.clone()), 0.5, 80).unwrap();
        (factory, pc)
    }

    #[tokio::test]
    async fn preview_pauses_main_and_toggles_off_without_resuming() {
        let (factory, mut pc) = controller();
        let a = station("A", A);
        pc.play_main(a.clone()).await.unwrap();
        assert_eq!(pc.state(), PlaybackState::PlayingMain(a.clone()));

        assert_eq!(pc.play_preview(B).await.unwrap(), PreviewOutcome::Started);
        assert_eq!(pc.state(), PlaybackState::PlayingPreview(B.to_string()));
        assert_eq!(factory.audible(), vec![(SinkRole::Preview, B.to_string())]);

        assert_eq!(pc.play_preview(B).await.unwrap(), PreviewOutcome::Stopped);
        assert_eq!(pc.state(), PlaybackState::Idle);
        assert!(factory.audible().is_empty());
        assert_eq!(pc.current_station(), Some(&a));
        assert!(!pc.is_playing());
        assert_eq!(factory.unreleased(SinkRole::Preview), 0);
    }

    #[tokio::test]
    async fn new_preview_replaces_previous_one() {
        let (factory, mut pc) = controller();
        pc.play_preview(B).await.unwrap();
        pc.play_preview(C).await.unwrap();
        assert_eq!(factory.audible(), vec![(SinkRole::Preview, C.to_string())]);
        assert_eq!(factory.unreleased(SinkRole::Preview), 1);
    }

    #[tokio::test]
    async fn previews_use_fixed_volume() {
        let (factory, mut pc) = controller();
        pc.set_volume(20);
        pc.play_preview(B).await.unwrap();
        let preview = &factory.sinks(SinkRole::Preview)[0];
        assert!((preview.volume - 0.5).abs() < f32::EPSILON);
        let main = &factory.sinks(SinkRole::Main)[0];
        assert!((main.volume - 0.2).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn playing_main_stops_active_preview() {
        let (factory, mut pc) = controller();
        pc.play_preview(B).await.unwrap();
        pc.play_main(station("A", A)).await.unwrap();
        assert_eq!(factory.audible(), vec![(SinkRole::Main, A.to_string())]);
        assert!(pc.preview_url().is_none());
    }

    #[tokio::test]
    async fn invalid_url_leaves_state_unchanged() {
        let (factory, mut pc) = controller();
        let a = station("A", A);
        pc.play_main(a.clone()).await.unwrap();
        let err = pc
            .play_main(station("Video", "https://example.com/video.wmv"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, PlaybackErrorKind::InvalidUrl);
        assert_eq!(err.station_url, "https://example.com/video.wmv");
        assert_eq!(pc.state(), PlaybackState::PlayingMain(a));
        assert_eq!(factory.audible(), vec![(SinkRole::Main, A.to_string())]);
    }

    #[tokio::test]
    async fn start_failure_is_reported_and_controller_stays_usable() {
        let (factory, mut pc) = controller();
        factory.fail_url(B, SinkFailure::Unsupported);
        let err = pc.play_main(station("B", B)).await.unwrap_err();
        assert_eq!(err.kind, PlaybackErrorKind::Unsupported);
        assert_eq!(pc.state(), PlaybackState::Idle);
        assert!(pc.current_station().is_none());

        pc.play_main(station("A", A)).await.unwrap();
        assert!(pc.is_playing());
    }

    #[tokio::test]
    async fn toggle_without_station_is_idle_noop() {
        let (factory, mut pc) = controller();
        pc.toggle_main().await.unwrap();
        pc.toggle_main().await.unwrap();
        assert_eq!(pc.state(), PlaybackState::Idle);
        assert!(factory.audible().is_empty());
    }

    #[tokio::test]
    async fn toggle_pauses_and_resumes_current_station() {
        let (factory, mut pc) = controller();
        let a = station("A", A);
        pc.play_main(a.clone()).await.unwrap();
        pc.toggle_main().await.unwrap();
        assert_eq!(pc.state(), PlaybackState::Idle);
        assert_eq!(pc.current_station(), Some(&a));
        pc.toggle_main().await.unwrap();
        assert_eq!(pc.state(), PlaybackState::PlayingMain(a));
        assert_eq!(factory.audible().len(), 1);
    }

    #[tokio::test]
    async fn stream_end_keeps_current_station_and_silences_sink() {
        let (factory, mut pc) = controller();
        let a = station("A", A);
        pc.play_main(a.clone()).await.unwrap();
        assert!(pc.on_stream_ended(A));
        assert!(!pc.is_playing());
        assert_eq!(pc.current_station(), Some(&a));
        assert!(factory.audible().is_empty());
        assert!(!pc.on_stream_ended(A));
    }

    #[tokio::test]
    async fn end_of_replaced_station_is_ignored() {
        let (factory, mut pc) = controller();
        pc.play_main(station("A", A)).await.unwrap();
        pc.play_main(station("B", B)).await.unwrap();

        assert!(!pc.on_stream_ended(A));
        assert!(pc.is_playing());
        assert_eq!(factory.audible(), vec![(SinkRole::Main, B.to_string())]);

        pc.play_preview(C).await.unwrap();
        assert_eq!(factory.audible(), vec![(SinkRole::Preview, C.to_string())]);
    }

    #[tokio::test]
    async fn end_of_replaced_preview_is_ignored() {
        let (factory, mut pc) = controller();
        pc.play_preview(B).await.unwrap();
        pc.play_preview(C).await.unwrap();
        assert!(!pc.on_preview_ended(B));
        assert_eq!(pc.preview_url(), Some(C));
        assert!(pc.on_preview_ended(C));
        assert!(factory.audible().is_empty());
    }

    #[tokio::test]
    async fn failed_switch_leaves_nothing_audible() {
        let (factory, mut pc) = controller();
        let a = station("A", A);
        pc.play_main(a.clone()).await.unwrap();
        factory.fail_url(B, SinkFailure::Network);
        let err = pc.play_main(station("B", B)).await.unwrap_err();
        assert_eq!(err.station_url, B);
        assert!(factory.audible().is_empty());
        assert_eq!(pc.current_station(), Some(&a));
        assert_eq!(pc.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn stop_clears_current_station() {
        let (factory, mut pc) = controller();
        pc.play_main(station("A", A)).await.unwrap();
        pc.stop_main();
        assert_eq!(pc.state(), PlaybackState::Idle);
        assert!(pc.current_station().is_none());
        assert!(factory.audible().is_empty());
    }

    #[test]
    fn volume_is_clamped_and_scaled() {
        let factory = FakeSinkFactory::new();
        let mut pc = PlaybackController::new(Arc::new(factory.clone()), 0.5, 100).unwrap();
        pc.set_volume(250);
        assert_eq!(pc.volume(), 100);
        pc.set_volume(35);
        assert_eq!(pc.volume(), 35);
        let main = &factory.sinks(SinkRole::Main)[0];
        assert!((main.volume - 0.35).abs() < 1e-6);
    }
}
