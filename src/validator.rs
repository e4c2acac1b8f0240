//! Stream validation: a cheap structural check on the url, and a probe that
//! actually opens the stream on a throwaway silent sink.

use crate::models::Station;
use crate::sink::{SinkFactory, SinkGuard, SinkRole};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const UNSUPPORTED_PROTOCOLS: &[&str] = &["rtsp://", "rtmp://", "mms://", "mmsh://", "pnm://"];
const UNSUPPORTED_EXTENSIONS: &[&str] = &["wmv", "asf", "asx", "avi", "flv", "mov", "mkv", "rm", "ram", "ra"];
const STREAM_FORMATS: &[&str] = &["mp3", "aac", "aacp", "ogg", "oga", "opus", "m3u", "m3u8", "pls"];
const AUDIO_FILE_EXTENSIONS: &[&str] = &["mp3", "aac", "ogg", "opus", "flac", "m4a", "wav", "weba"];
const STREAM_PATHS: &[&str] = &["/stream", "/listen", "/radio", "/live", "/broadcast"];

/// Structural check only; never touches the network.
pub fn is_likely_stream(url: &str) -> bool {
    let raw = url.trim();
    let Ok(parsed) = Url::parse(raw) else {
        return false;
    };
    let lower = raw.to_ascii_lowercase();
    if UNSUPPORTED_PROTOCOLS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    let path = parsed.path().to_ascii_lowercase();
    let path_and_query = match parsed.query() {
        Some(q) => format!("{path}?{}", q.to_ascii_lowercase()),
        None => path.clone(),
    };
    if UNSUPPORTED_EXTENSIONS
        .iter()
        .any(|ext| has_extension_marker(&path_and_query, ext))
    {
        return false;
    }

    STREAM_FORMATS
        .iter()
        .any(|ext| has_extension_marker(&path_and_query, ext))
        || STREAM_PATHS.iter().any(|p| path.contains(p))
        || AUDIO_FILE_EXTENSIONS
            .iter()
            .any(|ext| path.ends_with(&format!(".{ext}")))
        || has_server_port(&parsed, &lower)
}

/// `.ext` followed by the end of input or a non-alphanumeric character.
fn has_extension_marker(haystack: &str, ext: &str) -> bool {
    let needle = format!(".{ext}");
    haystack.match_indices(&needle).any(|(idx, _)| {
        haystack[idx + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric())
    })
}

/// Self-hosted streaming servers usually sit on a 4-5 digit port.
fn has_server_port(parsed: &Url, lower: &str) -> bool {
    match parsed.port() {
        Some(port) if port >= 1000 => lower.contains(&format!(":{port}/")),
        _ => false,
    }
}

#[async_trait]
pub trait StreamProber: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// Probes playability by opening the stream on a silent throwaway sink.
pub struct SinkProber {
    factory: Arc<dyn SinkFactory>,
    timeout: Duration,
}

impl SinkProber {
    pub fn new(factory: Arc<dyn SinkFactory>, timeout: Duration) -> Self {
        Self { factory, timeout }
    }

    /// Resolves `true` once the sink signals ready-to-play within the
    /// timeout. The sink is released on every exit path.
    pub async fn probe_playability(&self, url: &str) -> bool {
        let sink = match self.factory.create(SinkRole::Probe) {
            Ok(s) => s,
            Err(e) => {
                debug!(url, error = %e, "could not create probe sink");
                return false;
            }
        };
        let mut sink = SinkGuard::new(sink);
        sink.set_volume(0.0);
        sink.set_source(url);
        let res = tokio::time::timeout(self.timeout, sink.play()).await;
        let playable = matches!(res, Ok(Ok(())));
        debug!(url, playable, "probe finished");
        playable
    }
}

#[async_trait]
impl StreamProber for SinkProber {
    async fn probe(&self, url: &str) -> bool {
        self.probe_playability(url).await
    }
}

/// Two-stage filter over search results: drop repeated urls and urls that
/// fail the structural check, then probe the rest concurrently. Results are
/// returned only after every probe has settled.
pub async fn filter_playable(candidates: Vec<Station>, prober: &dyn StreamProber) -> Vec<Station> {
    let mut seen = HashSet::new();
    let structural: Vec<Station> = candidates
        .into_iter()
        .filter(|s| seen.insert(s.url.clone()))
        .filter(|s| is_likely_stream(&s.url))
        .collect();

    let verdicts = join_all(structural.iter().map(|s| prober.probe(&s.url))).await;
    structural
        .into_iter()
        .zip(verdicts)
        .filter_map(|(s, ok)| ok.then_some(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkFailure;
    use crate::test_fixtures::{station, FakeProber, FakeSinkFactory};

    #[test]
    fn rejects_legacy_containers_and_protocols() {
        assert!(!is_likely_stream("https://example.com/video.wmv"));
        assert!(!is_likely_stream("http://example.com/stream/clip.avi"));
        assert!(!is_likely_stream("rtsp://example.com/stream"));
        assert!(!is_likely_stream("mms://example.com:8000/live"));
        assert!(!is_likely_stream("not a url"));
        assert!(!is_likely_stream("file:///home/me/song.mp3"));
    }

    #[test]
    fn accepts_common_stream_shapes() {
        assert!(is_likely_stream("https://example.com:8000/stream"));
        assert!(is_likely_stream("http://example.com:8443/"));
        assert!(is_likely_stream("http://ice.example.org/jazz.mp3"));
        assert!(is_likely_stream("https://cdn.example.org/live/playlist.m3u8?token=abc"));
        assert!(is_likely_stream("http://kutx.stream/listen"));
        assert!(is_likely_stream("http://example.com/radio/8010/radio.ogg"));
    }

    #[test]
    fn requires_a_positive_signal() {
        assert!(!is_likely_stream("https://example.com/"));
        assert!(!is_likely_stream("https://example.com/about.html"));
    }

    #[test]
    fn extension_markers_need_a_boundary() {
        assert!(is_likely_stream("http://example.com/x.ramfm/stream"));
        assert!(!is_likely_stream("http://example.com/show.ram"));
        assert!(!has_extension_marker("/x.ramfm/", "ram"));
        assert!(has_extension_marker("/x.ram?x=1", "ram"));
    }

    #[tokio::test]
    async fn probe_reports_ready_streams_and_releases_sink() {
        let factory = FakeSinkFactory::new();
        let prober = SinkProber::new(Arc::new(factory.clone()), Duration::from_secs(5));
        assert!(prober.probe_playability("http://ok.example:8000/live").await);
        let sinks = factory.sinks(SinkRole::Probe);
        assert_eq!(sinks.len(), 1);
        assert!(sinks[0].released);
        assert_eq!(sinks[0].volume, 0.0);
    }

    #[tokio::test]
    async fn probe_reports_errors_and_releases_sink() {
        let factory = FakeSinkFactory::new();
        factory.fail_url("http://dead.example:8000/live", SinkFailure::Network);
        let prober = SinkProber::new(Arc::new(factory.clone()), Duration::from_secs(5));
        assert!(!prober.probe_playability("http://dead.example:8000/live").await);
        assert_eq!(factory.unreleased(SinkRole::Probe), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_times_out_and_releases_sink() {
        let factory = FakeSinkFactory::new();
        factory.hang_url("http://slow.example:8000/live");
        let prober = SinkProber::new(Arc::new(factory.clone()), Duration::from_millis(5000));
        assert!(!prober.probe_playability("http://slow.example:8000/live").await);
        assert_eq!(factory.sinks(SinkRole::Probe).len(), 1);
        assert_eq!(factory.unreleased(SinkRole::Probe), 0);
    }

    #[tokio::test]
    async fn filter_drops_invalid_duplicate_and_dead_stations() {
        let prober = FakeProber::with_dead(&["http://dead.example:8000/live"]);
        let candidates = vec![
            station("A", "http://a.example:8000/live"),
            station("A again", "http://a.example:8000/live"),
            station("Video", "https://example.com/video.wmv"),
            station("Dead", "http://dead.example:8000/live"),
            station("B", "http://b.example/stream"),
        ];
        let kept = filter_playable(candidates, &prober).await;
        let names: Vec<&str> = kept.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);

        let calls = prober.calls.lock().unwrap();
        assert_eq!(calls.len(), 3, "only structurally valid, distinct urls are probed");
    }
}
