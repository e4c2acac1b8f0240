//! Test doubles shared by the unit tests: in-memory audio sinks, a canned
//! station directory, and a scripted playability prober.

use crate::directory::{SearchOutcome, StationDirectory};
use crate::models::{Station, StationDraft};
use crate::sink::{AudioSink, SinkFactory, SinkFailure, SinkRole};
use crate::validator::StreamProber;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn station(name: &str, url: &str) -> Station {
    Station::normalize(StationDraft::new(name, url)).unwrap()
}

pub fn station_with_uuid(name: &str, url: &str, uuid: &str) -> Station {
    let mut st = station(name, url);
    st.stationuuid = Some(uuid.to_string());
    st
}

#[derive(Debug, Clone)]
pub struct FakeSinkState {
    pub role: SinkRole,
    pub source: Option<String>,
    pub playing: bool,
    pub volume: f32,
    pub released: bool,
}

#[derive(Default)]
struct Script {
    failures: HashMap<String, SinkFailure>,
    hanging: HashSet<String>,
}

/// Records every sink it hands out so tests can assert on audible output.
#[derive(Clone, Default)]
pub struct FakeSinkFactory {
    sinks: Arc<Mutex<Vec<Arc<Mutex<FakeSinkState>>>>>,
    script: Arc<Mutex<Script>>,
}

impl FakeSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_url(&self, url: &str, failure: SinkFailure) {
        self.script
            .lock()
            .unwrap()
            .failures
            .insert(url.to_string(), failure);
    }

    /// `play` on this url never resolves.
    pub fn hang_url(&self, url: &str) {
        self.script.lock().unwrap().hanging.insert(url.to_string());
    }

    pub fn sinks(&self, role: SinkRole) -> Vec<FakeSinkState> {
        self.sinks
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.lock().unwrap().clone())
            .filter(|s| s.role == role)
            .collect()
    }

    /// Sources currently producing sound, across every sink role.
    pub fn audible(&self) -> Vec<(SinkRole, String)> {
        self.sinks
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.lock().unwrap().clone())
            .filter(|s| s.playing && !s.released)
            .filter_map(|s| s.source.map(|src| (s.role, src)))
            .collect()
    }

    pub fn unreleased(&self, role: SinkRole) -> usize {
        self.sinks(role).iter().filter(|s| !s.released).count()
    }
}

impl SinkFactory for FakeSinkFactory {
    fn create(&self, role: SinkRole) -> anyhow::Result<Box<dyn AudioSink>> {
        let state = Arc::new(Mutex::new(FakeSinkState {
            role,
            source: None,
            playing: false,
            volume: 1.0,
            released: false,
        }));
        self.sinks.lock().unwrap().push(state.clone());
        Ok(Box::new(FakeSink {
            state,
            script: self.script.clone(),
        }))
    }
}

struct FakeSink {
    state: Arc<Mutex<FakeSinkState>>,
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl AudioSink for FakeSink {
    fn set_source(&mut self, url: &str) {
        let mut st = self.state.lock().unwrap();
        st.source = Some(url.to_string());
        st.playing = false;
    }

    async fn play(&mut self) -> Result<(), SinkFailure> {
        let source = self.state.lock().unwrap().source.clone();
        let Some(url) = source else {
            return Err(SinkFailure::Unsupported);
        };
        let (failure, hang) = {
            let script = self.script.lock().unwrap();
            (script.failures.get(&url).copied(), script.hanging.contains(&url))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(f) = failure {
            return Err(f);
        }
        self.state.lock().unwrap().playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().unwrap().playing = false;
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().unwrap().volume = volume;
    }

    fn release(&mut self) {
        let mut st = self.state.lock().unwrap();
        st.playing = false;
        st.released = true;
    }
}

/// Directory with canned search results and uuid lookups. Every query that
/// reaches it is recorded in `queries`.
#[derive(Default)]
pub struct FakeDirectory {
    pub results: Vec<Station>,
    pub by_uuid: HashMap<String, Station>,
    pub fail_search: bool,
    pub delay: Option<Duration>,
    pub queries: Arc<Mutex<Vec<String>>>,
}

impl FakeDirectory {
    pub fn with_uuids(stations: &[Station]) -> Self {
        let by_uuid = stations
            .iter()
            .filter_map(|s| s.stationuuid.clone().map(|u| (u, s.clone())))
            .collect();
        Self {
            by_uuid,
            ..Self::default()
        }
    }
}

#[async_trait]
impl StationDirectory for FakeDirectory {
    async fn search(&self, query: &str) -> SearchOutcome {
        if query.trim().is_empty() {
            return SearchOutcome::Skipped;
        }
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_search {
            return SearchOutcome::Failed("Error searching stations. Please try again.".into());
        }
        SearchOutcome::Results(self.results.clone())
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> Vec<Station> {
        ids.iter()
            .filter_map(|id| self.by_uuid.get(id).cloned())
            .collect()
    }
}

/// Prober that reports every url playable except the listed dead ones.
#[derive(Default)]
pub struct FakeProber {
    pub dead: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeProber {
    pub fn with_dead(urls: &[&str]) -> Self {
        Self {
            dead: urls.iter().map(|u| u.to_string()).collect(),
            calls: Mutex::default(),
        }
    }
}

#[async_trait]
impl StreamProber for FakeProber {
    async fn probe(&self, url: &str) -> bool {
        self.calls.lock().unwrap().push(url.to_string());
        !self.dead.contains(url)
    }
}
