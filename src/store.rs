use crate::error::StoreError;
use crate::models::{Station, StationDraft, StationList};
use crate::storage::{KeyValueStore, LISTS_KEY, STATIONS_KEY};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The user's main station list plus any named lists. In-memory state is
/// authoritative; every mutation is written through to durable storage on a
/// best-effort basis.
pub struct StationStore {
    storage: Arc<dyn KeyValueStore>,
    stations: Vec<Station>,
    lists: Vec<StationList>,
}

impl StationStore {
    pub fn open(storage: Arc<dyn KeyValueStore>) -> Self {
        let mut store = Self {
            storage,
            stations: Vec::new(),
            lists: Vec::new(),
        };
        store.stations = store.load();
        store.lists = store.load_lists();
        info!(
            stations = store.stations.len(),
            lists = store.lists.len(),
            "station store loaded"
        );
        store
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn lists(&self) -> &[StationList] {
        &self.lists
    }

    pub fn contains(&self, url: &str) -> bool {
        self.stations.iter().any(|s| s.url == url)
    }

    pub fn find(&self, url: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.url == url)
    }

    /// Reads the main list. Absent or malformed data yields an empty list.
    pub fn load(&self) -> Vec<Station> {
        self.read_key(STATIONS_KEY, |v| v.iter().all(has_name_and_url))
    }

    /// Reads the named lists. Absent or malformed data yields no lists.
    pub fn load_lists(&self) -> Vec<StationList> {
        self.read_key(LISTS_KEY, |v| {
            v.iter().all(|list| {
                list.get("stations")
                    .and_then(|s| s.as_array())
                    .is_some_and(|s| s.iter().all(has_name_and_url))
            })
        })
    }

    pub fn save(&self) {
        self.write_key(STATIONS_KEY, &self.stations);
    }

    pub fn save_lists(&self) {
        self.write_key(LISTS_KEY, &self.lists);
    }

    /// Normalizes and appends a station unless its url is already saved.
    pub fn add(&mut self, draft: StationDraft) -> Result<&Station, StoreError> {
        let station = Station::normalize(draft).ok_or(StoreError::MissingUrl)?;
        if self.contains(&station.url) {
            return Err(StoreError::AlreadyExists { url: station.url });
        }
        info!(name = %station.name, url = %station.url, "adding station");
        self.stations.push(station);
        self.save();
        let idx = self.stations.len() - 1;
        Ok(&self.stations[idx])
    }

    /// Removes the station with this url. Callers that own playback must stop
    /// it first if this station is the one playing.
    pub fn remove(&mut self, url: &str) -> Option<Station> {
        let idx = self.stations.iter().position(|s| s.url == url)?;
        let removed = self.stations.remove(idx);
        self.save();
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.stations.clear();
        self.save();
    }

    /// Appends every station whose url is not yet saved. Duplicates, within
    /// the batch or against the list, are skipped silently.
    pub fn merge_into(&mut self, incoming: Vec<Station>) -> usize {
        let mut known: HashSet<String> = self.stations.iter().map(|s| s.url.clone()).collect();
        let before = self.stations.len();
        for station in incoming {
            if known.insert(station.url.clone()) {
                self.stations.push(station);
            }
        }
        let added = self.stations.len() - before;
        debug!(added, "merged stations");
        if added > 0 {
            self.save();
        }
        added
    }

    /// Overwrites the main list. Repeated urls in `incoming` keep their
    /// first occurrence.
    pub fn replace_all(&mut self, incoming: Vec<Station>) {
        let mut known = HashSet::new();
        self.stations = incoming
            .into_iter()
            .filter(|s| known.insert(s.url.clone()))
            .collect();
        self.save();
    }

    pub fn add_list(&mut self, list: StationList) {
        info!(name = %list.name, stations = list.stations.len(), "adding station list");
        self.lists.push(list);
        self.save_lists();
    }

    pub fn remove_list(&mut self, index: usize) -> Option<StationList> {
        if index >= self.lists.len() {
            return None;
        }
        let removed = self.lists.remove(index);
        self.save_lists();
        Some(removed)
    }

    /// Removes one station from a named list, deleting the list when it
    /// becomes empty.
    pub fn remove_from_list(&mut self, list_index: usize, url: &str) -> Option<Station> {
        let list = self.lists.get_mut(list_index)?;
        let idx = list.stations.iter().position(|s| s.url == url)?;
        let removed = list.stations.remove(idx);
        if list.stations.is_empty() {
            let list = self.lists.remove(list_index);
            info!(name = %list.name, "removed empty station list");
        }
        self.save_lists();
        Some(removed)
    }

    fn read_key<T, F>(&self, key: &str, shape_ok: F) -> Vec<T>
    where
        T: DeserializeOwned,
        F: Fn(&[serde_json::Value]) -> bool,
    {
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, error = ?e, "failed to read stored stations");
                return Vec::new();
            }
        };
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "stored value is not valid JSON, ignoring it");
                return Vec::new();
            }
        };
        let Some(items) = value.as_array() else {
            warn!(key, "stored value is not an array, ignoring it");
            return Vec::new();
        };
        if !shape_ok(items) {
            warn!(key, "stored entries are missing fields, ignoring them");
            return Vec::new();
        }
        match serde_json::from_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "stored value has the wrong shape, ignoring it");
                Vec::new()
            }
        }
    }

    fn write_key<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let data = match serde_json::to_string(value) {
            Ok(d) => d,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize stations");
                return;
            }
        };
        if let Err(e) = self.storage.set(key, &data) {
            warn!(key, error = ?e, "failed to persist stations");
        }
    }
}

fn has_name_and_url(v: &serde_json::Value) -> bool {
    let field = |name: &str| {
        v.get(name)
            .and_then(|f| f.as_str())
            .is_some_and(|s| !s.trim().is_empty())
    };
    field("name") && field("url")
}
