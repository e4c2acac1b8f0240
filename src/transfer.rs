//! Moving station sets in and out: export files, share payloads, and the
//! reconciliation modes used when a batch arrives.

use crate::directory::StationDirectory;
use crate::error::ImportError;
use crate::models::{Station, StationDraft, StationList};
use crate::storage::write_atomic;
use crate::store::StationStore;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
struct ExportFile<'a> {
    version: &'static str,
    stations: &'a [Station],
}

pub fn export_stations(stations: &[Station]) -> Result<String> {
    let file = ExportFile {
        version: EXPORT_VERSION,
        stations,
    };
    serde_json::to_string_pretty(&file).context("Failed to serialize stations")
}

pub fn write_export(path: &Path, stations: &[Station]) -> Result<()> {
    if stations.is_empty() {
        return Err(anyhow!("No stations to export"));
    }
    let data = export_stations(stations)?;
    write_atomic(path, data.as_bytes())
}

/// Accepts any JSON object carrying a `stations` array. Every entry must
/// have a url; missing fields are defaulted.
pub fn parse_import(text: &str) -> Result<Vec<Station>, ImportError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ImportError::malformed(format!("not valid JSON: {e}")))?;
    let entries = value
        .get("stations")
        .and_then(|s| s.as_array())
        .ok_or_else(|| ImportError::malformed("expected a \"stations\" array"))?;
    if entries.is_empty() {
        return Err(ImportError::Empty);
    }
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let draft: StationDraft = serde_json::from_value(entry.clone())
                .map_err(|e| ImportError::malformed(format!("station {}: {e}", i + 1)))?;
            Station::normalize(draft)
                .ok_or_else(|| ImportError::malformed(format!("station {} has no url", i + 1)))
        })
        .collect()
}

pub async fn read_import_file(path: &Path) -> Result<Vec<Station>, ImportError> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_import(&text)
}

/// Compact share payload sized for a QR code: the sharer's name and the
/// directory ids of their stations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePayload {
    #[serde(rename = "u")]
    pub sharer: String,
    #[serde(rename = "i")]
    pub station_ids: Vec<String>,
}

impl SharePayload {
    /// Stations without a directory id cannot be shared and are left out.
    pub fn from_stations(sharer: &str, stations: &[Station]) -> Option<Self> {
        let station_ids: Vec<String> = stations
            .iter()
            .filter_map(|s| s.stationuuid.clone())
            .collect();
        if station_ids.is_empty() {
            return None;
        }
        Some(Self {
            sharer: sharer.to_string(),
            station_ids,
        })
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize share payload")
    }

    pub fn decode(text: &str) -> Result<Self, ImportError> {
        let payload: Self = serde_json::from_str(text.trim())
            .map_err(|e| ImportError::malformed(format!("invalid share code: {e}")))?;
        if payload.station_ids.is_empty() {
            return Err(ImportError::Empty);
        }
        Ok(payload)
    }

    /// Looks every id up in the directory. Unresolved ids are skipped; an
    /// empty result is an error.
    pub async fn resolve(&self, directory: &dyn StationDirectory) -> Result<Vec<Station>, ImportError> {
        let stations = directory.fetch_by_ids(&self.station_ids).await;
        info!(
            requested = self.station_ids.len(),
            resolved = stations.len(),
            "resolved shared stations"
        );
        if stations.is_empty() {
            return Err(ImportError::NoStationsResolved);
        }
        Ok(stations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Replace,
    Merge,
    NewList,
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "merge" => Ok(Self::Merge),
            "new" | "new-list" | "list" => Ok(Self::NewList),
            other => Err(format!("unknown import mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub mode: ImportMode,
    pub received: usize,
    pub added: usize,
    pub list_name: Option<String>,
}

impl ImportSummary {
    pub fn message(&self, total: usize) -> String {
        match self.mode {
            ImportMode::Replace => format!("Import successful! You now have {total} stations."),
            ImportMode::Merge => format!(
                "Added {} of {} stations. You now have {total} stations.",
                self.added, self.received
            ),
            ImportMode::NewList => format!(
                "Saved {} stations to \"{}\".",
                self.received,
                self.list_name.as_deref().unwrap_or_default()
            ),
        }
    }
}

pub fn list_name_for(sharer: &str) -> String {
    format!("{}'s Radio", sharer.trim())
}

/// Applies an incoming batch to the store. Playback concerns (stopping a
/// station that a replace removes) belong to the caller.
pub fn reconcile(
    store: &mut StationStore,
    mode: ImportMode,
    incoming: Vec<Station>,
    sharer: &str,
) -> ImportSummary {
    let received = incoming.len();
    match mode {
        ImportMode::Replace => {
            store.replace_all(incoming);
            ImportSummary {
                mode,
                received,
                added: store.stations().len(),
                list_name: None,
            }
        }
        ImportMode::Merge => {
            let added = store.merge_into(incoming);
            ImportSummary {
                mode,
                received,
                added,
                list_name: None,
            }
        }
        ImportMode::NewList => {
            let name = list_name_for(sharer);
            store.add_list(StationList {
                name: name.clone(),
                stations: incoming,
            });
            ImportSummary {
                mode,
                received,
                added: received,
                list_name: Some(name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::test_fixtures::{station, station_with_uuid, FakeDirectory};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn store_with(stations: &[Station]) -> StationStore {
        let mut store = StationStore::open(Arc::new(MemoryStore::new()));
        store.replace_all(stations.to_vec());
        store
    }

    #[test]
    fn export_then_replace_reproduces_stations() {
        let mut a = station("A", "http://a:8000/live");
        a.tags = "jazz,blues".into();
        let b = station_with_uuid("B", "http://b.example/stream", "uuid-b");
        let original = vec![a, b];

        let text = export_stations(&original).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["version"], "1.0");

        let mut store = store_with(&[station("Old", "http://old:8000/live")]);
        let incoming = parse_import(&text).unwrap();
        reconcile(&mut store, ImportMode::Replace, incoming, "me");
        assert_eq!(store.stations(), original.as_slice());
    }

    #[test]
    fn new_list_mode_leaves_main_list_alone() {
        let mut store = store_with(&[station("Mine", "http://mine:8000/live")]);
        let text = r#"{"version":"1.0","stations":[
            {"name":"X","url":"http://x:8000/live"},
            {"name":"Y","url":"http://y:8000/live"}]}"#;
        let incoming = parse_import(text).unwrap();
        let summary = reconcile(&mut store, ImportMode::NewList, incoming, "Alex");
        assert_eq!(summary.list_name.as_deref(), Some("Alex's Radio"));
        assert_eq!(store.stations().len(), 1);
        assert_eq!(store.lists().len(), 1);
        let names: Vec<&str> = store.lists()[0]
            .stations
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["X", "Y"]);
    }

    #[test]
    fn merge_mode_skips_known_urls() {
        let mut store = store_with(&[station("Mine", "http://mine:8000/live")]);
        let incoming = vec![
            station("Mine again", "http://mine:8000/live"),
            station("New", "http://new:8000/live"),
        ];
        let summary = reconcile(&mut store, ImportMode::Merge, incoming, "Alex");
        assert_eq!(summary.added, 1);
        assert_eq!(summary.message(store.stations().len()), "Added 1 of 2 stations. You now have 2 stations.");
        assert_eq!(store.stations()[0].name, "Mine");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(parse_import("nope"), Err(ImportError::Malformed { .. })));
        assert!(matches!(
            parse_import(r#"{"stations":{"name":"x"}}"#),
            Err(ImportError::Malformed { .. })
        ));
        assert!(matches!(
            parse_import(r#"[{"name":"x","url":"http://x:8000/live"}]"#),
            Err(ImportError::Malformed { .. })
        ));
        assert!(matches!(
            parse_import(r#"{"stations":[{"name":"no url"}]}"#),
            Err(ImportError::Malformed { .. })
        ));
        assert!(matches!(parse_import(r#"{"stations":[]}"#), Err(ImportError::Empty)));
    }

    #[test]
    fn share_payload_uses_compact_keys_and_skips_stations_without_ids() {
        let stations = vec![
            station_with_uuid("A", "http://a:8000/live", "u-a"),
            station("Local", "http://local:8000/live"),
        ];
        let payload = SharePayload::from_stations("Alex", &stations).unwrap();
        assert_eq!(payload.encode().unwrap(), r#"{"u":"Alex","i":["u-a"]}"#);
        assert!(SharePayload::from_stations("Alex", &stations[1..]).is_none());
    }

    #[tokio::test]
    async fn share_resolution_skips_unknown_ids() {
        let known = station_with_uuid("A", "http://a:8000/live", "u-a");
        let directory = FakeDirectory::with_uuids(&[known.clone()]);
        let payload = SharePayload::decode(r#"{"u":"Alex","i":["u-a","gone"]}"#).unwrap();
        let stations = payload.resolve(&directory).await.unwrap();
        assert_eq!(stations, vec![known]);
    }

    #[tokio::test]
    async fn share_resolving_nothing_is_an_error() {
        let directory = FakeDirectory::default();
        let payload = SharePayload::decode(r#"{"u":"Alex","i":["gone"]}"#).unwrap();
        assert!(matches!(
            payload.resolve(&directory).await,
            Err(ImportError::NoStationsResolved)
        ));
    }

    #[test]
    fn write_export_refuses_empty_list_and_writes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("radio-stations.json");
        assert!(write_export(&path, &[]).is_err());
        write_export(&path, &[station("A", "http://a:8000/live")]).unwrap();
        let back = parse_import(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let urls: HashSet<String> = back.into_iter().map(|s| s.url).collect();
        assert!(urls.contains("http://a:8000/live"));
    }

    #[test]
    fn parses_import_modes() {
        assert_eq!("Replace".parse::<ImportMode>().unwrap(), ImportMode::Replace);
        assert_eq!("new".parse::<ImportMode>().unwrap(), ImportMode::NewList);
        assert!("overwrite".parse::<ImportMode>().is_err());
    }
}
