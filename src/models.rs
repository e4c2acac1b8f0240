use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_NAME: &str = "Unknown Station";
pub const DEFAULT_TAGS: &str = "No tags available";
pub const DEFAULT_COUNTRY: &str = "Unknown";

/// A saved or searchable radio station. Identified by `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StationDraft")]
pub struct Station {
    pub name: String,
    pub url: String,
    pub tags: String,
    pub bitrate: Bitrate,
    pub countrycode: String,
    pub favicon: String,
    pub homepage: String,
    pub votes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stationuuid: Option<String>,
}

/// Partial station record as it arrives from the directory API, an import
/// file, or a hand-built search result. Empty strings count as missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StationDraft {
    pub name: Option<String>,
    pub url: Option<String>,
    pub url_resolved: Option<String>,
    pub tags: Option<String>,
    pub bitrate: Option<Bitrate>,
    #[serde(alias = "countryCode")]
    pub countrycode: Option<String>,
    pub favicon: Option<String>,
    pub homepage: Option<String>,
    pub votes: Option<u64>,
    #[serde(alias = "stationUuid")]
    pub stationuuid: Option<String>,
}

impl StationDraft {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// The stream url this draft would be stored under, if any.
    pub fn stream_url(&self) -> Option<&str> {
        non_empty(self.url.as_deref()).or_else(|| non_empty(self.url_resolved.as_deref()))
    }
}

impl Station {
    /// Fills every missing field from the default table. Returns `None` when
    /// the draft has no usable url, since url is the station's identity.
    pub fn normalize(draft: StationDraft) -> Option<Self> {
        let url = draft.stream_url()?.trim().to_string();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            name: or_default(draft.name, DEFAULT_NAME),
            url,
            tags: or_default(draft.tags, DEFAULT_TAGS),
            bitrate: draft.bitrate.unwrap_or_default(),
            countrycode: or_default(draft.countrycode, DEFAULT_COUNTRY),
            favicon: draft.favicon.unwrap_or_default(),
            homepage: draft.homepage.unwrap_or_default(),
            votes: draft.votes.unwrap_or(0),
            stationuuid: draft
                .stationuuid
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        })
    }

    pub fn subtitle(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Bitrate::Kbps(br) = self.bitrate {
            parts.push(format!("{br} kbps"));
        }
        if self.countrycode != DEFAULT_COUNTRY {
            parts.push(self.countrycode.clone());
        }
        if self.votes > 0 {
            parts.push(format!("♥ {}", self.votes));
        }
        parts.join(" · ")
    }
}

impl TryFrom<StationDraft> for Station {
    type Error = String;

    fn try_from(draft: StationDraft) -> Result<Self, Self::Error> {
        Station::normalize(draft).ok_or_else(|| "station is missing its url".to_string())
    }
}

impl From<Station> for StationDraft {
    fn from(s: Station) -> Self {
        Self {
            name: Some(s.name),
            url: Some(s.url),
            url_resolved: None,
            tags: Some(s.tags),
            bitrate: Some(s.bitrate),
            countrycode: Some(s.countrycode),
            favicon: Some(s.favicon),
            homepage: Some(s.homepage),
            votes: Some(s.votes),
            stationuuid: s.stationuuid,
        }
    }
}

/// Stream bitrate in kbps. Stored as a number, or `"N/A"` when unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawBitrate", into = "RawBitrate")]
pub enum Bitrate {
    Kbps(u32),
    #[default]
    NotAvailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawBitrate {
    Int(u64),
    Float(f64),
    Text(String),
}

impl From<RawBitrate> for Bitrate {
    fn from(raw: RawBitrate) -> Self {
        let kbps = match raw {
            RawBitrate::Int(n) => u32::try_from(n).ok(),
            RawBitrate::Float(f) if f.is_finite() && f >= 1.0 && f <= f64::from(u32::MAX) => {
                Some(f.round() as u32)
            }
            RawBitrate::Float(_) => None,
            RawBitrate::Text(t) => t.trim().parse::<u32>().ok(),
        };
        match kbps {
            Some(n) if n > 0 => Bitrate::Kbps(n),
            _ => Bitrate::NotAvailable,
        }
    }
}

impl From<Bitrate> for RawBitrate {
    fn from(b: Bitrate) -> Self {
        match b {
            Bitrate::Kbps(n) => RawBitrate::Int(u64::from(n)),
            Bitrate::NotAvailable => RawBitrate::Text("N/A".to_string()),
        }
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bitrate::Kbps(n) => write!(f, "{n} kbps"),
            Bitrate::NotAvailable => f.write_str("N/A"),
        }
    }
}

/// A named collection kept alongside the main list, usually from an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationList {
    pub name: String,
    pub stations: Vec<Station>,
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn or_default(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}
