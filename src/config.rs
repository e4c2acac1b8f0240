use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_result_limit")]
    pub result_limit: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    #[serde(default = "default_preview_volume")]
    pub preview_volume: f32,
    #[serde(default = "default_initial_volume")]
    pub initial_volume: u8,
    #[serde(default = "default_mpv_binary")]
    pub mpv_binary: String,
}

/// Username rules. The denylist is plain data matched by substring.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            result_limit: default_result_limit(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            start_timeout_ms: default_start_timeout_ms(),
            preview_volume: default_preview_volume(),
            initial_volume: default_initial_volume(),
            mpv_binary: default_mpv_binary(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
        }
    }
}

impl SearchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl PlaybackConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("Failed to read config: {path:?}")),
        };
        let text = String::from_utf8_lossy(&bytes);
        toml::from_str(&text).with_context(|| format!("Invalid config TOML: {path:?}"))
    }
}

fn config_path() -> Result<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config"))
        })
        .context("Could not determine XDG config directory")?;
    Ok(base.join("airwaves").join("config.toml"))
}

fn default_base_url() -> String {
    "https://at1.api.radio-browser.info".to_string()
}

fn default_result_limit() -> u32 {
    10
}

fn default_user_agent() -> String {
    format!("Airwaves/{} (terminal radio)", env!("CARGO_PKG_VERSION"))
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_start_timeout_ms() -> u64 {
    10_000
}

fn default_preview_volume() -> f32 {
    0.5
}

fn default_initial_volume() -> u8 {
    100
}

fn default_mpv_binary() -> String {
    "mpv".to_string()
}

fn default_denylist() -> Vec<String> {
    [
        "admin", "moderator", "official", "support", "staff", "root", "fuck", "shit", "bitch",
        "cunt", "nazi",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load_from(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.directory.result_limit, 10);
        assert_eq!(cfg.search.debounce(), Duration::from_millis(500));
        assert_eq!(cfg.playback.probe_timeout(), Duration::from_secs(5));
        assert!((cfg.playback.preview_volume - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            "[search]\ndebounce_ms = 250\n\n[identity]\ndenylist = [\"dj\"]\n",
        )
        .unwrap();
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.search.debounce_ms, 250);
        assert_eq!(cfg.identity.denylist, vec!["dj".to_string()]);
        assert_eq!(cfg.directory.base_url, default_base_url());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[search\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }
}
