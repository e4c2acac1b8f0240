use anyhow::{anyhow, Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const STATIONS_KEY: &str = "stations";
pub const LISTS_KEY: &str = "station-lists";
pub const USERNAME_KEY: &str = "username";
pub const THEME_KEY: &str = "theme";

/// Process-wide durable key-value store. Each writer owns its key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// One file per key under a private data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_DATA_HOME/airwaves`, falling back to `~/.local/share/airwaves`.
    pub fn default_dir() -> Result<PathBuf> {
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })
            .context("Could not determine XDG data directory")?;
        Ok(base.join("airwaves"))
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(anyhow!("Invalid storage key: {key:?}"));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(b) => Ok(Some(String::from_utf8_lossy(&b).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {path:?}")),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        ensure_private_dir(&self.dir)?;
        write_atomic(&path, value.as_bytes())
    }
}

/// In-process store. `fail_writes` makes every `set` error, which is how
/// tests exercise best-effort persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn failing() -> Self {
        Self {
            values: Mutex::default(),
            fail_writes: true,
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes {
            return Err(anyhow!("storage quota exceeded"));
        }
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow!("memory store poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().context("Storage path has no parent")?;
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let tmp = parent.join(format!(
        ".{}.tmp.{suffix}",
        path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("value.json")
    ));

    let replaced = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp).with_context(|| format!("Create temp file: {tmp:?}"))?;
        file.write_all(data)
            .with_context(|| format!("Write temp file: {tmp:?}"))?;
        file.sync_all()
            .with_context(|| format!("Sync temp file: {tmp:?}"))?;
        drop(file);
        fs::rename(&tmp, path).with_context(|| format!("Atomic rename to: {path:?}"))
    })();
    if let Err(e) = replaced {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    let dir_file = fs::File::open(parent).with_context(|| format!("Open data dir: {parent:?}"))?;
    let _ = dir_file.sync_all();

    Ok(())
}

fn ensure_private_dir(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::create_dir_all(path).with_context(|| format!("Create data dir: {path:?}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Set permissions on data dir: {path:?}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_and_reports_missing_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path().join("data"));
        assert_eq!(store.get(STATIONS_KEY).unwrap(), None);

        store.set(STATIONS_KEY, "[]").unwrap();
        store.set(STATIONS_KEY, r#"[{"name":"a"}]"#).unwrap();
        assert_eq!(
            store.get(STATIONS_KEY).unwrap().as_deref(),
            Some(r#"[{"name":"a"}]"#)
        );
        assert!(store.dir().join("stations.json").exists());
    }

    #[test]
    fn file_store_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        store.set(THEME_KEY, "\"dark\"").unwrap();
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["theme.json".to_string()]);
    }

    #[test]
    fn failed_replace_removes_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("stations.json");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), b"x").unwrap();

        assert!(write_atomic(&target, b"[]").is_err());
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["stations.json".to_string()]);
    }

    #[test]
    fn rejects_path_like_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        assert!(store.set("../escape", "x").is_err());
    }

    #[test]
    fn failing_memory_store_errors_on_write() {
        let store = MemoryStore::failing();
        assert!(store.set(USERNAME_KEY, "x").is_err());
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);
    }
}
