use crate::config::IdentityConfig;
use crate::error::UsernameError;
use crate::storage::{KeyValueStore, THEME_KEY, USERNAME_KEY};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 20;

const ADJECTIVES: &[&str] = &[
    "Happy", "Cosmic", "Mellow", "Groovy", "Electric", "Sunny", "Velvet", "Lunar", "Static",
    "Golden",
];
const NOUNS: &[&str] = &[
    "Listener", "Tuner", "Dial", "Signal", "Wave", "Antenna", "Echo", "Beat", "Groove", "Radio",
];

/// Username rules: length bound, alphanumerics and spaces, no denied words.
#[derive(Debug, Clone)]
pub struct UsernamePolicy {
    denylist: Vec<String>,
}

impl UsernamePolicy {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            denylist: config
                .denylist
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), UsernameError> {
        let name = name.trim();
        let len = name.chars().count();
        if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
            return Err(UsernameError::Length {
                min: MIN_USERNAME_CHARS,
                max: MAX_USERNAME_CHARS,
            });
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
            return Err(UsernameError::Characters);
        }
        let lower = name.to_lowercase();
        if self.denylist.iter().any(|w| lower.contains(w.as_str())) {
            return Err(UsernameError::Denied);
        }
        Ok(())
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        for _ in 0..32 {
            let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Happy");
            let noun = NOUNS.choose(rng).copied().unwrap_or("Listener");
            let candidate = format!("{adjective}{noun}{:02}", rng.gen_range(0..100));
            if self.validate(&candidate).is_ok() {
                return candidate;
            }
        }
        format!("Listener{:04}", rng.gen_range(0..10_000))
    }
}

/// Returns the stored username, generating and persisting one if it is
/// absent or no longer passes validation.
pub fn load_or_create_username(storage: &dyn KeyValueStore, policy: &UsernamePolicy) -> String {
    match storage.get(USERNAME_KEY) {
        Ok(Some(stored)) => {
            let stored = stored.trim().to_string();
            if policy.validate(&stored).is_ok() {
                return stored;
            }
            warn!("stored username is invalid, generating a new one");
        }
        Ok(None) => {}
        Err(e) => warn!(error = ?e, "failed to read username"),
    }
    let name = policy.generate(&mut rand::thread_rng());
    if let Err(e) = storage.set(USERNAME_KEY, &name) {
        warn!(error = ?e, "failed to persist username");
    }
    name
}

pub fn set_username(
    storage: &dyn KeyValueStore,
    policy: &UsernamePolicy,
    name: &str,
) -> Result<String, UsernameError> {
    policy.validate(name)?;
    let name = name.trim().to_string();
    if let Err(e) = storage.set(USERNAME_KEY, &name) {
        warn!(error = ?e, "failed to persist username");
    }
    Ok(name)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        })
    }
}

pub fn load_theme(storage: &dyn KeyValueStore) -> Theme {
    match storage.get(THEME_KEY) {
        Ok(Some(raw)) => raw.parse().unwrap_or_default(),
        Ok(None) => Theme::default(),
        Err(e) => {
            warn!(error = ?e, "failed to read theme");
            Theme::default()
        }
    }
}

pub fn save_theme(storage: &dyn KeyValueStore, theme: Theme) {
    if let Err(e) = storage.set(THEME_KEY, &theme.to_string()) {
        warn!(error = ?e, "failed to persist theme");
    }
}
