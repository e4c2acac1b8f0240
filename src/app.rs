use crate::config::AppConfig;
use crate::directory::StationDirectory;
use crate::error::{StoreError, UsernameError};
use crate::models::{Station, StationDraft, StationList};
use crate::playback::PlaybackController;
use crate::profile::{self, Theme, UsernamePolicy};
use crate::sink::SinkFactory;
use crate::storage::KeyValueStore;
use crate::store::StationStore;
use crate::transfer::{self, ImportMode, ImportSummary, SharePayload};
use crate::validator::StreamProber;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Everything the front-end talks to, constructed explicitly so each test
/// can build an isolated instance.
pub struct AppContext {
    config: AppConfig,
    storage: Arc<dyn KeyValueStore>,
    store: StationStore,
    playback: PlaybackController,
    directory: Arc<dyn StationDirectory>,
    prober: Arc<dyn StreamProber>,
    policy: UsernamePolicy,
    username: String,
    theme: Theme,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn KeyValueStore>,
        sinks: Arc<dyn SinkFactory>,
        directory: Arc<dyn StationDirectory>,
        prober: Arc<dyn StreamProber>,
    ) -> Result<Self> {
        let store = StationStore::open(storage.clone());
        let playback = PlaybackController::new(
            sinks,
            config.playback.preview_volume,
            config.playback.initial_volume,
        )?;
        let policy = UsernamePolicy::new(&config.identity);
        let username = profile::load_or_create_username(storage.as_ref(), &policy);
        let theme = profile::load_theme(storage.as_ref());
        Ok(Self {
            config,
            storage,
            store,
            playback,
            directory,
            prober,
            policy,
            username,
            theme,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &StationStore {
        &self.store
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackController {
        &mut self.playback
    }

    pub fn directory(&self) -> Arc<dyn StationDirectory> {
        self.directory.clone()
    }

    pub fn prober(&self) -> Arc<dyn StreamProber> {
        self.prober.clone()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn stations(&self) -> &[Station] {
        self.store.stations()
    }

    pub fn lists(&self) -> &[StationList] {
        self.store.lists()
    }

    /// Looks a url up in the main list first, then in the named lists.
    pub fn find_station(&self, url: &str) -> Option<Station> {
        self.store
            .find(url)
            .or_else(|| {
                self.store
                    .lists()
                    .iter()
                    .flat_map(|l| l.stations.iter())
                    .find(|s| s.url == url)
            })
            .cloned()
    }

    pub fn add_station(&mut self, draft: StationDraft) -> Result<Station, StoreError> {
        self.store.add(draft).cloned()
    }

    /// Stops playback first when the removed station is the current one, so
    /// the player never points at a station that is gone.
    pub fn remove_station(&mut self, url: &str) -> Option<Station> {
        if self.is_current(url) {
            self.playback.stop_main();
        }
        self.store.remove(url)
    }

    pub fn clear_stations(&mut self) {
        if self.playback.current_station().is_some() {
            self.playback.stop_main();
        }
        self.store.clear();
    }

    pub fn remove_list(&mut self, index: usize) -> Option<StationList> {
        let removed = self.store.remove_list(index)?;
        self.stop_if_orphaned();
        Some(removed)
    }

    pub fn remove_from_list(&mut self, list_index: usize, url: &str) -> Option<Station> {
        let removed = self.store.remove_from_list(list_index, url)?;
        self.stop_if_orphaned();
        Some(removed)
    }

    pub fn import(&mut self, mode: ImportMode, incoming: Vec<Station>, sharer: &str) -> ImportSummary {
        if mode == ImportMode::Replace {
            let kept = self
                .playback
                .current_station()
                .is_some_and(|cur| incoming.iter().any(|s| s.url == cur.url));
            if !kept && self.playback.current_station().is_some() {
                self.playback.stop_main();
            }
        }
        let summary = transfer::reconcile(&mut self.store, mode, incoming, sharer);
        info!(?mode, received = summary.received, added = summary.added, "import applied");
        summary
    }

    pub fn share_payload(&self) -> Option<SharePayload> {
        SharePayload::from_stations(&self.username, self.store.stations())
    }

    pub fn set_username(&mut self, name: &str) -> Result<&str, UsernameError> {
        self.username = profile::set_username(self.storage.as_ref(), &self.policy, name)?;
        Ok(&self.username)
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
        profile::save_theme(self.storage.as_ref(), theme);
    }

    fn is_current(&self, url: &str) -> bool {
        self.playback
            .current_station()
            .is_some_and(|cur| cur.url == url)
    }

    fn stop_if_orphaned(&mut self) {
        let orphaned = self
            .playback
            .current_station()
            .is_some_and(|cur| self.find_station(&cur.url).is_none());
        if orphaned {
            self.playback.stop_main();
        }
    }
}
