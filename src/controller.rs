use crate::app::AppContext;
use crate::config::AppConfig;
use crate::debounce::Debouncer;
use crate::directory::{RadioBrowserClient, SearchOutcome, StationDirectory};
use crate::error::ImportError;
use crate::models::{Station, StationDraft, StationList};
use crate::mpv::MpvSinkFactory;
use crate::playback::{PlaybackState, PreviewOutcome};
use crate::profile::Theme;
use crate::sink::{SinkEvent, SinkFactory, SinkRole};
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::transfer::{self, ImportMode, SharePayload};
use crate::validator::{filter_playable, SinkProber, StreamProber};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Playing,
    Paused,
    Previewing,
}

#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    pub phase: PlaybackPhase,
    pub station: Option<Station>,
    pub media_title: Option<String>,
    pub error: Option<String>,
    pub notice: Option<String>,
    pub search_query: String,
    pub search_loading: bool,
    pub search_results: Vec<Station>,
    pub preview_url: Option<String>,
    pub stations: Vec<Station>,
    pub lists: Vec<StationList>,
    pub username: String,
    pub theme: Theme,
    pub share_code: Option<String>,
    pub volume: u8,
}

impl ControllerState {
    pub fn label_text(&self) -> String {
        if let Some(st) = &self.station {
            let name = st.name.trim();
            if !name.is_empty() {
                return name.to_string();
            }
        }

        if let Some(t) = self.media_title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return t.to_string();
        }

        "radio".to_string()
    }
}

#[derive(Debug, Clone)]
pub enum UiCommand {
    /// Keystroke in the search box; debounced.
    SearchInput(String),
    /// Explicit submit; runs at once and drops any pending debounced search.
    SearchSubmit(String),
    CloseResults,
    AddStation(StationDraft),
    RemoveStation(String),
    ClearStations,
    RemoveList(usize),
    RemoveFromList { list: usize, url: String },
    PlayStation(String),
    TogglePause,
    Stop,
    Preview(String),
    SetVolume(u8),
    Export(PathBuf),
    ImportFile {
        path: PathBuf,
        mode: ImportMode,
        sharer: Option<String>,
    },
    ImportShare { payload: String, mode: ImportMode },
    ShareCode,
    SetUsername(String),
    SetTheme(Theme),
    Shutdown,
}

pub struct ControllerHandle {
    pub cmd_tx: mpsc::UnboundedSender<UiCommand>,
    pub state_rx: watch::Receiver<ControllerState>,
    _thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(UiCommand::Shutdown);
        if let Some(t) = self._thread.take() {
            let _ = t.join();
        }
    }
}

pub fn start_controller() -> ControllerHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ControllerState::default());

    let thread = std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!(error = ?e, "failed to build tokio runtime");
                return;
            }
        };
        rt.block_on(async move {
            if let Err(e) = controller_main(cmd_rx, state_tx.clone()).await {
                warn!(error = ?e, "controller exited with error");
                state_tx.send_modify(|s| s.error = Some(format!("{e:#}")));
            }
        });
    });

    ControllerHandle {
        cmd_tx,
        state_rx,
        _thread: Some(thread),
    }
}

async fn controller_main(
    cmd_rx: mpsc::UnboundedReceiver<UiCommand>,
    state_tx: watch::Sender<ControllerState>,
) -> Result<()> {
    let config = match tokio::task::spawn_blocking(AppConfig::load)
        .await
        .context("Join config load task")?
    {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = ?e, "invalid config, using defaults");
            AppConfig::default()
        }
    };

    let (sink_tx, sink_rx) = mpsc::unbounded_channel();
    let ctx = build_context(config, sink_tx)?;
    run(ctx, cmd_rx, sink_rx, state_tx).await;
    Ok(())
}

fn build_context(config: AppConfig, sink_tx: mpsc::UnboundedSender<SinkEvent>) -> Result<AppContext> {
    let data_dir = match config.storage.data_dir.clone() {
        Some(dir) => Ok(dir),
        None => FileStore::default_dir(),
    };
    let storage: Arc<dyn KeyValueStore> = match data_dir {
        Ok(dir) => {
            info!(dir = ?dir, "using station storage");
            Arc::new(FileStore::new(dir))
        }
        Err(e) => {
            warn!(error = ?e, "no data directory, stations will not persist");
            Arc::new(MemoryStore::new())
        }
    };

    let sinks: Arc<dyn SinkFactory> = Arc::new(MpvSinkFactory::new(
        config.playback.mpv_binary.clone(),
        config.playback.start_timeout(),
        sink_tx,
    )?);
    let directory: Arc<dyn StationDirectory> = Arc::new(RadioBrowserClient::new(&config.directory)?);
    let prober: Arc<dyn StreamProber> =
        Arc::new(SinkProber::new(sinks.clone(), config.playback.probe_timeout()));
    AppContext::new(config, storage, sinks, directory, prober)
}

#[derive(Debug)]
enum InternalMsg {
    SearchStarted {
        generation: u64,
    },
    SearchDone {
        generation: u64,
        outcome: SearchOutcome,
    },
    Incoming {
        mode: ImportMode,
        sharer: String,
        res: Result<Vec<Station>, ImportError>,
    },
    ExportDone {
        path: PathBuf,
        res: Result<(), String>,
    },
}

/// The controller loop. Owns the application context; every state change is
/// published through `state_tx`.
async fn run(
    mut ctx: AppContext,
    mut cmd_rx: mpsc::UnboundedReceiver<UiCommand>,
    mut sink_rx: mpsc::UnboundedReceiver<SinkEvent>,
    state_tx: watch::Sender<ControllerState>,
) {
    let mut state = state_tx.borrow().clone();
    sync_state(&ctx, &mut state);
    let _ = state_tx.send(state.clone());

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<InternalMsg>();
    let mut debouncer = Debouncer::new(ctx.config().search.debounce());
    let mut generation: u64 = 0;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("command channel closed, stopping controller");
                    stop_all(&mut ctx);
                    return;
                };
                state.error = None;
                state.notice = None;
                match cmd {
                    UiCommand::SearchInput(q) => {
                        generation += 1;
                        state.search_query = q.clone();
                        if q.trim().is_empty() {
                            debouncer.cancel();
                            state.search_results.clear();
                            state.search_loading = false;
                        } else {
                            debouncer.schedule(run_search(
                                generation,
                                q,
                                ctx.directory(),
                                ctx.prober(),
                                internal_tx.clone(),
                            ));
                        }
                    }
                    UiCommand::SearchSubmit(q) => {
                        debouncer.cancel();
                        generation += 1;
                        state.search_query = q.clone();
                        tokio::spawn(run_search(
                            generation,
                            q,
                            ctx.directory(),
                            ctx.prober(),
                            internal_tx.clone(),
                        ));
                    }
                    UiCommand::CloseResults => {
                        debouncer.cancel();
                        generation += 1;
                        state.search_results.clear();
                        state.search_loading = false;
                        ctx.playback_mut().stop_preview();
                    }
                    UiCommand::AddStation(draft) => match ctx.add_station(draft) {
                        Ok(st) => state.notice = Some(format!("Added {}", st.name)),
                        Err(e) => state.error = Some(e.to_string()),
                    },
                    UiCommand::RemoveStation(url) => {
                        if ctx.remove_station(&url).is_none() {
                            state.error = Some("Station not found".to_string());
                        }
                    }
                    UiCommand::ClearStations => ctx.clear_stations(),
                    UiCommand::RemoveList(index) => {
                        if ctx.remove_list(index).is_none() {
                            state.error = Some("List not found".to_string());
                        }
                    }
                    UiCommand::RemoveFromList { list, url } => {
                        if ctx.remove_from_list(list, &url).is_none() {
                            state.error = Some("Station not found".to_string());
                        }
                    }
                    UiCommand::PlayStation(url) => match ctx.find_station(&url) {
                        Some(station) => {
                            state.media_title = None;
                            if let Err(e) = ctx.playback_mut().play_main(station).await {
                                state.error = Some(e.to_string());
                            }
                        }
                        None => state.error = Some("Station not found".to_string()),
                    },
                    UiCommand::TogglePause => {
                        if let Err(e) = ctx.playback_mut().toggle_main().await {
                            state.error = Some(e.to_string());
                        }
                    }
                    UiCommand::Stop => {
                        ctx.playback_mut().stop_main();
                        state.media_title = None;
                    }
                    UiCommand::Preview(url) => match ctx.playback_mut().play_preview(&url).await {
                        Ok(PreviewOutcome::Started) => {}
                        Ok(PreviewOutcome::Stopped) => state.notice = Some("Preview stopped".to_string()),
                        Err(e) => state.error = Some(e.to_string()),
                    },
                    UiCommand::SetVolume(v) => ctx.playback_mut().set_volume(v),
                    UiCommand::Export(path) => {
                        if ctx.stations().is_empty() {
                            state.notice = Some("No stations to export".to_string());
                        } else {
                            let stations = ctx.stations().to_vec();
                            let tx = internal_tx.clone();
                            tokio::spawn(async move {
                                let target = path.clone();
                                let res = tokio::task::spawn_blocking(move || {
                                    transfer::write_export(&target, &stations)
                                })
                                .await
                                .map_err(|e| e.to_string())
                                .and_then(|r| r.map_err(|e| format!("{e:#}")));
                                let _ = tx.send(InternalMsg::ExportDone { path, res });
                            });
                        }
                    }
                    UiCommand::ImportFile { path, mode, sharer } => {
                        let sharer = sharer.unwrap_or_else(|| ctx.username().to_string());
                        let tx = internal_tx.clone();
                        tokio::spawn(async move {
                            let res = transfer::read_import_file(&path).await;
                            let _ = tx.send(InternalMsg::Incoming { mode, sharer, res });
                        });
                    }
                    UiCommand::ImportShare { payload, mode } => match SharePayload::decode(&payload) {
                        Ok(payload) => {
                            state.notice = Some(format!("Loading stations from {}...", payload.sharer));
                            let directory = ctx.directory();
                            let tx = internal_tx.clone();
                            tokio::spawn(async move {
                                let res = payload.resolve(directory.as_ref()).await;
                                let _ = tx.send(InternalMsg::Incoming {
                                    mode,
                                    sharer: payload.sharer,
                                    res,
                                });
                            });
                        }
                        Err(e) => state.error = Some(e.to_string()),
                    },
                    UiCommand::ShareCode => {
                        match ctx.share_payload().map(|p| p.encode()) {
                            Some(Ok(code)) => state.share_code = Some(code),
                            Some(Err(e)) => state.error = Some(format!("{e:#}")),
                            None => {
                                state.share_code = None;
                                state.notice = Some("Add stations from search to share them".to_string());
                            }
                        }
                    }
                    UiCommand::SetUsername(name) => {
                        if let Err(e) = ctx.set_username(&name) {
                            state.error = Some(e.to_string());
                        }
                    }
                    UiCommand::SetTheme(theme) => ctx.set_theme(theme),
                    UiCommand::Shutdown => {
                        stop_all(&mut ctx);
                        return;
                    }
                }
                sync_state(&ctx, &mut state);
                let _ = state_tx.send(state.clone());
            }
            Some(ev) = sink_rx.recv() => {
                match ev {
                    SinkEvent::Ended { role: SinkRole::Main, url } => {
                        if !ctx.playback_mut().on_stream_ended(&url) {
                            debug!(url = %url, "ignoring end of a stream that is not playing");
                            continue;
                        }
                        state.notice = Some("Stream ended".to_string());
                    }
                    SinkEvent::Failed { role: SinkRole::Main, url, reason } => {
                        if !ctx.playback_mut().on_stream_ended(&url) {
                            debug!(url = %url, reason = %reason, "ignoring failure of a stream that is not playing");
                            continue;
                        }
                        warn!(url = %url, reason = %reason, "main stream failed");
                        state.error = Some("Error playing station, it might be unavailable".to_string());
                    }
                    SinkEvent::Ended { role: SinkRole::Preview, url }
                    | SinkEvent::Failed { role: SinkRole::Preview, url, .. } => {
                        if !ctx.playback_mut().on_preview_ended(&url) {
                            continue;
                        }
                    }
                    SinkEvent::Title { role: SinkRole::Main, title } => {
                        state.media_title = title;
                    }
                    _ => continue,
                }
                sync_state(&ctx, &mut state);
                let _ = state_tx.send(state.clone());
            }
            Some(msg) = internal_rx.recv() => {
                match msg {
                    InternalMsg::SearchStarted { generation: g } => {
                        if g != generation {
                            continue;
                        }
                        state.search_loading = true;
                    }
                    InternalMsg::SearchDone { generation: g, outcome } => {
                        if g != generation {
                            continue;
                        }
                        state.search_loading = false;
                        match outcome {
                            SearchOutcome::Skipped => state.search_results.clear(),
                            SearchOutcome::Results(results) => {
                                if results.is_empty() {
                                    state.notice = Some("No stations found".to_string());
                                }
                                state.search_results = results;
                            }
                            SearchOutcome::Failed(msg) => {
                                state.search_results.clear();
                                state.error = Some(msg);
                            }
                        }
                    }
                    InternalMsg::Incoming { mode, sharer, res } => match res {
                        Ok(stations) => {
                            let summary = ctx.import(mode, stations, &sharer);
                            state.notice = Some(summary.message(ctx.stations().len()));
                        }
                        Err(e) => {
                            warn!(error = %e, "import failed");
                            state.error = Some(e.to_string());
                        }
                    },
                    InternalMsg::ExportDone { path, res } => match res {
                        Ok(()) => {
                            info!(path = ?path, "exported stations");
                            state.notice = Some(format!("Exported to {}", path.display()));
                        }
                        Err(e) => state.error = Some(format!("Export failed: {e}")),
                    },
                }
                sync_state(&ctx, &mut state);
                let _ = state_tx.send(state.clone());
            }
        }
    }
}

fn stop_all(ctx: &mut AppContext) {
    ctx.playback_mut().stop_preview();
    ctx.playback_mut().stop_main();
}

async fn run_search(
    generation: u64,
    query: String,
    directory: Arc<dyn StationDirectory>,
    prober: Arc<dyn StreamProber>,
    tx: mpsc::UnboundedSender<InternalMsg>,
) {
    let _ = tx.send(InternalMsg::SearchStarted { generation });
    let outcome = match directory.search(&query).await {
        SearchOutcome::Results(found) => {
            SearchOutcome::Results(filter_playable(found, prober.as_ref()).await)
        }
        other => other,
    };
    let _ = tx.send(InternalMsg::SearchDone { generation, outcome });
}

fn sync_state(ctx: &AppContext, state: &mut ControllerState) {
    let playback = ctx.playback();
    state.phase = match playback.state() {
        PlaybackState::PlayingPreview(_) => PlaybackPhase::Previewing,
        PlaybackState::PlayingMain(_) => PlaybackPhase::Playing,
        PlaybackState::Idle if playback.current_station().is_some() => PlaybackPhase::Paused,
        PlaybackState::Idle => PlaybackPhase::Idle,
    };
    state.station = playback.current_station().cloned();
    if state.station.is_none() {
        state.media_title = None;
    }
    state.preview_url = playback.preview_url().map(str::to_string);
    state.volume = playback.volume();
    state.stations = ctx.stations().to_vec();
    state.lists = ctx.lists().to_vec();
    state.username = ctx.username().to_string();
    state.theme = ctx.theme();
}
