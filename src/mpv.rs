use crate::sink::{AudioSink, SinkEvent, SinkFactory, SinkFailure, SinkRole};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum MpvCommand {
    LoadUrl { url: String },
    SetPause(bool),
    SetVolume(f64),
    Stop,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MpvEvent {
    Ready,
    MediaTitle(Option<String>),
    FileLoaded,
    EndFile(EndReason),
    Crashed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Eof,
    Error(String),
    Other,
}

#[derive(Debug, Clone)]
pub struct MpvOptions {
    pub binary: String,
    pub silent: bool,
}

#[derive(Debug)]
pub struct MpvProcess {
    cmd_tx: mpsc::UnboundedSender<MpvCommand>,
}

impl MpvProcess {
    pub fn spawn(
        socket_path: PathBuf,
        options: MpvOptions,
    ) -> (Self, mpsc::UnboundedReceiver<MpvEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_mpv(socket_path, options, cmd_rx, evt_tx));

        (Self { cmd_tx }, evt_rx)
    }

    pub fn command(&self, cmd: MpvCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| anyhow!("mpv task is not running"))
    }
}

async fn run_mpv(
    socket_path: PathBuf,
    options: MpvOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<MpvCommand>,
    evt_tx: mpsc::UnboundedSender<MpvEvent>,
) {
    let mut backoff = Duration::from_millis(200);
    loop {
        if cmd_rx.is_closed() {
            return;
        }
        match spawn_and_connect(&socket_path, &options).await {
            Ok((mut child, mut stream)) => {
                backoff = Duration::from_millis(200);
                let _ = send_observers(&mut stream).await;
                let _ = evt_tx.send(MpvEvent::Ready);
                let res = io_loop(&mut child, stream, &mut cmd_rx, &evt_tx).await;
                let _ = tokio::fs::remove_file(&socket_path).await;
                match res {
                    Ok(()) => return,
                    Err(e) => {
                        let _ = evt_tx.send(MpvEvent::Crashed(e.to_string()));
                    }
                }
            }
            Err(e) => {
                let _ = evt_tx.send(MpvEvent::Crashed(e.to_string()));
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, Duration::from_secs(5));
            }
        }
    }
}

async fn spawn_and_connect(socket_path: &Path, options: &MpvOptions) -> Result<(Child, UnixStream)> {
    let _ = tokio::fs::remove_file(socket_path).await;

    let mut cmd = Command::new(&options.binary);
    cmd.arg("--idle=yes")
        .arg("--no-terminal")
        .arg("--no-video")
        .arg("--force-window=no")
        .arg("--keep-open=no")
        .arg(format!(
            "--input-ipc-server={}",
            socket_path
                .to_str()
                .ok_or_else(|| anyhow!("Invalid socket path"))?
        ))
        .kill_on_drop(true);
    if options.silent {
        cmd.arg("--ao=null");
    }
    let mut child = cmd.spawn().context("Failed to spawn mpv")?;

    let start = tokio::time::Instant::now();
    let stream = loop {
        match UnixStream::connect(socket_path).await {
            Ok(s) => break s,
            Err(e) => {
                if start.elapsed() > Duration::from_secs(3) {
                    let _ = child.kill().await;
                    return Err(e).context("Timed out connecting to mpv IPC socket");
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    };

    Ok((child, stream))
}

async fn send_observers(stream: &mut UnixStream) -> Result<()> {
    send_json(stream, mpv_cmd(vec![
        serde_json::json!("observe_property"),
        serde_json::json!(1),
        serde_json::json!("media-title"),
    ]))
    .await?;
    Ok(())
}

async fn io_loop(
    child: &mut Child,
    stream: UnixStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<MpvCommand>,
    evt_tx: &mpsc::UnboundedSender<MpvEvent>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.context("mpv wait failed")?;
                return Err(anyhow!("mpv exited: {status}"));
            }
            maybe_line = reader.next_line() => {
                let line = maybe_line.context("mpv IPC read error")?;
                let Some(line) = line else {
                    return Err(anyhow!("mpv IPC closed"));
                };
                if let Ok(ev) = parse_event(&line) {
                    let _ = evt_tx.send(ev);
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    let _ = child.kill().await;
                    return Ok(());
                };
                let request = match cmd {
                    MpvCommand::LoadUrl { url } => mpv_cmd(vec![
                        serde_json::json!("loadfile"),
                        serde_json::json!(url),
                        serde_json::json!("replace"),
                    ]),
                    MpvCommand::SetPause(p) => mpv_cmd(vec![
                        serde_json::json!("set_property"),
                        serde_json::json!("pause"),
                        serde_json::json!(p),
                    ]),
                    MpvCommand::SetVolume(v) => mpv_cmd(vec![
                        serde_json::json!("set_property"),
                        serde_json::json!("volume"),
                        serde_json::json!(v),
                    ]),
                    MpvCommand::Stop => mpv_cmd(vec![serde_json::json!("stop")]),
                    MpvCommand::Shutdown => {
                        let _ = child.kill().await;
                        return Ok(());
                    }
                };
                send_json_half(&mut write_half, request).await?;
            }
        }
    }
}

fn mpv_cmd(command: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "command": command })
}

async fn send_json(stream: &mut UnixStream, v: serde_json::Value) -> Result<()> {
    let mut buf = serde_json::to_vec(&v).context("Serialize mpv IPC request")?;
    buf.push(b'\n');
    stream.write_all(&buf).await.context("Write mpv IPC request")?;
    Ok(())
}

async fn send_json_half(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    v: serde_json::Value,
) -> Result<()> {
    let mut buf = serde_json::to_vec(&v).context("Serialize mpv IPC request")?;
    buf.push(b'\n');
    write_half.write_all(&buf).await.context("Write mpv IPC request")?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct MpvIncoming {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    file_error: Option<String>,
}

fn parse_event(line: &str) -> Result<MpvEvent> {
    let incoming: MpvIncoming = serde_json::from_str(line).context("Invalid mpv IPC JSON")?;
    match incoming.event.as_deref() {
        Some("file-loaded") => Ok(MpvEvent::FileLoaded),
        Some("end-file") => {
            let reason = match incoming.reason.as_deref() {
                Some("eof") => EndReason::Eof,
                Some("error") => EndReason::Error(
                    incoming.file_error.unwrap_or_else(|| "unknown error".to_string()),
                ),
                _ => EndReason::Other,
            };
            Ok(MpvEvent::EndFile(reason))
        }
        Some("property-change") => match incoming.name.as_deref() {
            Some("media-title") => {
                let title = incoming
                    .data
                    .and_then(|v| v.as_str().map(|s| s.to_string()));
                Ok(MpvEvent::MediaTitle(title))
            }
            _ => Err(anyhow!("Unrecognized property-change")),
        },
        _ => Err(anyhow!("Not an event we track")),
    }
}

fn classify_file_error(message: &str) -> SinkFailure {
    let m = message.to_ascii_lowercase();
    if m.contains("unrecognized file format")
        || m.contains("no audio or video data")
        || m.contains("unsupported")
    {
        SinkFailure::Unsupported
    } else {
        SinkFailure::Network
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadStatus {
    Loaded,
    Failed(SinkFailure),
}

/// One mpv child process acting as one audio sink.
pub struct MpvSink {
    role: SinkRole,
    process: MpvProcess,
    status_tx: broadcast::Sender<LoadStatus>,
    file_active: watch::Receiver<bool>,
    loading: watch::Sender<String>,
    start_timeout: Duration,
    source: Option<String>,
    loaded: Option<String>,
    released: bool,
}

impl MpvSink {
    pub fn spawn(
        role: SinkRole,
        socket_path: PathBuf,
        options: MpvOptions,
        start_timeout: Duration,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Self {
        let (process, mpv_events) = MpvProcess::spawn(socket_path, options);
        let (status_tx, _) = broadcast::channel(16);
        let (active_tx, file_active) = watch::channel(false);
        let (loading, loading_rx) = watch::channel(String::new());
        tokio::spawn(forward_events(
            role,
            mpv_events,
            status_tx.clone(),
            active_tx,
            loading_rx,
            events,
        ));
        Self {
            role,
            process,
            status_tx,
            file_active,
            loading,
            start_timeout,
            source: None,
            loaded: None,
            released: false,
        }
    }

    fn send(&self, cmd: MpvCommand) {
        if let Err(e) = self.process.command(cmd) {
            debug!(role = self.role.as_str(), error = %e, "dropping mpv command");
        }
    }
}

async fn forward_events(
    role: SinkRole,
    mut mpv_events: mpsc::UnboundedReceiver<MpvEvent>,
    status_tx: broadcast::Sender<LoadStatus>,
    active_tx: watch::Sender<bool>,
    loading: watch::Receiver<String>,
    events: mpsc::UnboundedSender<SinkEvent>,
) {
    while let Some(ev) = mpv_events.recv().await {
        let url = loading.borrow().clone();
        match ev {
            MpvEvent::FileLoaded => {
                active_tx.send_replace(true);
                let _ = status_tx.send(LoadStatus::Loaded);
            }
            MpvEvent::EndFile(EndReason::Error(msg)) => {
                active_tx.send_replace(false);
                let _ = status_tx.send(LoadStatus::Failed(classify_file_error(&msg)));
                let _ = events.send(SinkEvent::Failed {
                    role,
                    url,
                    reason: msg,
                });
            }
            MpvEvent::EndFile(EndReason::Eof) => {
                active_tx.send_replace(false);
                let _ = events.send(SinkEvent::Ended { role, url });
            }
            MpvEvent::EndFile(EndReason::Other) => {
                active_tx.send_replace(false);
            }
            MpvEvent::Crashed(e) => {
                warn!(role = role.as_str(), error = %e, "mpv crashed/restarting");
                active_tx.send_replace(false);
                let _ = status_tx.send(LoadStatus::Failed(SinkFailure::Network));
                let _ = events.send(SinkEvent::Failed {
                    role,
                    url,
                    reason: e,
                });
            }
            MpvEvent::MediaTitle(title) => {
                let _ = events.send(SinkEvent::Title { role, title });
            }
            MpvEvent::Ready => {}
        }
    }
}

#[async_trait]
impl AudioSink for MpvSink {
    fn set_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
    }

    async fn play(&mut self) -> Result<(), SinkFailure> {
        let Some(url) = self.source.clone() else {
            return Err(SinkFailure::Unsupported);
        };
        // mpv goes idle after a stream ends, so only a still-open file can be
        // resumed by unpausing.
        if self.loaded.as_deref() == Some(url.as_str()) && *self.file_active.borrow() {
            self.send(MpvCommand::SetPause(false));
            return Ok(());
        }

        let mut status = self.status_tx.subscribe();
        self.loaded = None;
        self.loading.send_replace(url.clone());
        self.send(MpvCommand::LoadUrl { url: url.clone() });
        self.send(MpvCommand::SetPause(false));

        let wait = async {
            loop {
                match status.recv().await {
                    Ok(LoadStatus::Loaded) => return Ok(()),
                    Ok(LoadStatus::Failed(f)) => return Err(f),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(SinkFailure::Network),
                }
            }
        };
        let res = match tokio::time::timeout(self.start_timeout, wait).await {
            Ok(res) => res,
            Err(_) => Err(SinkFailure::Timeout),
        };
        match res {
            Ok(()) => self.loaded = Some(url),
            Err(_) => self.send(MpvCommand::Stop),
        }
        res
    }

    fn pause(&mut self) {
        self.send(MpvCommand::SetPause(true));
    }

    fn set_volume(&mut self, volume: f32) {
        let v = f64::from(volume.clamp(0.0, 1.0)) * 100.0;
        self.send(MpvCommand::SetVolume(v.round()));
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.loaded = None;
        self.send(MpvCommand::Shutdown);
    }
}

impl Drop for MpvSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Creates one mpv process per sink, each with its own IPC socket.
pub struct MpvSinkFactory {
    binary: String,
    runtime_dir: PathBuf,
    start_timeout: Duration,
    events: mpsc::UnboundedSender<SinkEvent>,
}

impl MpvSinkFactory {
    pub fn new(
        binary: impl Into<String>,
        start_timeout: Duration,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<Self> {
        Ok(Self {
            binary: binary.into(),
            runtime_dir: mpv_runtime_dir()?,
            start_timeout,
            events,
        })
    }
}

impl SinkFactory for MpvSinkFactory {
    fn create(&self, role: SinkRole) -> Result<Box<dyn AudioSink>> {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let socket = self
            .runtime_dir
            .join(format!("{}-{suffix}.sock", role.as_str()));
        let options = MpvOptions {
            binary: self.binary.clone(),
            silent: role == SinkRole::Probe,
        };
        Ok(Box::new(MpvSink::spawn(
            role,
            socket,
            options,
            self.start_timeout,
            self.events.clone(),
        )))
    }
}

fn mpv_runtime_dir() -> Result<PathBuf> {
    let runtime = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .context("XDG_RUNTIME_DIR not set")?;

    let dir = runtime.join("airwaves");
    std::fs::create_dir_all(&dir).with_context(|| format!("Create runtime dir: {dir:?}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("chmod 700 runtime dir: {dir:?}"))?;
    }
    Ok(dir)
}
