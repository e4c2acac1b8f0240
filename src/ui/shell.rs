//! Line-oriented front-end. Each input line becomes a controller command;
//! state snapshots coming back are rendered as they change.

use crate::controller::{ControllerHandle, ControllerState, PlaybackPhase, UiCommand};
use crate::models::{Station, StationDraft};
use crate::transfer::ImportMode;
use anyhow::Result;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_EXPORT_FILE: &str = "radio-stations.json";

const HELP: &str = "\
commands:
  search <query>            search the directory now
  type <query>              search as you type (debounced)
  close                     close search results
  results | stations | lists | status
  add <n>                   save search result n
  add <url> [name]          save a station by url
  rm <n> | clear            remove saved station n | remove all
  play <n> | lplay <l> <n>  play saved station n | station n of list l
  toggle | stop             pause/resume | stop
  preview <n>               preview search result n (again to stop)
  vol <0-100>
  export [path]
  import <path> [replace|merge|new] [sharer]
  share                     show a share code for your stations
  receive <replace|merge|new> <code>
  rmlist <l> | lrm <l> <n>  delete list l | remove station n from list l
  name <username> | theme <light|dark|system>
  help | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Results,
    Stations,
    Lists,
    Status,
}

#[derive(Debug, Clone)]
pub enum ShellAction {
    Send(UiCommand),
    Show(View),
    Help,
    Quit,
    Nothing,
}

/// Parses one input line. Numbers are 1-based indexes into what the last
/// state snapshot showed.
pub fn parse_line(line: &str, state: &ControllerState) -> Result<ShellAction, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let send = |cmd: UiCommand| -> Result<ShellAction, String> { Ok(ShellAction::Send(cmd)) };

    match word.to_ascii_lowercase().as_str() {
        "" => Ok(ShellAction::Nothing),
        "search" => send(UiCommand::SearchSubmit(rest.to_string())),
        "type" => send(UiCommand::SearchInput(rest.to_string())),
        "close" => send(UiCommand::CloseResults),
        "results" => Ok(ShellAction::Show(View::Results)),
        "stations" | "ls" => Ok(ShellAction::Show(View::Stations)),
        "lists" => Ok(ShellAction::Show(View::Lists)),
        "status" => Ok(ShellAction::Show(View::Status)),
        "add" => {
            if rest.contains("://") {
                let (url, name) = match rest.split_once(char::is_whitespace) {
                    Some((u, n)) => (u, n.trim()),
                    None => (rest, ""),
                };
                send(UiCommand::AddStation(StationDraft::new(name, url)))
            } else {
                let st = pick(&state.search_results, rest, "search result")?;
                send(UiCommand::AddStation(StationDraft::from(st.clone())))
            }
        }
        "rm" => {
            let st = pick(&state.stations, rest, "station")?;
            send(UiCommand::RemoveStation(st.url.clone()))
        }
        "clear" => send(UiCommand::ClearStations),
        "play" => {
            let st = pick(&state.stations, rest, "station")?;
            send(UiCommand::PlayStation(st.url.clone()))
        }
        "lplay" => {
            let (_, st) = pick_in_list(state, rest)?;
            send(UiCommand::PlayStation(st.url.clone()))
        }
        "toggle" | "pause" => send(UiCommand::TogglePause),
        "stop" => send(UiCommand::Stop),
        "preview" => {
            let st = pick(&state.search_results, rest, "search result")?;
            send(UiCommand::Preview(st.url.clone()))
        }
        "vol" | "volume" => {
            let v: u8 = rest
                .parse()
                .ok()
                .filter(|v| *v <= 100)
                .ok_or_else(|| "volume must be 0-100".to_string())?;
            send(UiCommand::SetVolume(v))
        }
        "export" => {
            let path = if rest.is_empty() { DEFAULT_EXPORT_FILE } else { rest };
            send(UiCommand::Export(PathBuf::from(path)))
        }
        "import" => {
            let mut parts = rest.split_whitespace();
            let path = parts.next().ok_or("usage: import <path> [mode] [sharer]")?;
            let mode = match parts.next() {
                Some(m) => m.parse::<ImportMode>()?,
                None => ImportMode::Merge,
            };
            let sharer = parts.collect::<Vec<_>>().join(" ");
            send(UiCommand::ImportFile {
                path: PathBuf::from(path),
                mode,
                sharer: (!sharer.is_empty()).then_some(sharer),
            })
        }
        "share" => send(UiCommand::ShareCode),
        "receive" => {
            let (mode, payload) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: receive <mode> <code>")?;
            send(UiCommand::ImportShare {
                payload: payload.trim().to_string(),
                mode: mode.parse()?,
            })
        }
        "rmlist" => {
            let index = parse_index(rest, state.lists.len(), "list")?;
            send(UiCommand::RemoveList(index))
        }
        "lrm" => {
            let (list, st) = pick_in_list(state, rest)?;
            send(UiCommand::RemoveFromList {
                list,
                url: st.url.clone(),
            })
        }
        "name" => send(UiCommand::SetUsername(rest.to_string())),
        "theme" => send(UiCommand::SetTheme(rest.parse()?)),
        "help" | "?" => Ok(ShellAction::Help),
        "quit" | "exit" => Ok(ShellAction::Quit),
        other => Err(format!("unknown command: {other} (try help)")),
    }
}

fn parse_index(raw: &str, len: usize, what: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Ok(n - 1),
        _ if len == 0 => Err(format!("no {what}s to choose from")),
        _ => Err(format!("pick a {what} between 1 and {len}")),
    }
}

fn pick<'a>(items: &'a [Station], raw: &str, what: &str) -> Result<&'a Station, String> {
    parse_index(raw, items.len(), what).map(|i| &items[i])
}

fn pick_in_list<'a>(state: &'a ControllerState, raw: &str) -> Result<(usize, &'a Station), String> {
    let (l, n) = raw
        .split_once(char::is_whitespace)
        .ok_or("usage: <list> <n>")?;
    let list = parse_index(l, state.lists.len(), "list")?;
    let st = pick(&state.lists[list].stations, n, "station")?;
    Ok((list, st))
}

pub fn render_view(view: View, state: &ControllerState) -> String {
    match view {
        View::Results => {
            if state.search_results.is_empty() {
                return "no search results".to_string();
            }
            numbered(&state.search_results)
        }
        View::Stations => {
            if state.stations.is_empty() {
                return "no saved stations, add some from search".to_string();
            }
            numbered(&state.stations)
        }
        View::Lists => {
            if state.lists.is_empty() {
                return "no station lists".to_string();
            }
            state
                .lists
                .iter()
                .enumerate()
                .map(|(i, l)| format!("{:>2}. {}\n{}", i + 1, l.name, numbered(&l.stations)))
                .collect::<Vec<_>>()
                .join("\n")
        }
        View::Status => status_line(state),
    }
}

fn numbered(stations: &[Station]) -> String {
    stations
        .iter()
        .enumerate()
        .map(|(i, st)| {
            let sub = st.subtitle();
            if sub.is_empty() {
                format!("{:>4}. {}", i + 1, st.name)
            } else {
                format!("{:>4}. {}  ({sub})", i + 1, st.name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn status_line(state: &ControllerState) -> String {
    let phase = match state.phase {
        PlaybackPhase::Idle => "stopped",
        PlaybackPhase::Playing => "playing",
        PlaybackPhase::Paused => "paused",
        PlaybackPhase::Previewing => "previewing",
    };
    let mut line = format!("[{phase}] {}", state.label_text());
    if let Some(t) = state.media_title.as_deref().filter(|t| !t.trim().is_empty()) {
        line.push_str(&format!(" - {t}"));
    }
    if let Some(url) = &state.preview_url {
        line.push_str(&format!(" (preview {url})"));
    }
    line.push_str(&format!("  vol {}%  user {}  theme {}", state.volume, state.username, state.theme));
    line
}

/// Lines worth printing when the state moves from `prev` to `next`.
pub fn render_changes(prev: &ControllerState, next: &ControllerState) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(e) = next.error.as_deref().filter(|e| prev.error.as_deref() != Some(*e)) {
        out.push(format!("error: {e}"));
    }
    if let Some(n) = next.notice.as_deref().filter(|n| prev.notice.as_deref() != Some(*n)) {
        out.push(n.to_string());
    }
    if next.search_loading && !prev.search_loading {
        out.push(format!("searching for \"{}\"...", next.search_query));
    }
    if next.search_results != prev.search_results && !next.search_results.is_empty() {
        out.push(render_view(View::Results, next));
    }
    if next.phase != prev.phase
        || next.station != prev.station
        || next.media_title != prev.media_title
        || next.preview_url != prev.preview_url
    {
        out.push(status_line(next));
    }
    if let Some(code) = next.share_code.as_deref().filter(|c| prev.share_code.as_deref() != Some(*c)) {
        out.push(format!("share code: {code}"));
    }
    out
}

/// Reads commands from stdin until `quit` or end of input.
pub async fn run(handle: ControllerHandle) -> Result<()> {
    let mut state_rx = handle.state_rx.clone();
    let mut state = state_rx.borrow().clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", status_line(&state));
    println!("type help for commands");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line, &state) {
                    Ok(ShellAction::Send(cmd)) => {
                        if handle.cmd_tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Ok(ShellAction::Show(view)) => println!("{}", render_view(view, &state)),
                    Ok(ShellAction::Help) => println!("{HELP}"),
                    Ok(ShellAction::Quit) => break,
                    Ok(ShellAction::Nothing) => {}
                    Err(e) => println!("{e}"),
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    if let Some(e) = &state.error {
                        println!("error: {e}");
                    }
                    break;
                }
                let next = state_rx.borrow_and_update().clone();
                for line in render_changes(&state, &next) {
                    println!("{line}");
                }
                state = next;
            }
        }
    }
    Ok(())
}
