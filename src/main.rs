mod app;
mod config;
mod controller;
mod debounce;
mod directory;
mod error;
mod models;
mod mpv;
mod playback;
mod profile;
mod sink;
mod storage;
mod store;
#[cfg(test)]
mod test_fixtures;
mod transfer;
mod ui;
mod validator;

use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let controller = controller::start_controller();
    ui::shell::run(controller).await
}
