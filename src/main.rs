use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use localchat::app::App;
use localchat::config::Config;
use localchat::tui::{self, EventHandler, Tui};
use localchat::{handler, logging, ui};

#[derive(Parser)]
#[command(name = "localchat", version)]
#[command(about = "Chat with a local OpenAI-compatible model server, streaming replies as they arrive")]
struct Cli {
    /// Base URL of the OpenAI-compatible API
    #[arg(long, env = "LOCALCHAT_BASE_URL")]
    base_url: Option<String>,

    /// Model identifier sent with each request
    #[arg(short, long, env = "LOCALCHAT_MODEL")]
    model: Option<String>,

    /// Config file (defaults to <config dir>/localchat/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log file (defaults to <cache dir>/localchat/localchat.log)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(log_path) = cli.log_file.clone().or_else(logging::default_log_path) {
        if let Err(e) = logging::init_file_logging(&log_path) {
            eprintln!("warning: logging disabled: {:#}", e);
        }
    }

    let config_path = cli.config.clone().or_else(|| Config::get_config_path().ok());
    let config = match &config_path {
        Some(path) => Config::load_from(path).unwrap_or_else(|e| {
            warn!("ignoring unreadable config: {:#}", e);
            Config::new()
        }),
        None => Config::new(),
    };

    // Flag/env beats config file beats built-in default
    let base_url = cli.base_url.unwrap_or_else(|| config.base_url().to_string());
    let model = cli.model.unwrap_or_else(|| config.model().to_string());
    info!(%base_url, %model, "starting localchat");

    let app = App::new(base_url, model, config_path);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, app).await;
    tui::restore()?;

    if let Err(e) = &result {
        warn!("exiting with error: {:#}", e);
    }
    result
}

async fn run(terminal: &mut Tui, mut app: App) -> Result<()> {
    let mut events = EventHandler::new();
    let tx = events.sender();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(&mut app, event).await?;

        // A trailing user turn asks for a reply
        app.dispatch_request(&tx);
        app.dispatch_model_list(&tx);
    }

    info!("quitting");
    Ok(())
}
