mod api;
mod app;
mod config;
mod conversation;
mod error;
mod logging;
mod paths;
mod render;
mod session;
mod stream;
mod timeline;
mod tree;

use crate::api::ApiClient;
use crate::app::{App, TurnUpdate};
use crate::config::Config;
use crate::render::LiveView;
use crate::session::Session;
use crate::timeline::scheduler::FrameScheduler;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "canopy", version)]
#[command(about = "Canopy — terminal client for branching multi-agent conversations", long_about = None)]
struct Cli {
    /// Backend base URL (overrides [server] base_url)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store an access token for the backend
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored access token
    Logout,
    /// List conversations
    #[command(alias = "ls")]
    Conversations,
    /// Print the active branch of a conversation
    Show {
        id: String,

        /// Show the branch ending at this message
        #[arg(long)]
        leaf: Option<String>,

        /// Switch branch at this message (use with --offset)
        #[arg(long, requires = "offset")]
        at: Option<String>,

        /// Sibling offset for --at (e.g. 1 for next, -1 for previous)
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<isize>,

        /// Print reasoning in full
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
    /// List artifacts of a conversation
    Artifacts { id: String },
    /// Send a message and stream the agents' work
    Chat {
        /// Continue this conversation (a new one is created if omitted)
        #[arg(long)]
        conversation: Option<String>,

        /// Attach to this message instead of the end of the active branch
        #[arg(long, requires = "conversation")]
        parent: Option<String>,

        /// Print reasoning in full
        #[arg(short, long, default_value_t = false)]
        verbose: bool,

        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let (mut config, config_path) = Config::load_with_path().unwrap_or_else(|e| {
        eprintln!("Warning: failed to load config, using defaults: {e}");
        (Config::default(), None)
    });

    let cli = Cli::parse();
    if let Some(server) = cli.server.clone() {
        config.server.base_url = server;
        config.validate()?;
    }

    // The live view owns the terminal during chat.
    let suppress_stdout = matches!(cli.cmd, Command::Chat { .. });
    let log_dir = match logging::setup_tracing_with_settings(logging::LoggingSettings {
        level: config.logging.level.as_deref(),
        directory: config.logging.directory.as_deref(),
        retention_days: config.logging.retention_days,
        suppress_stdout,
    }) {
        Ok(path) => Some(path),
        Err(err) => {
            eprintln!("Failed to initialize logging: {err}");
            None
        }
    };
    match config_path.as_ref() {
        Some(path) => tracing::debug!("Config File: {}", path.display()),
        None => tracing::debug!("Config File: (default)"),
    }
    if let Some(dir) = log_dir.as_ref() {
        tracing::debug!("Log Directory: {}", dir.display());
    }

    let session = Session::load(&paths::session_file());

    match cli.cmd {
        Command::Login { token } => {
            session.set_token(token)?;
            println!("Logged in to {}", config.server.base_url);
        }
        Command::Logout => {
            let api = ApiClient::new(&config.server.base_url, session);
            let mut app = App::new(api, FrameScheduler::default());
            app.logout();
            println!("Logged out");
        }
        Command::Conversations => {
            require_login(&session)?;
            let api = ApiClient::new(&config.server.base_url, session);
            let mut app = App::new(api, FrameScheduler::default());
            let api = app.api().clone();
            let listed = app.conversation_mut().refresh_list(&api).await;
            listed.map_err(|e| user_error(&app, e))?;
            let conversations = app.conversation().conversations();
            if conversations.is_empty() {
                println!("No conversations yet.");
            }
            for line in render::render_conversations(conversations) {
                println!("{line}");
            }
        }
        Command::Show {
            id,
            leaf,
            at,
            offset,
            verbose,
        } => {
            require_login(&session)?;
            let api = ApiClient::new(&config.server.base_url, session);
            let mut app = App::new(api, FrameScheduler::default());
            let opened = app.open_conversation(&id).await;
            opened.map_err(|e| user_error(&app, e))?;
            if let Some(leaf) = leaf {
                if !app.conversation_mut().set_active_leaf(Some(leaf.clone())) {
                    bail!("Message {leaf} is not part of conversation {id}");
                }
            }
            if let (Some(at), Some(offset)) = (at, offset) {
                if app.conversation_mut().switch_branch(&at, offset).is_none() {
                    bail!("No sibling {offset:+} of message {at}");
                }
            }
            if let Some(title) = app.conversation().title() {
                println!("# {title}");
            }
            let path = app.conversation().active_path();
            for line in render::render_blocks(&render::path_blocks(&path), verbose) {
                println!("{line}");
            }
        }
        Command::Artifacts { id } => {
            require_login(&session)?;
            let api = ApiClient::new(&config.server.base_url, session);
            let mut app = App::new(api, FrameScheduler::default());
            let opened = app.open_conversation(&id).await;
            opened.map_err(|e| user_error(&app, e))?;
            let artifacts = app.conversation().artifacts();
            if artifacts.is_empty() {
                println!("No artifacts.");
            }
            for line in render::render_artifacts(artifacts) {
                println!("{line}");
            }
        }
        Command::Chat {
            conversation,
            parent,
            verbose,
            text,
        } => {
            require_login(&session)?;
            let api = ApiClient::new(&config.server.base_url, session);
            let scheduler =
                FrameScheduler::new(Duration::from_millis(config.stream.frame_interval_ms));
            let mut app = App::new(api, scheduler);
            run_chat(&mut app, conversation, parent, &text, verbose).await?;
        }
    }

    Ok(())
}

fn require_login(session: &Session) -> Result<()> {
    if !session.is_authenticated() {
        bail!("Not logged in. Run `canopy login --token <TOKEN>` first.");
    }
    Ok(())
}

fn user_error(app: &App, err: error::ClientError) -> anyhow::Error {
    if app.session_expired() {
        anyhow::anyhow!("Session expired. Run `canopy login --token <TOKEN>` again.")
    } else {
        anyhow::Error::new(err)
    }
}

async fn run_chat(
    app: &mut App,
    conversation: Option<String>,
    parent: Option<String>,
    text: &str,
    verbose: bool,
) -> Result<()> {
    let mut out = std::io::stdout();
    let mut view = LiveView::new();

    if let Some(id) = conversation.as_deref() {
        let opened = app.open_conversation(id).await;
        opened.map_err(|e| user_error(app, e))?;
        let path = match parent.as_deref() {
            Some(p) => app.conversation().visible_path(Some(p)),
            None => app.conversation().active_path(),
        };
        for line in render::render_blocks(&render::path_blocks(&path), verbose) {
            writeln!(out, "{line}")?;
        }
    }

    let sent = app.send_message(text, parent).await;
    sent.map_err(|e| user_error(app, e))?;
    draw(app, &mut view, &mut out, verbose)?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let flush_in = app.timeline().time_until_flush(Instant::now());
        let update = tokio::select! {
            _ = &mut ctrl_c => {
                app.stop();
                draw(app, &mut view, &mut out, verbose)?;
                writeln!(out, "(stopped)")?;
                return Ok(());
            }
            _ = tokio::time::sleep(flush_in.unwrap_or(Duration::ZERO)), if flush_in.is_some() => {
                if app.tick(Instant::now()) {
                    draw(app, &mut view, &mut out, verbose)?;
                }
                continue;
            }
            update = app.pump() => update,
        };

        let Some(update) = update else {
            if app.timeline().is_active() {
                bail!("Connection lost");
            }
            return Ok(());
        };

        match update {
            TurnUpdate::Event | TurnUpdate::Closed => draw(app, &mut view, &mut out, verbose)?,
            TurnUpdate::PermissionRequired => {
                draw(app, &mut view, &mut out, verbose)?;
                view.commit();
                let tool = app
                    .timeline()
                    .permission_request()
                    .map(|r| r.tool_name.clone())
                    .unwrap_or_default();
                write!(out, "Allow {tool}? [y/N] ")?;
                out.flush()?;
                let answer = tokio::select! {
                    _ = &mut ctrl_c => {
                        writeln!(out)?;
                        app.stop();
                        writeln!(out, "(stopped)")?;
                        return Ok(());
                    }
                    line = stdin.next_line() => line?.unwrap_or_default(),
                };
                let approved = matches!(answer.trim(), "y" | "Y" | "yes");
                let resumed = app.resume_permission(approved).await;
                resumed.map_err(|e| user_error(app, e))?;
            }
            TurnUpdate::Completed { message_id } => {
                let mut lines = Vec::new();
                if let Some(segments) = message_id.as_deref().and_then(|id| app.timeline().snapshot(id)) {
                    lines.extend(render::render_snapshot(segments));
                }
                let path = app.conversation().active_path();
                if let Some(last) = path.last() {
                    lines.extend(render::render_blocks(
                        &render::path_blocks(std::slice::from_ref(last)),
                        verbose,
                    ));
                }
                view.redraw(&mut out, &lines)?;
                if let Some(id) = app.conversation().conversation_id() {
                    writeln!(out, "(conversation {id})")?;
                }
                return Ok(());
            }
            TurnUpdate::Failed { error } => {
                draw(app, &mut view, &mut out, verbose)?;
                if app.session_expired() {
                    bail!("Session expired. Run `canopy login --token <TOKEN>` again.");
                }
                bail!("Turn failed: {error}");
            }
            TurnUpdate::Stopped => {
                draw(app, &mut view, &mut out, verbose)?;
                return Ok(());
            }
        }
    }
}

fn draw(app: &App, view: &mut LiveView, out: &mut impl Write, verbose: bool) -> Result<()> {
    let lines = render::render_blocks(&render::timeline_blocks(app.timeline()), verbose);
    view.redraw(out, &lines).context("failed to write to terminal")?;
    Ok(())
}
