use anyhow::{anyhow, Context};
use augur_blocks::{BlockKind, RenderDispatcher, RenderNode};
use augur_client::{text, ChatStore, ClientConfig, ConnectionStatus, TransportClient};
use augur_config::{expand_tilde, ConfigManager};
use augur_core::Role;
use augur_observability::LogManager;
use clap::Parser;
use colored::Colorize;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "augur-chat")]
#[command(about = "Chat with an Augur gateway from the terminal")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "AUGUR_CONFIG", default_value = "~/.augur/config.json")]
    config: String,

    /// Gateway URL, overrides client.url
    #[arg(long, env = "AUGUR_GATEWAY_URL")]
    url: Option<String>,

    /// User ID, overrides client.user_id
    #[arg(long, env = "AUGUR_USER_ID")]
    user_id: Option<String>,

    /// Session to resume
    #[arg(long)]
    session_id: Option<String>,

    /// Shared secret required by the gateway
    #[arg(long, env = "AUGUR_AUTH_TOKEN")]
    token: Option<String>,

    /// Log level; logs go to stderr
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path =
        expand_tilde(&cli.config).ok_or_else(|| anyhow!("Could not resolve {}", cli.config))?;
    let manager = ConfigManager::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let config = manager.snapshot().await;

    let mut logging = config.logging.clone();
    logging.level = cli.log_level.clone();
    let _log_manager = LogManager::init(logging)?;

    let user_id = cli
        .user_id
        .or(config.client.user_id.clone())
        .ok_or_else(|| anyhow!("A user ID is required: pass --user-id or set client.user_id"))?;
    let url = cli.url.unwrap_or(config.client.url.clone());

    let mut client_config = ClientConfig::new(url, user_id).with_reconnect(
        config.client.max_reconnect_attempts,
        Duration::from_millis(config.client.reconnect_base_delay_ms),
    );
    if let Some(session_id) = cli.session_id {
        client_config = client_config.with_session_id(session_id);
    }
    if let Some(token) = cli.token.or(config.gateway.auth_token.clone()) {
        client_config = client_config.with_token(token);
    }

    let client = TransportClient::new(client_config);
    let printer = tokio::spawn(print_updates(client.subscribe(), RenderDispatcher::default()));
    let mut connection = client.connect();

    eprintln!("{}", "Type a message and press enter; /quit to exit.".dimmed());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if !line.is_empty() && !client.send(line) {
                    eprintln!("{}", "Not connected; message not sent".yellow());
                }
            }
            result = &mut connection => {
                printer.abort();
                result??;
                return Ok(());
            }
        }
    }

    client.disconnect();
    connection.await??;
    printer.abort();
    Ok(())
}

/// Print each reply as it streams, then the rest of its final render plan.
///
/// Structured blocks are printed once they close; an open block shows a
/// loading note on stderr instead of its raw sentinel text.
async fn print_updates(mut rx: watch::Receiver<ChatStore>, dispatcher: RenderDispatcher) {
    let mut shown = String::new();
    let mut seen = rx.borrow().messages.len();
    let mut status: Option<String> = None;
    let mut loading: Option<BlockKind> = None;
    let mut connection = ConnectionStatus::Disconnected;

    while rx.changed().await.is_ok() {
        let store = rx.borrow_and_update().clone();

        if store.connection != connection {
            connection = store.connection;
            eprintln!("{}", format!("[{}]", connection).dimmed());
            // A final failure is reported once, by main's error return
            if let Some(error) = store
                .connection_error
                .as_ref()
                .filter(|_| connection != ConnectionStatus::Failed)
            {
                eprintln!("{}", error.red());
            }
        }

        if store.status_text != status {
            status = store.status_text.clone();
            if let Some(note) = &status {
                eprintln!("{}", format!("... {}", note).dimmed());
            }
        }

        if store.messages.len() > seen {
            for message in &store.messages[seen..] {
                if message.role == Role::Assistant {
                    let plan = dispatcher.plan(&message.content);
                    print_suffix(&mut shown, &text::render_plan(&plan));
                    println!("\n");
                    shown.clear();
                }
            }
            seen = store.messages.len();
            loading = None;
        }

        if !store.buffer.is_empty() {
            let plan = store.streaming_plan(&dispatcher);
            print_suffix(&mut shown, &text::render_settled(&plan));

            let pending = plan.nodes.iter().find_map(|node| match node {
                RenderNode::Loading { kind } => Some(*kind),
                _ => None,
            });
            if let Some(kind) = pending.filter(|kind| loading != Some(*kind)) {
                eprintln!("{}", format!("[loading {}...]", kind).dimmed());
            }
            loading = pending;
        }
    }
}

/// Print what `rendered` adds to the text already on screen
fn print_suffix(shown: &mut String, rendered: &str) {
    let common = text::common_prefix_len(shown, rendered);
    if common < shown.len() {
        // Earlier output was revised; start the new tail on a fresh line
        println!();
    }
    print!("{}", &rendered[common..]);
    let _ = std::io::stdout().flush();
    *shown = rendered.to_string();
}
