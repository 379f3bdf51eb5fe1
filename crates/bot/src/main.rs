mod dispatch;
mod logging;
mod probe;

use core::time::Duration;
use std::{io::IsTerminal as _, path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result, anyhow};
use clap::Parser;
use futures_util::StreamExt as _;
use irc::client::prelude::{Client as IrcClient, Command as IrcCommand, Config as IrcConfig};
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::logging::init_tracing;
use crate::probe::HttpProbe;

#[derive(Parser, Debug)]
#[command(
    name = "twitbot",
    version,
    about = "IRC relay bot for a Bluesky account"
)]
struct Args {
    /// IRC server host, e.g. `irc.libera.chat`.
    #[arg(long, env = "IRC_SERVER")]
    irc_server: String,

    #[arg(long, env = "IRC_PORT", default_value_t = 6697)]
    irc_port: u16,

    #[arg(long, env = "IRC_NICK", default_value = "twitbot")]
    irc_nick: String,

    /// Channel to join, including the leading `#`.
    #[arg(long, env = "IRC_CHANNEL")]
    irc_channel: String,

    /// Connect without TLS (plaintext IRC)
    #[arg(long)]
    no_tls: bool,

    /// Bluesky PDS base URL
    #[arg(long, env = "BSKY_SERVICE", default_value = "https://bsky.social")]
    bsky_service: String,

    /// Bluesky account identifier (handle or DID)
    #[arg(long, env = "BSKY_IDENTIFIER")]
    bsky_identifier: String,

    /// Bluesky app password (if omitted, will prompt if possible)
    #[arg(long, env = "BSKY_PASSWORD")]
    bsky_password: Option<String>,

    /// SQLite file for last-seen records
    #[arg(long, env = "SEEN_DB", default_value = "./seen.db")]
    seen_db: PathBuf,

    /// Notification poll interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 60)]
    poll_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // Load .env if present so clap can pick up env vars.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let password = resolve_password(args.bsky_password.as_deref())?;

    info!(service = %args.bsky_service, identifier = %args.bsky_identifier, "Logging in to Bluesky");
    let bsky = Arc::new(
        twitbot_bsky::Client::login(&args.bsky_service, &args.bsky_identifier, &password)
            .await
            .context("bluesky login")?,
    );
    info!(handle = %bsky.handle(), "Bluesky session ready");

    let seen = twitbot_seen::SeenStore::open(&args.seen_db)
        .await
        .context("opening seen store")?;

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&bsky), seen, HttpProbe::new()?));

    let config = IrcConfig {
        nickname: Some(args.irc_nick.clone()),
        server: Some(args.irc_server.clone()),
        port: Some(args.irc_port),
        channels: vec![args.irc_channel.clone()],
        use_tls: Some(!args.no_tls),
        ..IrcConfig::default()
    };
    let mut client = IrcClient::from_config(config)
        .await
        .context("connecting to irc")?;
    client.identify().context("irc identify")?;
    let mut stream = client.stream().context("opening irc stream")?;
    let sender = client.sender();
    info!(server = %args.irc_server, channel = %args.irc_channel, "Connected");

    // Mention echoes arrive independently of chat traffic.
    {
        let dispatcher = Arc::clone(&dispatcher);
        let sender = sender.clone();
        let channel = args.irc_channel.clone();
        let mut ticker = tokio::time::interval(Duration::from_secs(args.poll_interval_secs));
        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                for line in dispatcher.poll_mentions().await {
                    if let Err(e) = sender.send_privmsg(&channel, &line) {
                        warn!(error = %e, "Failed to send mention echo");
                    }
                }
            }
        });
    }

    let own_nick = args.irc_nick.clone();
    while let Some(message) = stream.next().await.transpose().context("irc stream")? {
        let IrcCommand::PRIVMSG(ref target, ref text) = message.command else {
            continue;
        };
        if target != &args.irc_channel {
            continue;
        }
        let Some(nick) = message.source_nickname().map(ToOwned::to_owned) else {
            continue;
        };
        if nick == own_nick {
            continue;
        }
        for reply in dispatcher.handle_line(&nick, target, text).await {
            if let Err(e) = sender.send_privmsg(target, &reply) {
                warn!(error = %e, "Failed to send reply");
            }
        }
    }

    Err(anyhow!("irc stream ended"))
}

/// Treat an empty env/arg as missing; prompt only when interactive.
fn resolve_password(provided: Option<&str>) -> Result<String> {
    if let Some(p) = provided.map(str::trim).filter(|s| !s.is_empty()) {
        return Ok(p.to_owned());
    }
    if !std::io::stdin().is_terminal() {
        return Err(anyhow!(
            "No BSKY_PASSWORD provided. In non-interactive mode, set the env var or pass --bsky-password"
        ));
    }
    warn!("No password provided via --bsky-password or BSKY_PASSWORD. Prompting...");
    #[cfg(feature = "rpassword")]
    {
        rpassword::prompt_password("Bluesky app password:")
            .map_err(|e| anyhow!("Failed to read password: {e}"))
    }
    #[cfg(not(feature = "rpassword"))]
    {
        Err(anyhow!(
            "rpassword feature is not enabled. Cannot prompt for password."
        ))
    }
}
