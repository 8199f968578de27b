use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use cometpoll::config::load_config;
use cometpoll::utils::logging;
use cometpoll::{
    CometClient, CometClientDelegate, CometError, CometState, DataDelegate, Message,
    MessageCallback, Subscription, SubscriptionDelegate,
};

#[derive(Parser)]
#[command(name = "cometpoll", version, about = "Bayeux long-polling client")]
struct Cli {
    /// Overrides `client.endpoint` from the configuration.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every message delivered on a channel until Ctrl-C.
    Listen {
        #[arg(long)]
        channel: String,
    },
    /// Publish one message and disconnect.
    Publish {
        #[arg(long)]
        channel: String,
        /// JSON payload; anything that is not valid JSON is sent as a string.
        #[arg(long)]
        data: String,
    },
}

/// Logs session events.
struct ConsoleDelegate;

impl SubscriptionDelegate for ConsoleDelegate {
    fn subscription_did_succeed(&self, _client: &CometClient, subscription: &Subscription) {
        info!(channel = subscription.channel(), "subscribed");
    }

    fn subscription_did_fail(
        &self,
        _client: &CometClient,
        subscription: &Subscription,
        error: &CometError,
    ) {
        error!(channel = subscription.channel(), %error, "subscription failed");
    }
}

impl DataDelegate for ConsoleDelegate {}

impl CometClientDelegate for ConsoleDelegate {
    fn handshake_did_fail(&self, _client: &CometClient, error: &CometError) {
        error!(%error, "handshake failed");
    }

    fn connect_did_succeed(&self, client: &CometClient) {
        info!(client_id = ?client.client_id(), "connected");
    }

    fn did_fail_with_transport_error(&self, _client: &CometClient, error: &CometError) {
        error!(%error, "lost connection to server");
    }

    fn client_expired(&self, _client: &CometClient) {
        warn!("session expired");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut settings = load_config()?;
    if let Some(endpoint) = cli.endpoint {
        settings.client.endpoint = endpoint;
    }
    logging::init(&settings.logging.level);

    let client = CometClient::from_settings(&settings.client)?;
    client.schedule_on(Handle::current());
    let delegate = Arc::new(ConsoleDelegate);
    client.set_delegate(&delegate);

    match cli.command {
        Command::Listen { channel } => {
            let printer: MessageCallback =
                Arc::new(|message: &Message| match serde_json::to_string(message) {
                    Ok(line) => println!("{line}"),
                    Err(error) => warn!(%error, "cannot print message"),
                });
            client.subscribe(&channel, &printer)?;
            client.handshake()?;

            tokio::signal::ctrl_c().await?;
            info!("interrupted");
        }
        Command::Publish { channel, data } => {
            let data = serde_json::from_str(&data).unwrap_or(Value::String(data));
            let (tx, mut rx) = mpsc::unbounded_channel();
            let failed = tx.clone();

            client.handshake()?;
            client.publish_with_handlers(
                data,
                &channel,
                move |_, _, channel| {
                    let _ = tx.send(Ok(channel.to_string()));
                },
                move |_, _, _, error| {
                    let _ = failed.send(Err(error.clone()));
                },
            )?;

            let wait = Duration::from_secs(settings.client.request_timeout_secs);
            match tokio::time::timeout(wait, rx.recv()).await {
                Ok(Some(Ok(channel))) => info!(channel, "published"),
                Ok(Some(Err(error))) => error!(%error, "publish failed"),
                Ok(None) | Err(_) => error!("no answer from server"),
            }
        }
    }

    shutdown(&client, Duration::from_millis(settings.client.disconnect_timeout_ms)).await;
    Ok(())
}

async fn shutdown(client: &CometClient, timeout: Duration) {
    if client.disconnect().is_err() {
        return;
    }
    let deadline = tokio::time::Instant::now() + timeout + Duration::from_millis(100);
    while client.state() != CometState::Disconnected && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
