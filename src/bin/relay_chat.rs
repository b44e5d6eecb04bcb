//! Terminal consumer of the relay: asks one question, prints the streamed
//! answer as it arrives and saves the exchange as a new topic.

use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context};
use chat_relay::client::{ClientError, RelayClient, StreamOptions};
use chat_relay::models::{ChatContext, ChatMessage, Role};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_chat=info,chat_relay=info".into()),
        )
        .init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        bail!("usage: relay_chat <question>");
    }

    let base_url = std::env::var("RELAY_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
    let user_id = std::env::var("RELAY_USER_ID").ok().filter(|v| !v.trim().is_empty());
    let pacing_ms: u64 = match std::env::var("RELAY_PACING_MS") {
        Ok(v) => v.trim().parse().with_context(|| format!("RELAY_PACING_MS has invalid value '{v}'"))?,
        Err(_) => 0,
    };

    let mut client = RelayClient::new(&base_url)?;
    if let Some(user_id) = &user_id {
        client = client.with_user_id(user_id.clone());
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let question = ChatMessage::new(Role::User, prompt);
    let options = StreamOptions::paced(Duration::from_millis(pacing_ms));
    let mut stdout = std::io::stdout();

    let result = client
        .post_streaming(std::slice::from_ref(&question), &options, &cancel, |_, fragment| {
            // A closed stdout only loses the echo; the reply is still saved.
            let _ = write!(stdout, "{fragment}").and_then(|_| stdout.flush());
        })
        .await;
    println!();

    let reply = match result {
        Ok(reply) => reply,
        Err(ClientError::Cancelled) => {
            warn!("Cancelled; nothing saved");
            return Ok(());
        }
        Err(e) => return Err(e).context("streaming the reply failed"),
    };

    let topic = ChatContext::start(user_id, question, reply);
    client.save_topic(&topic).await.context("saving the topic failed")?;
    info!(
        "Saved topic {} ({})",
        topic.id.as_deref().unwrap_or_default(),
        topic.title.as_deref().unwrap_or_default()
    );
    Ok(())
}
