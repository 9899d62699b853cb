use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::*;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pollcast::config::RelayConfig;
use pollcast::consumer::{ChangeConsumer, ConsumeOptions, ConsumerState};
use pollcast::normalize::{MessageFormat, Normalizer};
use pollcast::polls::PollClient;
use pollcast::relay::Relay;
use pollcast::server::{self, AppState};
use pollcast::storage::ChangeLog;

#[derive(Parser)]
#[command(name = "pollcast")]
#[command(
    about = "Relays poll change events from a RabbitMQ fanout exchange to WebSocket subscribers",
    version
)]
struct Cli {
    /// Address to serve HTTP and WebSocket clients on
    #[arg(default_value = "127.0.0.1:8000")]
    addr: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = RelayConfig::from_env()?;

    println!("{}", "📡 Starting poll change relay...".cyan().bold());

    let changelog = Arc::new(match &config.log_path {
        Some(path) => ChangeLog::new(path, config.log_key.as_str(), config.log_capacity)?,
        None => ChangeLog::in_memory(config.log_key.as_str(), config.log_capacity)?,
    });

    let relay = Relay::new(&config.channel, config.relay_buffer);
    let normalizer = Normalizer::new(relay.clone(), Some(changelog.clone()), MessageFormat::Json);

    let consumer = Arc::new(ChangeConsumer::new(config.amqp_uri(), {
        let mut options = ConsumeOptions::fanout(config.exchange.as_str());
        options.ack_mode = config.ack_mode;
        options
    }));

    // Tell live sessions when the broker connection drops out of Consuming;
    // each gets a final notice while the consumer rebuilds in the background.
    let mut consumer_states = consumer.state_watch();
    let loss_relay = relay.clone();
    tokio::spawn(async move {
        let mut was_consuming = false;
        loop {
            let state = *consumer_states.borrow_and_update();
            if was_consuming && state != ConsumerState::Consuming {
                warn!("broker connection lost, notifying live sessions");
                loss_relay.shutdown();
            }
            was_consuming = state == ConsumerState::Consuming;
            if consumer_states.changed().await.is_err() {
                break;
            }
        }
    });

    let consumer_task = {
        let consumer = consumer.clone();
        let normalizer = normalizer.clone();
        tokio::spawn(async move {
            consumer
                .run(move |body| {
                    let normalizer = normalizer.clone();
                    async move { normalizer.handle(body).await }
                })
                .await
        })
    };

    println!(
        "{} Consuming change events from exchange `{}`",
        "✓".green(),
        config.exchange.bright_yellow()
    );

    let state = AppState {
        relay: relay.clone(),
        changelog,
        polls: PollClient::new(&config.poll_api_url)?,
    };

    tokio::select! {
        result = server::serve(&cli.addr, state) => result?,
        _ = tokio::signal::ctrl_c() => {
            println!("{}", "Shutting down...".yellow());
            consumer.close();
            relay.shutdown();
            let _ = consumer_task.await;
        }
    }

    Ok(())
}
