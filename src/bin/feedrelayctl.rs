//! CLI for querying and controlling a running feedrelay daemon.
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use feedrelay::remote::client::{RemoteClient, DEFAULT_PORT};

#[derive(Parser)]
#[command(author, version, about = "CLI interface to the feedrelay service")]
struct Args {
    /// Port where the operator service of feedrelayd is running.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Checks whether the config is valid.
    CheckConfig,
    /// Send a test message to a webhook.
    Ping { webhook_name: String },
    /// Posts the latest feed item to configured webhooks.
    PostLatest { feed_name: String },
    /// Asks the daemon to restart its dispatcher.
    Restart,
    /// Show current statistics.
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let client = RemoteClient::new(args.port);
    let result = match args.command {
        Command::CheckConfig => client.check_config().await.map(|_| {
            println!("Config is valid");
        }),
        Command::Ping { webhook_name } => client.send_ping(&webhook_name).await.map(|_| {
            println!("Ping sent to {webhook_name}");
        }),
        Command::PostLatest { feed_name } => {
            client.post_latest_feed_item(&feed_name).await.map(|_| {
                println!("Posted latest item from \"{feed_name}\"");
            })
        }
        Command::Restart => client.restart().await.map(|_| {
            println!("Restarted");
        }),
        Command::Stats => match client.statistics().await {
            Ok(text) => {
                println!("{text}");
                Ok(())
            }
            Err(e) => Err(e),
        },
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
