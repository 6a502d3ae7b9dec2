use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::Client;
use shared_types::{Notification, NotificationBatch, RenewResponse, StatusResponse};
use std::path::PathBuf;
use triage::TriageConfig;

#[derive(Parser)]
#[command(name = "triage-cli")]
#[command(about = "Operator CLI for the mail triage server")]
#[command(
    long_about = "A command-line interface for poking a running triage server.\n\n\
    Checks liveness, replays the subscription handshake, sends synthetic\n\
    change notifications and triggers subscription renewal."
)]
struct Cli {
    /// Triage server URL to connect to.
    #[arg(
        short,
        long,
        default_value = "http://localhost:8000",
        env = "TRIAGE_API_URL"
    )]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server is up
    Health,

    /// Send a subscription validation handshake and print the echo
    Validate {
        /// Token the server should echo back verbatim
        token: String,
    },

    /// Send a synthetic `created` notification for a message
    ///
    /// The server fetches and triages the message exactly as if the mail
    /// provider had sent the notification.
    Notify {
        /// Provider message id
        message_id: String,

        /// Shared secret the server expects in every notification
        #[arg(long, env = "CLIENT_STATE")]
        client_state: String,

        /// Mailbox the message belongs to
        #[arg(long, env = "TARGET_EMAIL", default_value = "me")]
        mailbox: String,
    },

    /// Renew every webhook subscription by another two days
    Renew {
        /// Shared secret guarding the renewal endpoint
        #[arg(long, env = "CLIENT_STATE")]
        client_state: String,
    },

    /// Validate a category file without starting the server
    CheckConfig {
        #[arg(value_name = "FILE", default_value = "config.json")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.base_url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let status: StatusResponse = client
                .get(format!("{}/", base_url))
                .send()
                .await
                .context("Server not reachable")?
                .error_for_status()?
                .json()
                .await?;
            println!("Server is {}", status.status);
        }
        Commands::Validate { token } => {
            let response = client
                .post(format!("{}/webhook", base_url))
                .query(&[("validationToken", token.as_str())])
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                bail!("Handshake failed ({}): {}", status, body);
            }
            if body != token {
                bail!("Server echoed '{}' instead of '{}'", body, token);
            }
            println!("Handshake OK: {}", body);
        }
        Commands::Notify {
            message_id,
            client_state,
            mailbox,
        } => {
            let batch = NotificationBatch {
                value: vec![Notification::message_created(
                    &mailbox,
                    &message_id,
                    &client_state,
                    "triage-cli",
                )],
            };
            let response = client
                .post(format!("{}/webhook", base_url))
                .json(&batch)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("Notification rejected ({}): {}", status, body);
            }
            println!("Notification for {} accepted ({})", message_id, status);
        }
        Commands::Renew { client_state } => {
            let response = client
                .post(format!("{}/renew", base_url))
                .query(&[("clientState", client_state.as_str())])
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("Renewal failed ({}): {}", status, body);
            }
            let renewed: RenewResponse = response.json().await?;
            println!("Renewed {} subscription(s)", renewed.renewed);
        }
        Commands::CheckConfig { path } => {
            let config = TriageConfig::load(&path)?;
            println!(
                "{}: {} categories, default '{}'",
                path.display(),
                config.categories.len(),
                config.default_category
            );
            for category in &config.categories {
                let task = if category.create_task {
                    format!("task list '{}'", category.todo_list_name())
                } else {
                    "no task".to_string()
                };
                println!("  {} -> {} ({})", category.name, category.folder, task);
            }
        }
    }

    Ok(())
}
