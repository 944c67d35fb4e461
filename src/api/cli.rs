use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use super::http::ApiResponse;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned HTTP {status}: {message}")]
    Server { status: u16, message: String },
    #[error("Unexpected response: {0}")]
    Decode(String),
}

#[derive(Parser)]
#[command(name = "watcher-cli")]
#[command(about = "Query a running transaction watcher")]
#[command(version)]
pub struct Cli {
    /// Base URL of the watcher HTTP API
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub server: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Show the last fully processed block
    CurrentBlock,
    /// Watch an address for new transactions
    Subscribe { address: String },
    /// List recent transfers of an address
    Transactions { address: String },
    /// Show listener state and watch counts
    Status,
}

/// Runs CLI commands against the HTTP API
pub struct CliHandler {
    client: Client,
    base_url: String,
}

impl CliHandler {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, CliError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Execute a command and print its result
    pub async fn execute_command(&self, command: &Commands) -> Result<(), CliError> {
        let data = self.fetch(command).await?;

        match command {
            Commands::CurrentBlock => {
                println!("Current block: {}", data);
            }
            Commands::Subscribe { address } => {
                println!("{} ({})", data.as_str().unwrap_or("Subscribed"), address);
            }
            Commands::Transactions { address } => {
                let transactions = data.as_array().cloned().unwrap_or_default();
                println!("{} transfers for {}", transactions.len(), address);
                for tx in &transactions {
                    println!(
                        "  #{:<10} {}  {} -> {}  {}",
                        tx["blockNumber"], field(tx, "hash"), field(tx, "from"), field(tx, "to"), field(tx, "value")
                    );
                }
            }
            Commands::Status => {
                println!("Listener:        {}", field(&data, "listener_state"));
                println!("Current block:   {}", data["current_block"]);
                println!("Watched address: {}", data["watched_addresses"]);
            }
        }

        Ok(())
    }

    /// Perform the request for `command` and return the envelope's `data`
    pub async fn fetch(&self, command: &Commands) -> Result<Value, CliError> {
        let request = match command {
            Commands::CurrentBlock => self.client.get(format!("{}/current-block", self.base_url)),
            Commands::Subscribe { address } => self
                .client
                .post(format!("{}/subscribe", self.base_url))
                .json(&serde_json::json!({ "address": address })),
            Commands::Transactions { address } => self
                .client
                .get(format!("{}/transactions", self.base_url))
                .query(&[("address", address)]),
            Commands::Status => self.client.get(format!("{}/status", self.base_url)),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        let envelope: ApiResponse<Value> = serde_json::from_str(&body)
            .map_err(|e| CliError::Decode(format!("HTTP {}: {}", status.as_u16(), e)))?;

        if !status.is_success() || !envelope.success {
            return Err(CliError::Server {
                status: status.as_u16(),
                message: envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("-")
}
