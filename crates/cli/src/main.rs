//! Turnstile CLI - admin interface to a running daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9630";

#[derive(Parser)]
#[command(name = "turnstile")]
#[command(about = "Turnstile admission controller CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "TURNSTILE_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Admin token (required for capacity, cleanup and reset-metrics)
    #[arg(long, env = "TURNSTILE_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue metrics (waiting, processing, capacity, average time)
    Metrics,

    /// Show where one request stands
    Status {
        /// Request ID
        request_id: String,
    },

    /// Change the fleet-wide number of concurrent jobs
    Capacity {
        /// New capacity (1..=100)
        capacity: u32,
    },

    /// Remove waiting entries older than the given age
    Cleanup {
        /// Maximum age in seconds (server default when omitted)
        #[arg(long)]
        max_age_secs: Option<u64>,
    },

    /// Reset the processing-time average and completion count
    ResetMetrics,
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(default)]
    data: Option<JsonRpcErrorData>,
}

#[derive(Deserialize)]
struct JsonRpcErrorData {
    code: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Metrics {
    priority_waiting: u64,
    normal_waiting: u64,
    processing: u64,
    capacity: u32,
    average_processing_time: f64,
    total_processed: u64,
}

#[derive(Tabled)]
struct MetricsRow {
    #[tabled(rename = "Priority waiting")]
    priority_waiting: u64,
    #[tabled(rename = "Normal waiting")]
    normal_waiting: u64,
    #[tabled(rename = "Processing")]
    processing: String,
    #[tabled(rename = "Avg time (s)")]
    average: String,
    #[tabled(rename = "Completed")]
    total_processed: u64,
}

impl From<Metrics> for MetricsRow {
    fn from(m: Metrics) -> Self {
        Self {
            priority_waiting: m.priority_waiting,
            normal_waiting: m.normal_waiting,
            processing: format!("{}/{}", m.processing, m.capacity),
            average: format!("{:.1}", m.average_processing_time),
            total_processed: m.total_processed,
        }
    }
}

#[derive(Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct StatusRow {
    #[tabled(rename = "Request")]
    request_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Position")]
    position: i64,
    #[tabled(rename = "In queue")]
    total_in_queue: u64,
    #[tabled(rename = "ETA (s)")]
    estimated_time: u64,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0",
        method,
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to connect to daemon at {}", url))?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        match error.data {
            Some(data) => anyhow::bail!("{} ({}): {}", data.code, error.code, error.message),
            None => anyhow::bail!("RPC error ({}): {}", error.code, error.message),
        }
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn require_token(token: Option<String>) -> Result<String> {
    token.ok_or_else(|| anyhow::anyhow!("--admin-token (or TURNSTILE_ADMIN_TOKEN) is required"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Metrics => {
            let result = call_rpc(&cli.rpc_url, "admin.metrics", json!({})).await?;
            let metrics: Metrics = serde_json::from_value(result)?;

            println!("{}", "Queue Metrics".cyan().bold());
            println!("  {} {}", "RPC URL:".bold(), cli.rpc_url);
            println!();
            println!("{}", Table::new(vec![MetricsRow::from(metrics)]));
        }

        Commands::Status { request_id } => {
            let result = call_rpc(
                &cli.rpc_url,
                "admin.status",
                json!({ "requestId": request_id }),
            )
            .await?;
            let status: StatusRow = serde_json::from_value(result)?;

            if status.position < 0 {
                println!("{}", format!("Request {} is not in the queue", request_id).yellow());
            } else {
                println!("{}", Table::new(vec![status]));
            }
        }

        Commands::Capacity { capacity } => {
            let token = require_token(cli.admin_token)?;
            call_rpc(
                &cli.rpc_url,
                "admin.capacity",
                json!({ "adminToken": token, "capacity": capacity }),
            )
            .await?;

            println!("{}", format!("✓ Capacity set to {}", capacity).green().bold());
        }

        Commands::Cleanup { max_age_secs } => {
            let token = require_token(cli.admin_token)?;
            let result = call_rpc(
                &cli.rpc_url,
                "admin.cleanup",
                json!({ "adminToken": token, "maxAgeSecs": max_age_secs }),
            )
            .await?;

            println!("{}", "✓ Cleanup completed".green().bold());
            println!(
                "  {} {} stale entries removed (older than {}s)",
                "•".bold(),
                result["removed"],
                result["maxAgeSecs"]
            );
        }

        Commands::ResetMetrics => {
            let token = require_token(cli.admin_token)?;
            call_rpc(
                &cli.rpc_url,
                "admin.reset_metrics",
                json!({ "adminToken": token }),
            )
            .await?;

            println!("{}", "✓ Metrics reset".green().bold());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_admin_commands() {
        let cli = Cli::try_parse_from([
            "turnstile",
            "--admin-token",
            "t",
            "cleanup",
            "--max-age-secs",
            "60",
        ])
        .unwrap();
        assert_eq!(cli.admin_token.as_deref(), Some("t"));
        assert!(matches!(
            cli.command,
            Commands::Cleanup {
                max_age_secs: Some(60)
            }
        ));
    }

    #[test]
    fn test_metrics_row_formats_slots() {
        let row = MetricsRow::from(Metrics {
            priority_waiting: 1,
            normal_waiting: 4,
            processing: 2,
            capacity: 3,
            average_processing_time: 12.345,
            total_processed: 9,
        });
        assert_eq!(row.processing, "2/3");
        assert_eq!(row.average, "12.3");
    }
}
