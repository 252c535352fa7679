//! Command-line interface for mincho.
//!
//! Sends a single RPC method to the local miner and prints the reply, or
//! fetches the pool account stats once.

use std::env;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use mincho::api_client;
use mincho::config::Config;
use mincho::rpc::{self, Command, Method, Reply};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: mincho-cli <command> [params...]");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  stats     Show pool account stats");
        eprintln!("  <method>  Send an RPC method to the miner: status, hello, exit,");
        eprintln!("            shutdown, connect, hashrate, start, stop, threads, hashes");
        eprintln!();
        eprintln!("Environment:");
        eprintln!("  MINCHO_RPC_ADDR   Miner RPC address (default: 127.0.0.1:3326)");
        eprintln!("  MINCHO_API_URL    Pool API base URL (default: https://api.ethermine.org)");
        eprintln!("  MINCHO_ACCOUNT    Pool account identifier");
        std::process::exit(1);
    }

    let config = Config::from_env()?;
    let command = &args[1];

    match command.as_str() {
        "stats" => cmd_stats(&config).await?,
        name => {
            let Ok(method) = name.parse::<Method>() else {
                eprintln!("Unknown command: {}", name);
                eprintln!("Run without arguments to see usage.");
                std::process::exit(1);
            };
            cmd_rpc(&config, method, &args[2..]).await?
        }
    }

    Ok(())
}

/// Params are taken as JSON when they parse, as plain strings otherwise.
fn parse_params(raw: &[String]) -> Option<Vec<Value>> {
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.iter()
            .map(|p| serde_json::from_str(p).unwrap_or_else(|_| Value::String(p.clone())))
            .collect(),
    )
}

async fn cmd_rpc(config: &Config, method: Method, params: &[String]) -> Result<()> {
    let command = Command {
        method,
        params: parse_params(params),
    };
    let (reply, raw) = rpc::call_once(&config.rpc.addr, &command)
        .await
        .with_context(|| format!("{method} failed against {}", config.rpc.addr))?;

    println!("{raw}");

    if let Some(error) = &reply.response().error {
        bail!("miner returned error: {error}");
    }

    if let Reply::Status(status) = &reply {
        println!();
        println!("Hashrate: {}", status.total_hashrate());
        println!("Threads:  {}", status.total_threads());
        println!(
            "Upstream: {}",
            if status.upstream_connected() {
                "connected"
            } else {
                "disconnected"
            }
        );
    }

    Ok(())
}

async fn cmd_stats(config: &Config) -> Result<()> {
    let account = config
        .api
        .account
        .as_deref()
        .context("MINCHO_ACCOUNT is not set")?;
    let stats = api_client::fetch_once(&config.api, account).await?;

    println!("Workers:   {}", stats.active_workers);
    println!("Hashrate:  {:.3} MH/s", stats.current_mhs());
    println!("Average:   {:.3} MH/s", stats.average_mhs());
    println!("USD/min:   {:.5}", stats.usd_per_min);
    if !stats.pool.is_empty() {
        println!("Pool:      {}", stats.pool);
    }

    Ok(())
}
