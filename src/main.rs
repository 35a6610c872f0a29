mod backfill;
mod chain;
mod models;
mod monitor;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{ensure, Context};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use env_logger::Env;
use ethers::types::Address;
use log::error;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// RPC endpoint. The monitor needs a WebSocket URL (ws:// or wss://).
    #[arg(short, long, env = "PROVIDER_URL")]
    rpc: String,

    /// ERC-20 token contract whose Transfer events are tracked
    #[arg(short, long, env = "USDT_CONTRACT_ADDRESS")]
    token: String,

    /// Address list CSV: written by `backfill`, read by `monitor`
    #[arg(short, long, env = "WALLETS_CSV_PATH", default_value = "usdt_addresses.csv")]
    wallets: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect every address that ever received the token in a block range
    Backfill {
        #[arg(long, env = "START_BLOCK")]
        start_block: u64,

        #[arg(long, env = "END_BLOCK")]
        end_block: u64,

        /// Blocks per eth_getLogs request
        #[arg(long, env = "CHUNK_SIZE", default_value_t = backfill::DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
    },
    /// Follow live transfers and record those sent to a listed address
    Monitor {
        /// Results CSV, overwritten at startup
        #[arg(short, long, env = "MONITOR_RESULTS_CSV_PATH", default_value = "usdt_monitoring.csv")]
        output: PathBuf,

        /// Token decimals (USDT uses 6)
        #[arg(short, long, env = "TOKEN_DECIMALS", default_value = "6")]
        decimals: u32,
    },
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Error: {:?}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure!(!cli.rpc.trim().is_empty(), "PROVIDER_URL is empty");
    let token: Address = cli
        .token
        .trim()
        .parse()
        .with_context(|| format!("invalid token contract address {:?}", cli.token))?;

    match cli.command {
        Commands::Backfill { start_block, end_block, chunk_size } => {
            ensure!(chunk_size > 0, "CHUNK_SIZE must be at least 1");
            if chain::is_ws_url(&cli.rpc) {
                let provider = Arc::new(chain::connect_ws(&cli.rpc).await?);
                backfill::run_backfill(provider, token, start_block, end_block, chunk_size, &cli.wallets)
                    .await?;
            } else {
                let provider = Arc::new(chain::connect_http(&cli.rpc)?);
                backfill::run_backfill(provider, token, start_block, end_block, chunk_size, &cli.wallets)
                    .await?;
            }
        }
        Commands::Monitor { output, decimals } => {
            ensure!(
                decimals <= models::MAX_DECIMALS,
                "TOKEN_DECIMALS must be at most {}, got {}",
                models::MAX_DECIMALS,
                decimals
            );
            monitor::run_monitor(&cli.rpc, token, &cli.wallets, &output, decimals).await?;
        }
    }

    Ok(())
}
