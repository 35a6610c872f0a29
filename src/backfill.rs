use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use ethers::providers::Middleware;
use ethers::types::Address;
use log::{debug, info, warn};

use crate::chain::transfer_filter;
use crate::models::{AddressSet, TransferEvent};
use crate::store;

pub const DEFAULT_CHUNK_SIZE: u64 = 1000;

/// Inclusive block ranges `[from, to]` of at most `size` blocks covering
/// `[start, end]` in ascending order. Empty when `start > end`.
#[derive(Debug, Clone)]
pub struct BlockChunks {
    next: Option<u64>,
    end: u64,
    size: u64,
}

impl BlockChunks {
    pub fn new(start: u64, end: u64, size: u64) -> Result<Self> {
        ensure!(size > 0, "chunk size must be at least 1");
        Ok(Self { next: (start <= end).then_some(start), end, size })
    }
}

impl Iterator for BlockChunks {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next?;
        let to = from.saturating_add(self.size - 1).min(self.end);
        self.next = if to < self.end { Some(to + 1) } else { None };
        Some((from, to))
    }
}

/// Collect every address that received `token` between `start` and `end`.
/// Any failed chunk aborts the whole scan.
pub async fn collect_recipients<M: Middleware + 'static>(
    provider: &Arc<M>,
    token: Address,
    start: u64,
    end: u64,
    chunk_size: u64,
) -> Result<AddressSet> {
    let base = transfer_filter(token)?;
    let mut recipients = AddressSet::new();

    for (from, to) in BlockChunks::new(start, end, chunk_size)? {
        info!("Querying Transfer events from block {} to {}...", from, to);

        let filter = base.clone().from_block(from).to_block(to);
        let logs = provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("failed to fetch Transfer logs for blocks {}..={}", from, to))?;

        info!("Got {} Transfer events in this chunk.", logs.len());

        for log in &logs {
            match TransferEvent::try_from(log) {
                Ok(event) => {
                    if recipients.insert(&event.recipient_key()) {
                        debug!("new recipient {:?} in block {}", event.to, event.block_number);
                    }
                }
                Err(e) => warn!("skipping undecodable log: {:#}", e),
            }
        }
    }

    Ok(recipients)
}

/// Scan the block range and write the unique recipients to `output`.
pub async fn run_backfill<M: Middleware + 'static>(
    provider: Arc<M>,
    token: Address,
    start: u64,
    end: u64,
    chunk_size: u64,
    output: &Path,
) -> Result<AddressSet> {
    info!("Starting from block {} to {} ...", start, end);

    let recipients = collect_recipients(&provider, token, start, end, chunk_size).await?;
    info!("Total addresses that have EVER received the token: {}", recipients.len());

    store::save_addresses(output, &recipients)?;
    info!("Saved to {}", output.display());

    Ok(recipients)
}
