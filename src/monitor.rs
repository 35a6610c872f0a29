use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, BlockNumber, Filter, Log, U256, U64};
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chain::{connect_ws, transfer_filter};
use crate::models::{AddressSet, MonitorRecord, TransferEvent};
use crate::store::{self, ResultsWriter};

/// Capacity of the queue between the subscription and the event handler.
const EVENT_QUEUE: usize = 1024;

/// Checks live transfers against a fixed set of watched recipients and records
/// every match.
pub struct Monitor<M, W: Write> {
    provider: Arc<M>,
    watched: AddressSet,
    sink: ResultsWriter<W>,
    decimals: u32,
}

impl<M: Middleware + 'static, W: Write> Monitor<M, W> {
    pub fn new(provider: Arc<M>, watched: AddressSet, sink: ResultsWriter<W>, decimals: u32) -> Self {
        Self { provider, watched, sink, decimals }
    }

    #[cfg(test)]
    pub fn sink(&self) -> &ResultsWriter<W> {
        &self.sink
    }

    /// Record `event` if its recipient is watched. Returns the written record.
    pub async fn handle(&mut self, event: &TransferEvent) -> Result<Option<MonitorRecord>> {
        if !self.watched.contains(&event.recipient_key()) {
            return Ok(None);
        }

        let timestamp = self.block_timestamp(event.block_number).await?;
        let record = MonitorRecord::new(event, timestamp, self.decimals)?;

        info!("*** ERC20 Transfer To Monitor Address Detected ***");
        info!("Date: {}", record.timestamp);
        info!("From: {}", record.from);
        info!("To: {}", record.to);
        info!("Value: {} Tokens", record.value);
        info!("Block Number: {}", record.block_number);
        info!("Transaction Hash: {}", record.transaction_hash);
        info!("-------------------------------");

        self.sink
            .append(&record)
            .with_context(|| format!("failed to record transfer {}", record.transaction_hash))?;
        Ok(Some(record))
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block(BlockNumber::Number(U64::from(number)))
            .await
            .with_context(|| format!("failed to fetch block {}", number))?
            .with_context(|| format!("block {} not found", number))?;
        ensure!(
            block.timestamp <= U256::from(u64::MAX),
            "block {} has an out of range timestamp",
            number
        );
        Ok(block.timestamp.as_u64())
    }

    /// Drain `events` in delivery order until every sender is gone. A failure on
    /// one event is logged and the loop moves on.
    pub async fn run(&mut self, mut events: mpsc::Receiver<TransferEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(&event).await {
                error!("Error processing transfer {}: {:?}", event.transaction_hash, e);
            }
        }
    }
}

/// Forward decoded Transfer logs from `logs` into `tx`, dropping removed and
/// undecodable ones. Returns an error when `logs` runs dry, `Ok` when the handler
/// side of `tx` is gone.
pub async fn forward_logs<S>(logs: S, tx: mpsc::Sender<TransferEvent>) -> Result<()>
where
    S: Stream<Item = Log>,
{
    let mut logs = std::pin::pin!(logs);
    while let Some(log) = logs.next().await {
        if log.removed == Some(true) {
            debug!("skipping removed log {:?}", log.transaction_hash);
            continue;
        }
        match TransferEvent::try_from(&log) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => warn!("skipping undecodable log: {:#}", e),
        }
    }

    bail!("Transfer log subscription closed by the provider")
}

/// Subscribe to logs matching `filter` and feed them to `tx` on a separate task.
pub fn spawn_log_feed(
    provider: Arc<Provider<Ws>>,
    filter: Filter,
    tx: mpsc::Sender<TransferEvent>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let stream = provider
            .subscribe_logs(&filter)
            .await
            .context("failed to subscribe to Transfer logs")?;
        info!("Monitoring Transfer events...");
        forward_logs(stream, tx).await
    })
}

/// Load the watched addresses, then follow live Transfer events of `token`
/// until the subscription ends.
pub async fn run_monitor(
    rpc_url: &str,
    token: Address,
    wallets: &Path,
    output: &Path,
    decimals: u32,
) -> Result<()> {
    let watched = store::load_addresses(wallets)?;
    info!("Monitor addresses already loaded, total: {} addresses", watched.len());
    if watched.is_empty() {
        warn!("{} holds no addresses, nothing will be recorded", wallets.display());
    }

    let sink = ResultsWriter::create(output)?;
    let provider = Arc::new(connect_ws(rpc_url).await?);
    let filter = transfer_filter(token)?;

    let (tx, rx) = mpsc::channel(EVENT_QUEUE);
    let feed = spawn_log_feed(Arc::clone(&provider), filter, tx);

    let mut monitor = Monitor::new(provider, watched, sink, decimals);
    monitor.run(rx).await;

    feed.await.context("Transfer log feed panicked")?
}
