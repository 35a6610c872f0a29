use anyhow::{bail, Context, Result};
use ethers::providers::{Http, Provider, Ws};
use ethers::types::{Address, Filter, H256};

/// ERC20 Transfer topic signature, keccak256("Transfer(address,address,uint256)")
const TRANSFER_SIG: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub fn transfer_topic() -> Result<H256> {
    let bytes = hex::decode(&TRANSFER_SIG[2..])?;
    Ok(H256::from_slice(&bytes))
}

/// Filter for logs where address == token and topic0 == Transfer.
pub fn transfer_filter(token: Address) -> Result<Filter> {
    Ok(Filter::new().address(token).topic0(transfer_topic()?))
}

pub fn is_ws_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

pub async fn connect_ws(url: &str) -> Result<Provider<Ws>> {
    if !is_ws_url(url) {
        bail!("a WebSocket endpoint (ws:// or wss://) is required, got {}", url);
    }
    let ws = Ws::connect(url)
        .await
        .with_context(|| format!("failed to connect to {}", url))?;
    Ok(Provider::new(ws))
}

pub fn connect_http(url: &str) -> Result<Provider<Http>> {
    Provider::<Http>::try_from(url).with_context(|| format!("invalid RPC URL {}", url))
}
