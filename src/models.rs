use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use ethers::types::{Address, Log, H256, U256};
use ethers::utils::to_checksum;
use serde::Serialize;

/// Lowercase `0x`-prefixed hex form used as the set key for an address.
pub fn normalize_address(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn address_key(addr: &Address) -> String {
    format!("{:?}", addr)
}

/// Set of recipient addresses, keyed by their lowercase form.
#[derive(Debug, Default, Clone)]
pub struct AddressSet {
    inner: HashSet<String>,
}

impl AddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the address was not present yet.
    pub fn insert(&mut self, raw: &str) -> bool {
        self.inner.insert(normalize_address(raw))
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.inner.contains(&normalize_address(raw))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.inner.iter().map(String::as_str)
    }
}

/// A decoded `Transfer(address,address,uint256)` log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
    pub transaction_hash: String,
}

impl TransferEvent {
    pub fn recipient_key(&self) -> String {
        address_key(&self.to)
    }
}

impl TryFrom<&Log> for TransferEvent {
    type Error = anyhow::Error;

    fn try_from(log: &Log) -> Result<Self> {
        // topics: [Transfer sig, from, to]; data holds the uint256 amount
        if log.topics.len() != 3 {
            bail!(
                "expected 3 topics in Transfer log, got {} (tx {:?})",
                log.topics.len(),
                log.transaction_hash
            );
        }
        let block_number = log
            .block_number
            .context("Transfer log is missing its block number")?
            .as_u64();
        if log.data.len() > 32 {
            bail!("Transfer amount is {} bytes, expected at most 32", log.data.len());
        }
        let transaction_hash = log
            .transaction_hash
            .map(|h| format!("{:#x}", h))
            .unwrap_or_else(|| "<unknown_tx>".to_string());

        Ok(Self {
            from: topic_address(&log.topics[1]),
            to: topic_address(&log.topics[2]),
            value: U256::from_big_endian(&log.data.0),
            block_number,
            transaction_hash,
        })
    }
}

// indexed addresses are left-padded to 32 bytes
fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

/// One row of the monitoring results file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorRecord {
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Block Number")]
    pub block_number: u64,
    #[serde(rename = "Transaction Hash")]
    pub transaction_hash: String,
}

impl MonitorRecord {
    pub const HEADERS: [&'static str; 6] = [
        "Timestamp",
        "From",
        "To",
        "Value",
        "Block Number",
        "Transaction Hash",
    ];

    pub fn new(event: &TransferEvent, block_timestamp: u64, decimals: u32) -> Result<Self> {
        Ok(Self {
            timestamp: iso_timestamp(block_timestamp)?,
            from: to_checksum(&event.from, None),
            to: to_checksum(&event.to, None),
            value: format_token_amount(event.value, decimals)?,
            block_number: event.block_number,
            transaction_hash: event.transaction_hash.clone(),
        })
    }
}

/// Largest precision whose scale factor `10^decimals` fits in a U256.
pub const MAX_DECIMALS: u32 = 77;

/// Renders a raw token amount with `decimals` fractional digits, trimming trailing
/// zeros but always keeping one (`1000000` at 6 decimals is `"1.0"`).
pub fn format_token_amount(raw: U256, decimals: u32) -> Result<String> {
    if decimals == 0 {
        return Ok(format!("{}.0", raw));
    }
    let scale = U256::from(10u8)
        .checked_pow(U256::from(decimals))
        .with_context(|| format!("{} decimals exceeds the U256 range", decimals))?;
    let (whole, frac) = raw.div_mod(scale);
    let frac = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        Ok(format!("{}.0", whole))
    } else {
        Ok(format!("{}.{}", whole, frac))
    }
}

/// Unix seconds to ISO-8601 UTC with millisecond precision.
pub fn iso_timestamp(unix_secs: u64) -> Result<String> {
    let secs = i64::try_from(unix_secs).context("block timestamp out of range")?;
    let dt: DateTime<Utc> =
        DateTime::from_timestamp(secs, 0).context("block timestamp out of range")?;
    Ok(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::types::{Bytes, U64};

    fn topic(addr: Address) -> H256 {
        H256::from(addr)
    }

    pub(crate) fn transfer_log(from: Address, to: Address, raw: u64, block: u64) -> Log {
        let mut data = [0u8; 32];
        U256::from(raw).to_big_endian(&mut data);
        Log {
            address: Address::repeat_byte(0x77),
            topics: vec![H256::repeat_byte(0xdd), topic(from), topic(to)],
            data: Bytes::from(data.to_vec()),
            block_hash: None,
            block_number: Some(U64::from(block)),
            transaction_hash: Some(H256::repeat_byte(0xab)),
            transaction_index: None,
            log_index: None,
            transaction_log_index: None,
            log_type: None,
            removed: None,
        }
    }

    #[test]
    fn address_set_ignores_case() {
        let mut set = AddressSet::new();
        assert!(set.insert("0xABCDEF0000000000000000000000000000000001"));
        assert!(!set.insert("0xabcdef0000000000000000000000000000000001"));
        assert!(!set.insert("  0xAbCdEf0000000000000000000000000000000001 "));
        assert_eq!(set.len(), 1);
        assert!(set.contains("0xabcDEF0000000000000000000000000000000001"));
        assert!(!set.contains("0xcccccc0000000000000000000000000000000001"));
    }

    #[test]
    fn decodes_transfer_log() {
        let to = Address::repeat_byte(0xAA);
        let log = transfer_log(Address::repeat_byte(0x11), to, 1_500_000, 42);
        let event = TransferEvent::try_from(&log).unwrap();
        assert_eq!(event.from, Address::repeat_byte(0x11));
        assert_eq!(event.to, to);
        assert_eq!(event.value, U256::from(1_500_000u64));
        assert_eq!(event.block_number, 42);
        assert_eq!(event.transaction_hash, format!("0x{}", "ab".repeat(32)));
        assert_eq!(event.recipient_key(), format!("0x{}", "aa".repeat(20)));
    }

    #[test]
    fn rejects_log_without_indexed_recipient() {
        let mut log = transfer_log(Address::zero(), Address::zero(), 1, 1);
        log.topics.truncate(2);
        assert!(TransferEvent::try_from(&log).is_err());
    }

    #[test]
    fn formats_amounts_like_units() {
        assert_eq!(format_token_amount(U256::from(1_000_000u64), 6).unwrap(), "1.0");
        assert_eq!(format_token_amount(U256::from(1_500_000u64), 6).unwrap(), "1.5");
        assert_eq!(format_token_amount(U256::from(1u64), 6).unwrap(), "0.000001");
        assert_eq!(format_token_amount(U256::zero(), 6).unwrap(), "0.0");
        assert_eq!(format_token_amount(U256::from(123_456_789u64), 6).unwrap(), "123.456789");
        assert_eq!(format_token_amount(U256::from(7u64), 0).unwrap(), "7.0");
    }

    #[test]
    fn oversized_precision_is_an_error() {
        let max = format_token_amount(U256::from(1u64), MAX_DECIMALS).unwrap();
        assert_eq!(max, format!("0.{}1", "0".repeat(MAX_DECIMALS as usize - 1)));
        assert!(format_token_amount(U256::from(1u64), MAX_DECIMALS + 1).is_err());
        assert!(format_token_amount(U256::MAX, u32::MAX).is_err());
    }

    #[test]
    fn formats_iso_timestamps() {
        assert_eq!(iso_timestamp(0).unwrap(), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso_timestamp(1_700_000_000).unwrap(), "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn builds_record_with_checksummed_addresses() {
        let event = TransferEvent {
            from: "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap(),
            to: "0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359".parse().unwrap(),
            value: U256::from(2_000_000u64),
            block_number: 9,
            transaction_hash: "0x01".to_string(),
        };
        let record = MonitorRecord::new(&event, 1_700_000_000, 6).unwrap();
        assert_eq!(record.from, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert_eq!(record.to, "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359");
        assert_eq!(record.value, "2.0");
        assert_eq!(record.timestamp, "2023-11-14T22:13:20.000Z");
        assert_eq!(record.block_number, 9);
    }
}
