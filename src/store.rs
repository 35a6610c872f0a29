use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Writer};

use crate::models::{AddressSet, MonitorRecord};

pub const ADDRESS_HEADER: &str = "Address";

/// Load the address list at `path` into a set, normalizing every entry.
pub fn load_addresses(path: &Path) -> Result<AddressSet> {
    let file = File::open(path)
        .with_context(|| format!("failed to open address list {}", path.display()))?;
    read_addresses(file).with_context(|| format!("failed to read address list {}", path.display()))
}

pub fn read_addresses<R: Read>(reader: R) -> Result<AddressSet> {
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let column = rdr
        .headers()?
        .iter()
        .position(|h| h == ADDRESS_HEADER)
        .with_context(|| format!("missing `{}` column", ADDRESS_HEADER))?;

    let mut set = AddressSet::new();
    for row in rdr.records() {
        let row = row?;
        match row.get(column) {
            Some(addr) if !addr.is_empty() => {
                set.insert(addr);
            }
            _ => {}
        }
    }
    Ok(set)
}

/// Overwrite `path` with one `Address` row per entry of `set`.
pub fn save_addresses(path: &Path, set: &AddressSet) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create address list {}", path.display()))?;
    write_addresses(file, set).with_context(|| format!("failed to write {}", path.display()))
}

pub fn write_addresses<W: Write>(writer: W, set: &AddressSet) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    wtr.write_record([ADDRESS_HEADER])?;
    for addr in set.iter() {
        wtr.write_record([addr])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Append-only sink for monitoring records. The header is written once when the
/// sink is created; every record is flushed as soon as it is written.
pub struct ResultsWriter<W: Write> {
    wtr: Writer<W>,
}

impl ResultsWriter<File> {
    /// Truncate (or create) the results file at `path` and write the header.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create results file {}", path.display()))?;
        Self::new(file)
    }
}

impl<W: Write> ResultsWriter<W> {
    pub fn new(writer: W) -> Result<Self> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        wtr.write_record(MonitorRecord::HEADERS)?;
        wtr.flush()?;
        Ok(Self { wtr })
    }

    pub fn append(&mut self, rec: &MonitorRecord) -> Result<()> {
        self.wtr.serialize(rec)?;
        self.wtr.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        self.wtr.get_ref()
    }
}
