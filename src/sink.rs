//! # Sink Module
//!
//! Destinations for scraped items.
//!
//! ## Overview
//!
//! The item processor hands every item to one [`ItemSink`], in arrival order,
//! and closes it once the crawl winds down. A failed write is logged and
//! counted against that single item; the crawl goes on.
//!
//! - [`CsvSink`]: the feed file, one column per configured field.
//! - [`ConsoleSink`]: one JSON object per line on stdout.
//! - [`MemorySink`]: collects items in memory, for tests and embedding.

use crate::error::SinkError;
use crate::item::Item;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[async_trait]
pub trait ItemSink: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn write(&self, item: &Item) -> Result<(), SinkError>;

    /// Flushes and releases the destination. Later writes fail.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes items as UTF-8 CSV with a header row.
///
/// Missing and null fields are written as empty cells; keys outside the
/// configured columns are ignored.
pub struct CsvSink {
    path: PathBuf,
    columns: Vec<String>,
    writer: Mutex<Option<csv::Writer<File>>>,
}

impl CsvSink {
    /// Creates (or truncates) the feed file and writes the header.
    pub fn create(path: impl AsRef<Path>, columns: Vec<String>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&columns)?;
        writer.flush()?;
        info!("Writing items to {}", path.display());

        Ok(Self {
            path,
            columns,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

#[async_trait]
impl ItemSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn write(&self, item: &Item) -> Result<(), SinkError> {
        let row: Vec<String> = self
            .columns
            .iter()
            .map(|column| item.get(column).map(ToString::to_string).unwrap_or_default())
            .collect();

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;
        writer.write_record(&row)?;
        // One flush per item keeps the feed usable if the run is killed.
        writer.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
            debug!("Closed CSV feed {}", self.path.display());
        }
        Ok(())
    }
}

/// Prints each item as a JSON line.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ItemSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn write(&self, item: &Item) -> Result<(), SinkError> {
        let line = serde_json::to_string(item)
            .map_err(|e| SinkError::Io(std::io::Error::other(e)))?;
        println!("{}", line);
        Ok(())
    }
}

/// Keeps items in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    items: Arc<Mutex<Vec<Item>>>,
    closed: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

#[async_trait]
impl ItemSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, item: &Item) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.items.lock().push(item.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        *self.closed.lock() = true;
        Ok(())
    }
}
