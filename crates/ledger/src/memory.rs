// In crates/ledger/src/memory.rs

use crate::{Error, Ledger, Result};
use async_trait::async_trait;
use core_types::{Symbol, TradeRecord};
use std::sync::Mutex;

/// A ledger that lives in memory. Used by tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<TradeRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing history, e.g. to simulate a restart.
    pub fn with_records(records: Vec<TradeRecord>) -> Self {
        Self { records: Mutex::new(records) }
    }

    /// Everything appended so far, across instruments.
    pub fn all(&self) -> Vec<TradeRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<TradeRecord>>> {
        self.records.lock().map_err(|_| Error::Unavailable("memory ledger lock poisoned".into()))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(&self, record: &TradeRecord) -> Result<()> {
        self.lock()?.push(record.clone());
        Ok(())
    }

    async fn read_last_state(&self, instrument: &Symbol) -> Result<Option<TradeRecord>> {
        Ok(self.lock()?.iter().rev().find(|r| &r.instrument == instrument).cloned())
    }

    async fn records(&self, instrument: &Symbol, limit: Option<usize>) -> Result<Vec<TradeRecord>> {
        let records = self.lock()?;
        let matching: Vec<TradeRecord> = records.iter().filter(|r| &r.instrument == instrument).cloned().collect();
        let skip = limit.map(|l| matching.len().saturating_sub(l)).unwrap_or(0);
        Ok(matching.into_iter().skip(skip).collect())
    }
}
