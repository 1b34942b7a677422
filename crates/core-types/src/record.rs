// In crates/core-types/src/record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CloseReason, IdempotencyToken, Position, Symbol, TradingSignal};

/// What a `TradeRecord` documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    SignalEvaluated,
    EntryVetoed,
    EntrySubmitted,
    Opened,
    EntryRejected,
    EntryFailed,
    EntryTimedOut,
    ProtectionUpdated,
    ExitSubmitted,
    Closed,
    ExitRejected,
    ExitFailed,
    Reconciled,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordKind::SignalEvaluated => "signal_evaluated",
            RecordKind::EntryVetoed => "entry_vetoed",
            RecordKind::EntrySubmitted => "entry_submitted",
            RecordKind::Opened => "opened",
            RecordKind::EntryRejected => "entry_rejected",
            RecordKind::EntryFailed => "entry_failed",
            RecordKind::EntryTimedOut => "entry_timed_out",
            RecordKind::ProtectionUpdated => "protection_updated",
            RecordKind::ExitSubmitted => "exit_submitted",
            RecordKind::Closed => "closed",
            RecordKind::ExitRejected => "exit_rejected",
            RecordKind::ExitFailed => "exit_failed",
            RecordKind::Reconciled => "reconciled",
        };
        f.write_str(s)
    }
}

/// One immutable ledger entry.
///
/// Exchange order ids are not recorded. The client token identifies the order in
/// live and simulated runs alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub instrument: Symbol,
    pub kind: RecordKind,
    /// Position state after the transition.
    pub position: Position,
    pub signal: Option<TradingSignal>,
    pub timestamp: DateTime<Utc>,
    pub close_reason: Option<CloseReason>,
    pub detail: String,
    pub client_token: Option<IdempotencyToken>,
    pub simulated: bool,
}

impl TradeRecord {
    pub fn new(kind: RecordKind, position: Position, timestamp: DateTime<Utc>, simulated: bool) -> Self {
        Self {
            instrument: position.instrument.clone(),
            kind,
            position,
            signal: None,
            timestamp,
            close_reason: None,
            detail: String::new(),
            client_token: None,
            simulated,
        }
    }

    pub fn with_signal(mut self, signal: TradingSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_close_reason(mut self, reason: CloseReason) -> Self {
        self.close_reason = Some(reason);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_token(mut self, token: IdempotencyToken) -> Self {
        self.client_token = Some(token);
        self
    }
}
