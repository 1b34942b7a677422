//! SQLite ledger tests against an in-memory database.

use app_config::types::LedgerSettings;
use chrono::{TimeZone, Utc};
use core_types::{
    IdempotencyToken, Position, PositionStatus, RecordKind, Side, Symbol, TradeRecord, TransitionKind,
};
use ledger::{Ledger, MemoryLedger, SqliteLedger};
use rust_decimal_macros::dec;

async fn ledger() -> SqliteLedger {
    SqliteLedger::connect(&LedgerSettings { url: "sqlite::memory:".into() }).await.unwrap()
}

fn record(symbol: &str, id: u64, kind: RecordKind, status: PositionStatus, minute: u32) -> TradeRecord {
    let sym = Symbol::new(symbol);
    let mut position = Position::flat(sym.clone(), id);
    position.status = status;
    if status != PositionStatus::Flat {
        position.side = Some(Side::Long);
        position.size = dec!(0.01);
        position.entry_price = Some(dec!(50000));
    }
    TradeRecord::new(kind, position, Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap(), true)
        .with_token(IdempotencyToken::new(&sym, id, TransitionKind::Open, 0))
        .with_detail(format!("{kind}"))
}

#[tokio::test]
async fn records_round_trip_in_append_order() {
    let ledger = ledger().await;
    let a = record("BTCUSDT", 1, RecordKind::EntrySubmitted, PositionStatus::Opening, 0);
    let b = record("BTCUSDT", 1, RecordKind::Opened, PositionStatus::Open, 1);
    ledger.append(&a).await.unwrap();
    ledger.append(&b).await.unwrap();

    let all = ledger.records(&Symbol::new("BTCUSDT"), None).await.unwrap();
    assert_eq!(all, vec![a, b.clone()]);

    let last = ledger.read_last_state(&Symbol::new("BTCUSDT")).await.unwrap();
    assert_eq!(last, Some(b));
}

#[tokio::test]
async fn instruments_are_kept_apart() {
    let ledger = ledger().await;
    ledger.append(&record("BTCUSDT", 1, RecordKind::Opened, PositionStatus::Open, 0)).await.unwrap();
    ledger.append(&record("ETHUSDT", 7, RecordKind::Opened, PositionStatus::Open, 1)).await.unwrap();

    let last = ledger.read_last_state(&Symbol::new("BTCUSDT")).await.unwrap().unwrap();
    assert_eq!(last.position.id, 1);
    assert!(ledger.read_last_state(&Symbol::new("SOLUSDT")).await.unwrap().is_none());
}

#[tokio::test]
async fn limit_returns_newest_records_oldest_first() {
    let ledger = ledger().await;
    for minute in 0..5 {
        ledger
            .append(&record("BTCUSDT", u64::from(minute), RecordKind::SignalEvaluated, PositionStatus::Flat, minute))
            .await
            .unwrap();
    }
    let recent = ledger.records(&Symbol::new("BTCUSDT"), Some(2)).await.unwrap();
    let ids: Vec<u64> = recent.iter().map(|r| r.position.id).collect();
    assert_eq!(ids, vec![3, 4]);
}

#[tokio::test]
async fn memory_ledger_behaves_like_sqlite() {
    let sqlite = ledger().await;
    let memory = MemoryLedger::new();
    for minute in 0..4 {
        let r = record("BTCUSDT", u64::from(minute), RecordKind::SignalEvaluated, PositionStatus::Flat, minute);
        sqlite.append(&r).await.unwrap();
        memory.append(&r).await.unwrap();
    }
    let sym = Symbol::new("BTCUSDT");
    assert_eq!(sqlite.records(&sym, Some(3)).await.unwrap(), memory.records(&sym, Some(3)).await.unwrap());
    assert_eq!(sqlite.read_last_state(&sym).await.unwrap(), memory.read_last_state(&sym).await.unwrap());
}
