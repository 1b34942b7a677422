// In crates/engine/tests/lifecycle.rs

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{FakeExchange, FillMode, Harness, policy, signal};
use core_types::{
    CloseReason, Direction, ExchangePosition, Fill, IdempotencyToken, OrderAck, OrderRequest, PositionStatus,
    RecordKind, Side, Symbol,
};
use events::{EngineEvent, Severity};
use execution::ExecutionGateway;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

async fn opened_long(conviction: f64) -> Harness<common::FakeExchange> {
    let mut h = Harness::new();
    h.lifecycle.on_signal(signal(Direction::Long, conviction), dec!(50000)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Open);
    h
}

#[tokio::test(start_paused = true)]
async fn long_entry_places_levels_from_signal_distances() {
    let h = opened_long(0.8).await;

    let pos = h.position();
    assert_eq!(pos.id, 1);
    assert_eq!(pos.side, Some(Side::Long));
    assert_eq!(pos.size, dec!(0.06));
    assert_eq!(pos.entry_price, Some(dec!(50000)));
    assert_eq!(pos.stop_loss, Some(dec!(49900)));
    assert_eq!(pos.take_profit, Some(dec!(50300)));
    assert_eq!(pos.entry_conviction, 0.8);

    assert_eq!(h.kinds(), vec![RecordKind::SignalEvaluated, RecordKind::EntrySubmitted, RecordKind::Opened]);
    let records = h.records();
    assert_eq!(records[1].position.status, PositionStatus::Opening);
    assert_eq!(records[1].client_token.as_ref().map(|t| t.as_str()), Some("BTCUSDT-1-open-0"));
    assert!(records.iter().all(|r| !r.simulated));
}

#[tokio::test(start_paused = true)]
async fn stop_triggers_close_and_realizes_pnl_net_of_fees() {
    let mut h = opened_long(0.8).await;

    h.lifecycle.on_price_tick(dec!(49950)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Open);

    h.lifecycle.on_price_tick(dec!(49899)).await.unwrap();
    assert!(h.position().is_flat());
    assert_eq!(h.position().id, 1);

    let closed = h.records().into_iter().last().unwrap();
    assert_eq!(closed.kind, RecordKind::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::StopTriggered));
    assert_eq!(closed.position.exit_price, Some(dec!(49899)));
    // -101 * 0.06, minus 3 entry fee and 2.99394 exit fee
    assert_eq!(closed.position.realized_pnl, Some(dec!(-12.05394)));
    assert!(h.gateway.position().is_flat());
}

#[tokio::test(start_paused = true)]
async fn take_profit_and_max_hold_close_the_position() {
    let mut h = opened_long(0.8).await;
    h.lifecycle.on_price_tick(dec!(50300)).await.unwrap();
    let last = h.records().into_iter().last().unwrap();
    assert_eq!(last.close_reason, Some(CloseReason::TakeProfitTriggered));

    let mut held = policy();
    held.max_hold = Some(chrono::Duration::hours(1));
    let mut h = Harness::with_gateway(Arc::new(common::FakeExchange::new(dec!(50000))), held);
    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();
    h.clock.advance(chrono::Duration::minutes(59));
    h.lifecycle.on_price_tick(dec!(50010)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Open);

    h.clock.advance(chrono::Duration::minutes(1));
    h.lifecycle.on_price_tick(dec!(50010)).await.unwrap();
    let last = h.records().into_iter().last().unwrap();
    assert_eq!(last.close_reason, Some(CloseReason::MaxHoldExpired));
    assert!(h.position().is_flat());
}

#[tokio::test(start_paused = true)]
async fn weak_reversal_does_not_close_a_confident_position() {
    // Entered at 0.9, so the bar is max(0.7, 0.9 + 0.1) = 1.0.
    let mut h = opened_long(0.9).await;
    h.lifecycle.on_signal(signal(Direction::Short, 0.95), dec!(50000)).await.unwrap();

    assert_eq!(h.position().status, PositionStatus::Open);
    let last = h.records().into_iter().last().unwrap();
    assert_eq!(last.kind, RecordKind::SignalEvaluated);
    assert!(last.detail.contains("hold"), "{}", last.detail);
    assert_eq!(h.gateway.submissions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn strong_reversal_closes_then_next_signal_reenters() {
    // Entered at 0.65, bar is 0.75.
    let mut h = opened_long(0.65).await;
    h.lifecycle.on_signal(signal(Direction::Short, 0.8), dec!(50100)).await.unwrap();

    assert!(h.position().is_flat());
    let closed = h.records().into_iter().last().unwrap();
    assert_eq!(closed.kind, RecordKind::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::SignalReversed));
    assert_eq!(closed.signal.as_ref().map(|s| s.direction), Some(Direction::Short));

    h.lifecycle.on_signal(signal(Direction::Short, 0.8), dec!(50100)).await.unwrap();
    assert_eq!(h.position().id, 2);
    assert_eq!(h.position().side, Some(Side::Short));
    assert_eq!(h.position().stop_loss, Some(dec!(50200)));
}

#[tokio::test(start_paused = true)]
async fn same_direction_and_flat_signals_hold() {
    let mut h = opened_long(0.8).await;
    h.lifecycle.on_signal(signal(Direction::Long, 0.99), dec!(50000)).await.unwrap();
    h.lifecycle.on_signal(signal(Direction::Flat, 0.0), dec!(50000)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Open);
    assert_eq!(h.gateway.submissions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn below_threshold_signal_never_enters() {
    let mut h = Harness::new();
    h.lifecycle.on_signal(signal(Direction::Long, 0.59), dec!(50000)).await.unwrap();
    assert!(h.position().is_flat());
    assert_eq!(h.kinds(), vec![RecordKind::SignalEvaluated]);
    assert!(h.gateway.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_transport_retries_leave_the_position_flat() {
    let mut h = Harness::new();
    let mut alerts = h.events.subscribe();
    h.gateway.fail_transport(10);

    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();

    assert!(h.position().is_flat());
    assert_eq!(h.position().id, 1);
    assert_eq!(
        h.kinds(),
        vec![RecordKind::SignalEvaluated, RecordKind::EntrySubmitted, RecordKind::EntryFailed]
    );
    assert!(h.records().iter().all(|r| r.position.status != PositionStatus::Open));

    // Every attempt carried the same token.
    let submissions = h.gateway.submissions();
    assert_eq!(submissions.len(), 3);
    assert!(submissions.iter().all(|s| s.token == submissions[0].token));

    let mut warned = false;
    while let Ok(event) = alerts.try_recv() {
        if let EngineEvent::Alert(alert) = event {
            warned |= alert.severity == Severity::Warning;
        }
    }
    assert!(warned);
}

#[tokio::test(start_paused = true)]
async fn lost_acknowledgement_does_not_open_twice() {
    let mut h = Harness::new();
    h.gateway.lose_acks(1);

    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();

    assert_eq!(h.position().status, PositionStatus::Open);
    assert_eq!(h.position().size, dec!(0.06));
    assert_eq!(h.gateway.submissions().len(), 2);
    assert_eq!(h.gateway.order_count(), 1);
    assert_eq!(h.gateway.position().size, dec!(0.06));
}

#[tokio::test(start_paused = true)]
async fn rejected_entry_is_recorded_and_not_retried() {
    let mut h = Harness::new();
    h.gateway.reject_next("insufficient margin");

    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();

    assert!(h.position().is_flat());
    assert_eq!(h.gateway.submissions().len(), 1);
    let last = h.records().into_iter().last().unwrap();
    assert_eq!(last.kind, RecordKind::EntryRejected);
    assert!(last.detail.contains("insufficient margin"));
}

#[tokio::test(start_paused = true)]
async fn unfilled_entry_is_cancelled_after_fill_timeout() {
    let mut h = Harness::new();
    h.gateway.set_mode(FillMode::Resting);
    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Opening);

    // Signals during an entry are recorded but change nothing.
    h.lifecycle.on_signal(signal(Direction::Short, 0.99), dec!(50000)).await.unwrap();
    let last = h.records().into_iter().last().unwrap();
    assert!(last.detail.contains("ignored"), "{}", last.detail);

    h.clock.advance(chrono::Duration::seconds(10));
    h.lifecycle.on_price_tick(dec!(50000)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Opening);
    assert!(h.gateway.cancels().is_empty());

    h.clock.advance(chrono::Duration::seconds(25));
    h.lifecycle.on_price_tick(dec!(50000)).await.unwrap();
    assert!(h.position().is_flat());
    assert_eq!(h.gateway.cancels(), vec!["ord-1".to_string()]);
    assert_eq!(h.records().into_iter().last().unwrap().kind, RecordKind::EntryTimedOut);
}

#[tokio::test(start_paused = true)]
async fn partial_entry_keeps_what_filled() {
    let mut h = Harness::new();
    h.gateway.set_mode(FillMode::Partial(dec!(0.5)));
    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Opening);

    h.clock.advance(chrono::Duration::seconds(31));
    h.lifecycle.on_timer().await.unwrap();

    let pos = h.position();
    assert_eq!(pos.status, PositionStatus::Open);
    assert_eq!(pos.size, dec!(0.03));
    assert_eq!(pos.stop_loss, Some(dec!(49900)));
    let opened = h.records().into_iter().last().unwrap();
    assert_eq!(opened.kind, RecordKind::Opened);
    assert!(opened.detail.contains("partial fill"));
}

#[tokio::test(start_paused = true)]
async fn polled_fill_completes_a_resting_entry() {
    let mut h = Harness::new();
    h.gateway.set_mode(FillMode::Resting);
    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();
    let token = h.records()[1].client_token.clone();

    h.gateway.add_fill(Fill {
        fill_id: "late-1".into(),
        order_id: "ord-1".into(),
        token,
        side: Side::Long,
        price: dec!(50010),
        qty: dec!(0.06),
        fee: dec!(3),
        time: common::start_time(),
    });
    h.lifecycle.poll_fills().await.unwrap();
    // The same fill reported twice is applied once.
    h.lifecycle.poll_fills().await.unwrap();

    assert_eq!(h.position().status, PositionStatus::Open);
    assert_eq!(h.position().size, dec!(0.06));
    assert_eq!(h.position().entry_price, Some(dec!(50010)));
    assert_eq!(h.position().stop_loss, Some(dec!(49910)));
}

#[tokio::test(start_paused = true)]
async fn partial_close_is_resubmitted_under_a_new_token() {
    let mut h = opened_long(0.8).await;
    h.gateway.set_mode(FillMode::Partial(dec!(0.5)));
    h.lifecycle.on_price_tick(dec!(49800)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Closing);

    h.gateway.set_mode(FillMode::Immediate);
    h.clock.advance(chrono::Duration::seconds(31));
    h.lifecycle.on_price_tick(dec!(49800)).await.unwrap();

    assert!(h.position().is_flat());
    assert!(h.gateway.position().is_flat());
    assert_eq!(exit_tokens(&h), vec!["BTCUSDT-1-close-0", "BTCUSDT-1-close-1"]);

    let closed = h.records().into_iter().last().unwrap();
    assert_eq!(closed.kind, RecordKind::Closed);
    // -200 * 0.06 - 3 entry fee - 2.988 exit fees
    assert_eq!(closed.position.realized_pnl, Some(dec!(-17.988)));
}

#[tokio::test(start_paused = true)]
async fn failed_close_returns_to_open_and_retries_next_tick() {
    let mut h = opened_long(0.8).await;
    let mut alerts = h.events.subscribe();
    h.gateway.fail_transport(3);

    h.lifecycle.on_price_tick(dec!(49850)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Open);
    assert_eq!(h.records().into_iter().last().unwrap().kind, RecordKind::ExitFailed);

    let mut critical = false;
    while let Ok(event) = alerts.try_recv() {
        if let EngineEvent::Alert(alert) = event {
            critical |= alert.severity == Severity::Critical;
        }
    }
    assert!(critical);

    h.lifecycle.on_price_tick(dec!(49850)).await.unwrap();
    assert!(h.position().is_flat());
    let last = h.gateway.submissions().into_iter().last().unwrap();
    assert_eq!(last.token.as_str(), "BTCUSDT-1-close-1");
}

fn exit_tokens(h: &Harness<FakeExchange>) -> Vec<String> {
    h.records()
        .iter()
        .filter(|r| r.kind == RecordKind::ExitSubmitted)
        .filter_map(|r| r.client_token.as_ref().map(|t| t.to_string()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn close_after_a_rejected_remainder_uses_a_fresh_token_and_realizes_every_exit() {
    let mut h = opened_long(0.8).await;

    // close-0 fills half at the stop.
    h.gateway.set_mode(FillMode::Partial(dec!(0.5)));
    h.lifecycle.on_price_tick(dec!(49850)).await.unwrap();
    assert_eq!(h.gateway.position().size, dec!(0.03));

    // The remainder (close-1) is rejected: back to Open with what is left.
    h.clock.advance(chrono::Duration::seconds(31));
    h.gateway.reject_next("reduce-only would increase position");
    h.lifecycle.on_price_tick(dec!(49850)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Open);
    assert_eq!(h.position().size, dec!(0.03));
    let kinds = h.kinds();
    assert_eq!(&kinds[kinds.len() - 2..], &[RecordKind::ExitRejected, RecordKind::ProtectionUpdated]);

    // The next close must not replay close-0 and its old fill.
    h.gateway.set_mode(FillMode::Immediate);
    h.lifecycle.on_price_tick(dec!(49800)).await.unwrap();

    assert!(h.position().is_flat());
    assert!(h.gateway.position().is_flat());
    let tokens = exit_tokens(&h);
    assert_eq!(tokens, vec!["BTCUSDT-1-close-0", "BTCUSDT-1-close-1", "BTCUSDT-1-close-2"]);
    let distinct: HashSet<_> = h.gateway.submissions().iter().map(|s| s.token.clone()).collect();
    assert_eq!(distinct.len(), h.gateway.submissions().len());

    let closed = h.records().into_iter().last().unwrap();
    assert_eq!(closed.kind, RecordKind::Closed);
    assert_eq!(closed.position.size, dec!(0.06));
    assert_eq!(closed.position.exit_price, Some(dec!(49825)));
    // -175 * 0.06 - 3 entry fee - (1.4955 + 1.494) exit fees
    assert_eq!(closed.position.realized_pnl, Some(dec!(-16.4895)));
}

/// Forwards every order to the exchange but never returns its acknowledgement.
/// While unreachable, the exchange cannot be queried either.
struct LostAcks {
    exchange: Arc<FakeExchange>,
    reachable: AtomicBool,
}

impl LostAcks {
    fn new(exchange: Arc<FakeExchange>) -> Self {
        Self { exchange, reachable: AtomicBool::new(true) }
    }

    fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn check(&self) -> execution::Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(execution::Error::Transport("connection refused".into()))
        }
    }
}

#[async_trait]
impl ExecutionGateway for LostAcks {
    fn name(&self) -> &'static str {
        "LostAcks"
    }

    fn is_simulated(&self) -> bool {
        false
    }

    async fn place_order(&self, request: &OrderRequest) -> execution::Result<OrderAck> {
        let _ = self.exchange.place_order(request).await;
        Err(execution::Error::Transport("response lost".into()))
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> execution::Result<()> {
        self.check()?;
        self.exchange.cancel_order(symbol, order_id).await
    }

    async fn find_order(&self, symbol: &Symbol, token: &IdempotencyToken) -> execution::Result<Option<String>> {
        self.check()?;
        self.exchange.find_order(symbol, token).await
    }

    async fn get_position(&self, symbol: &Symbol) -> execution::Result<ExchangePosition> {
        self.check()?;
        self.exchange.get_position(symbol).await
    }

    async fn get_fills(&self, symbol: &Symbol, since: DateTime<Utc>) -> execution::Result<Vec<Fill>> {
        self.check()?;
        self.exchange.get_fills(symbol, since).await
    }

    async fn available_balance(&self) -> execution::Result<Decimal> {
        self.exchange.available_balance().await
    }

    async fn last_price(&self, symbol: &Symbol) -> execution::Result<Decimal> {
        self.exchange.last_price(symbol).await
    }
}

fn lost_acks_harness() -> (Harness<LostAcks>, Arc<FakeExchange>) {
    let exchange = Arc::new(FakeExchange::new(dec!(50000)));
    exchange.anonymous_fills();
    let h = Harness::with_gateway(Arc::new(LostAcks::new(exchange.clone())), policy());
    (h, exchange)
}

#[tokio::test(start_paused = true)]
async fn entry_that_landed_without_acknowledgement_is_tracked_to_open() {
    let (mut h, exchange) = lost_acks_harness();

    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();

    assert_eq!(h.position().status, PositionStatus::Open);
    assert_eq!(h.position().size, dec!(0.06));
    assert_eq!(h.position().stop_loss, Some(dec!(49900)));
    assert_eq!(
        h.kinds(),
        vec![RecordKind::SignalEvaluated, RecordKind::EntrySubmitted, RecordKind::Opened]
    );
    assert_eq!(exchange.order_count(), 1);
    assert_eq!(exchange.position().size, dec!(0.06));
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_entry_stays_opening_until_the_exchange_answers() {
    let (mut h, exchange) = lost_acks_harness();
    let mut alerts = h.events.subscribe();
    h.gateway.set_reachable(false);

    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();

    // The order is on the book, so the ledger must not say Flat.
    assert_eq!(h.position().status, PositionStatus::Opening);
    assert!(!h.kinds().contains(&RecordKind::EntryFailed));
    let mut critical = false;
    while let Ok(event) = alerts.try_recv() {
        if let EngineEvent::Alert(alert) = event {
            critical |= alert.severity == Severity::Critical;
        }
    }
    assert!(critical);

    // No second entry while the first is unresolved.
    h.lifecycle.on_signal(signal(Direction::Long, 0.9), dec!(50000)).await.unwrap();
    assert_eq!(exchange.order_count(), 1);

    h.gateway.set_reachable(true);
    h.clock.advance(chrono::Duration::seconds(31));
    h.lifecycle.on_price_tick(dec!(50000)).await.unwrap();
    assert_eq!(h.position().status, PositionStatus::Open);
    assert_eq!(h.position().size, dec!(0.06));

    // Closes are confirmed the same way.
    h.lifecycle.on_price_tick(dec!(49850)).await.unwrap();
    assert!(h.position().is_flat());
    assert!(exchange.position().is_flat());
    assert_eq!(h.records().into_iter().last().unwrap().kind, RecordKind::Closed);
}

#[tokio::test(start_paused = true)]
async fn force_close_only_acts_on_open_positions() {
    let mut h = Harness::new();
    assert!(!h.lifecycle.force_close(CloseReason::Manual).await.unwrap());

    h.lifecycle.on_signal(signal(Direction::Long, 0.8), dec!(50000)).await.unwrap();
    assert!(h.lifecycle.force_close(CloseReason::Manual).await.unwrap());
    assert!(h.position().is_flat());
    assert_eq!(h.records().into_iter().last().unwrap().close_reason, Some(CloseReason::Manual));
}
