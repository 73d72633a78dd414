//! Operator command dispatch: admin gating, signal creation with expiry
//! resolution, manual overrides, and news scheduling.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use common::build_harness;
use limitwatch::application::control::{
    CallerIdentity, Command, ControlPlane, SpreadBufferAction,
};
use limitwatch::application::system::shutdown_service::ShutdownService;
use limitwatch::domain::signal::{
    ChangeType, Direction, ExpiryType, LimitStatus, NewSignal, SignalStatus,
};
use limitwatch::infrastructure::config::alert_distances::AlertDistancesFile;
use limitwatch::infrastructure::config::tp::TpFile;
use limitwatch::infrastructure::config::{AlertDistanceConfig, TpConfig};
use limitwatch::infrastructure::symbols::SymbolMapper;
use limitwatch::infrastructure::symbols::mapper::MappingsConfig;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn ny(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    New_York
        .with_ymd_and_hms(y, mo, d, h, mi, 0)
        .single()
        .unwrap()
        .with_timezone(&Utc)
}

fn admin() -> CallerIdentity {
    CallerIdentity {
        name: "ops".to_string(),
        is_admin: true,
    }
}

fn user() -> CallerIdentity {
    CallerIdentity {
        name: "trader".to_string(),
        is_admin: false,
    }
}

struct ControlHarness {
    harness: common::Harness,
    control: ControlPlane,
}

fn build_control(now: DateTime<Utc>) -> ControlHarness {
    let harness = build_harness(now, false);
    let shutdown = Arc::new(ShutdownService::new(harness.stream.clone()));
    let control = ControlPlane::new(
        harness.store.clone(),
        harness.tracker.clone(),
        harness.stream.clone(),
        harness.news.clone(),
        Arc::new(AlertDistanceConfig::with_config(AlertDistancesFile::default())),
        Arc::new(TpConfig::with_config(TpFile::default())),
        harness.settings.clone(),
        Arc::new(SymbolMapper::with_config(MappingsConfig::default())),
        harness.clock.clone(),
        shutdown,
    );
    ControlHarness { harness, control }
}

fn new_signal(instrument: &str) -> NewSignal {
    NewSignal {
        message_id: "123456789".to_string(),
        channel_id: "1000".to_string(),
        instrument: instrument.to_string(),
        direction: Direction::Long,
        stop_loss: dec!(1.0820),
        expiry_type: ExpiryType::DayEnd,
        expiry_time: None,
        limit_prices: vec![dec!(1.0850), dec!(1.0840)],
        scalp: false,
    }
}

#[tokio::test]
async fn admin_commands_are_gated_before_dispatch() {
    let ch = build_control(ny(2025, 1, 15, 10, 0));

    let denied = ch.control.dispatch(&user(), Command::ClearAll).await;
    assert!(!denied.ok);
    assert!(denied.message.contains("admin"));

    let allowed = ch.control.dispatch(&admin(), Command::ClearAll).await;
    assert!(allowed.ok);
}

#[tokio::test]
async fn add_signal_resolves_day_end_expiry() {
    let now = ny(2025, 1, 15, 10, 0);
    let ch = build_control(now);

    let outcome = ch
        .control
        .dispatch(
            &user(),
            Command::AddSignal {
                signal: new_signal("EURUSD"),
            },
        )
        .await;
    assert!(outcome.ok, "{}", outcome.message);

    let signals = ch.harness.store.signals.lock().unwrap();
    let signal = signals.values().next().unwrap();
    assert_eq!(signal.expiry_type, ExpiryType::DayEnd);
    // Wednesday before the cutoff: expires today at 16:45 New York
    assert_eq!(signal.expiry_time, Some(ny(2025, 1, 15, 16, 45)));
}

#[tokio::test]
async fn add_signal_rejects_unroutable_instrument() {
    let ch = build_control(ny(2025, 1, 15, 10, 0));

    let outcome = ch
        .control
        .dispatch(
            &user(),
            Command::AddSignal {
                signal: new_signal("USOILSPOT"),
            },
        )
        .await;
    assert!(!outcome.ok);
}

#[tokio::test]
async fn manual_set_status_bypasses_the_table_but_audits() {
    let now = ny(2025, 1, 15, 10, 0);
    let ch = build_control(now);
    let signal_id = ch.harness.store.seed_signal(
        "EURUSD",
        Direction::Long,
        dec!(1.0820),
        &[dec!(1.0850)],
        SignalStatus::Active,
        false,
    );

    // active -> breakeven is invalid on the automatic path; manual wins
    let outcome = ch
        .control
        .dispatch(
            &user(),
            Command::SetStatus {
                signal_id,
                status: SignalStatus::Breakeven,
            },
        )
        .await;
    assert!(outcome.ok, "{}", outcome.message);

    let signal = ch.harness.store.signal(signal_id);
    assert_eq!(signal.status, SignalStatus::Breakeven);
    assert!(signal.closed_at.is_some());
    assert!(
        ch.harness
            .store
            .limits_of(signal_id)
            .iter()
            .all(|l| l.status == LimitStatus::Cancelled)
    );

    let audit = ch.harness.store.audit_rows(signal_id);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].change_type, ChangeType::Manual);
}

#[tokio::test]
async fn reactivation_restores_cancelled_limits() {
    let now = ny(2025, 1, 15, 10, 0);
    let ch = build_control(now);
    let signal_id = ch.harness.store.seed_signal(
        "EURUSD",
        Direction::Long,
        dec!(1.0820),
        &[dec!(1.0850)],
        SignalStatus::Active,
        false,
    );

    ch.control
        .dispatch(&user(), Command::Cancel { signal_id })
        .await;
    assert_eq!(
        ch.harness.store.signal(signal_id).status,
        SignalStatus::Cancelled
    );

    let outcome = ch
        .control
        .dispatch(
            &user(),
            Command::SetStatus {
                signal_id,
                status: SignalStatus::Active,
            },
        )
        .await;
    assert!(outcome.ok);

    let signal = ch.harness.store.signal(signal_id);
    assert_eq!(signal.status, SignalStatus::Active);
    assert!(signal.closed_at.is_none());
    assert!(
        ch.harness
            .store
            .limits_of(signal_id)
            .iter()
            .all(|l| l.status == LimitStatus::Pending)
    );
}

#[tokio::test]
async fn spread_buffer_toggle_round_trips() {
    let ch = build_control(ny(2025, 1, 15, 10, 0));

    let status = ch
        .control
        .dispatch(
            &user(),
            Command::SpreadBuffer {
                action: SpreadBufferAction::Status,
            },
        )
        .await;
    assert!(status.message.contains("OFF"));

    ch.control
        .dispatch(
            &user(),
            Command::SpreadBuffer {
                action: SpreadBufferAction::On,
            },
        )
        .await;
    assert!(ch.harness.settings.spread_buffer_enabled());
}

#[tokio::test]
async fn news_scheduling_and_listing() {
    let now = ny(2025, 1, 15, 10, 0);
    let ch = build_control(now);

    let outcome = ch
        .control
        .dispatch(
            &user(),
            Command::ScheduleNews {
                category: "USD".to_string(),
                news_time: ny(2025, 1, 15, 12, 30),
                window_minutes: 15,
            },
        )
        .await;
    assert!(outcome.ok);

    let listing = ch.control.dispatch(&user(), Command::ListNews).await;
    assert!(listing.message.contains("USD"));

    let removed = ch
        .control
        .dispatch(&user(), Command::RemoveNews { event_id: Some(1) })
        .await;
    assert!(removed.ok);

    let empty = ch.control.dispatch(&user(), Command::ListNews).await;
    assert!(empty.message.contains("No scheduled news"));
}

#[tokio::test]
async fn clear_all_cancels_every_open_signal() {
    let now = ny(2025, 1, 15, 10, 0);
    let ch = build_control(now);
    let a = ch.harness.store.seed_signal(
        "EURUSD",
        Direction::Long,
        dec!(1.0820),
        &[dec!(1.0850)],
        SignalStatus::Active,
        false,
    );
    let b = ch.harness.store.seed_signal(
        "GBPUSD",
        Direction::Short,
        dec!(1.2600),
        &[dec!(1.2500)],
        SignalStatus::Hit,
        false,
    );

    let outcome = ch.control.dispatch(&admin(), Command::ClearAll).await;
    assert!(outcome.ok);
    assert!(outcome.message.contains("2"));

    assert_eq!(ch.harness.store.signal(a).status, SignalStatus::Cancelled);
    assert_eq!(ch.harness.store.signal(b).status, SignalStatus::Cancelled);
}
