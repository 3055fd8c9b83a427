/// End-to-end alerting tests against the in-memory store and mailer.
///
/// These cover the full path a reading takes:
/// token -> owner-scoped pool -> classification -> status -> throttle -> mail -> audit
///
/// Run with: cargo test --test alerting_integration

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};

use aquamon_service::alert::{ClassificationPolicy, NotificationMode, Throttle};
use aquamon_service::audit::AuditAction;
use aquamon_service::config::AppConfig;
use aquamon_service::identity::{IdentityError, IdentityVerifier};
use aquamon_service::model::{Band, Classification, PoolReading, PoolThresholds, Subscriber};
use aquamon_service::monitor::{MonitorError, NotifyOutcome, ReadingMonitor};
use aquamon_service::notify::{DeliveryError, MemoryMailer};
use aquamon_service::pools::PoolService;
use aquamon_service::store::{MemoryStore, PoolStore};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const CONFIG: &str = r#"
[classification]
policy = "margin"

[[identity.tokens]]
token = "owner-token"
subject = "owner"

[[identity.tokens]]
token = "neighbour-token"
subject = "neighbour"
"#;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 3, 9, 0, 0).unwrap()
}

fn reading(ph: f64, chlorine: f64, temperature: f64) -> PoolReading {
    PoolReading {
        ph,
        free_chlorine: chlorine,
        temperature_c: temperature,
        measured_at: t0(),
    }
}

struct Harness {
    config: AppConfig,
    store: Arc<MemoryStore>,
    mailer: Arc<MemoryMailer>,
    pools: PoolService<MemoryStore>,
    monitor: ReadingMonitor<MemoryStore, Arc<MemoryMailer>>,
    pool_id: String,
}

fn harness(mode: NotificationMode) -> Harness {
    let config = AppConfig::parse(CONFIG).unwrap();
    config.validate().unwrap();

    let store = Arc::new(MemoryStore::new());
    let mailer = Arc::new(MemoryMailer::new());
    let pools = PoolService::new(Arc::clone(&store), config.default_thresholds());
    let monitor = ReadingMonitor::new(
        Arc::clone(&store),
        Arc::clone(&mailer),
        Arc::new(Throttle::new()),
        config.classification_policy().unwrap(),
    );

    store
        .upsert_subscriber(&Subscriber {
            id: "owner".into(),
            email: "owner@example.com".into(),
            display_name: "Pool Owner".into(),
            notification_mode: mode,
        })
        .unwrap();
    let pool_id = pools.create_pool_at("owner", "Backyard", t0()).unwrap().id;

    Harness {
        config,
        store,
        mailer,
        pools,
        monitor,
        pool_id,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_token_reading_alert_and_audit_trail() {
    let h = harness(NotificationMode::Each);
    let verifier = h.config.token_verifier();

    let outcome = h
        .monitor
        .process_with_token(&verifier, "Bearer owner-token", &h.pool_id, reading(7.5, 2.4, 27.0))
        .unwrap();

    assert_eq!(outcome.status, Classification::Critical);
    assert_eq!(
        outcome.notification,
        NotifyOutcome::Sent {
            recipient: "owner@example.com".into()
        }
    );

    let sent = h.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.contains("Backyard"));
    assert!(sent[0].body.contains("free chlorine"));
    assert!(!sent[0].body.contains("pH:"));

    let pool = h.pools.get_pool("owner", &h.pool_id).unwrap();
    assert_eq!(pool.status, Classification::Critical);

    let actions: Vec<_> = h.store.list_audit(10).unwrap().into_iter().map(|e| e.action).collect();
    assert!(actions.contains(&AuditAction::CreatePool));
    assert!(actions.contains(&AuditAction::AlertSent));
}

#[test]
fn test_margin_policy_warns_without_mailing() {
    let h = harness(NotificationMode::Each);
    // 7.21 is inside 7.2-7.8 but within 7% of the lower edge.
    let outcome = h
        .monitor
        .process_reading_at("owner", &h.pool_id, reading(7.21, 1.0, 27.0), t0())
        .unwrap();

    assert_eq!(outcome.status, Classification::Warning);
    assert_eq!(outcome.notification, NotifyOutcome::NotNeeded);
    assert!(h.mailer.sent().is_empty());
    assert_eq!(
        h.pools.get_pool("owner", &h.pool_id).unwrap().status,
        Classification::Warning
    );
}

#[test]
fn test_edited_thresholds_apply_to_next_reading() {
    let h = harness(NotificationMode::Each);

    let first = h
        .monitor
        .process_reading_at("owner", &h.pool_id, reading(7.5, 1.0, 31.0), t0())
        .unwrap();
    assert_eq!(first.notification, NotifyOutcome::NotNeeded);

    let mut cooler = PoolThresholds::default();
    cooler.temperature = Band::new(24.0, 30.0);
    let record = h.pools.save_thresholds("owner", &h.pool_id, cooler).unwrap();
    assert_eq!(record.version, 2);

    let second = h
        .monitor
        .process_reading_at("owner", &h.pool_id, reading(7.5, 1.0, 31.0), t0())
        .unwrap();
    assert!(matches!(second.notification, NotifyOutcome::Sent { .. }));
}

#[test]
fn test_daily_mode_sends_once_per_day() {
    let h = harness(NotificationMode::Daily);
    let bad = reading(8.4, 1.0, 27.0);

    let times = [
        t0(),
        t0() + Duration::hours(1),
        t0() + Duration::hours(23),
        t0() + Duration::hours(24),
        t0() + Duration::hours(25),
    ];
    let outcomes: Vec<_> = times
        .iter()
        .map(|&at| {
            h.monitor
                .process_reading_at("owner", &h.pool_id, bad, at)
                .unwrap()
                .notification
        })
        .collect();

    assert!(matches!(outcomes[0], NotifyOutcome::Sent { .. }));
    assert_eq!(outcomes[1], NotifyOutcome::Suppressed);
    assert_eq!(outcomes[2], NotifyOutcome::Suppressed);
    assert!(matches!(outcomes[3], NotifyOutcome::Sent { .. }));
    assert_eq!(outcomes[4], NotifyOutcome::Suppressed);
    assert_eq!(h.mailer.sent().len(), 2);
}

#[test]
fn test_none_mode_never_mails() {
    let h = harness(NotificationMode::None);
    for minutes in [0, 10, 60 * 48] {
        let outcome = h
            .monitor
            .process_reading_at(
                "owner",
                &h.pool_id,
                reading(6.0, 0.1, 40.0),
                t0() + Duration::minutes(minutes),
            )
            .unwrap();
        assert_eq!(outcome.notification, NotifyOutcome::Suppressed);
    }
    assert!(h.mailer.sent().is_empty());
}

#[test]
fn test_rejected_recipient_is_reported_not_raised() {
    let h = harness(NotificationMode::Each);
    h.mailer.fail_with(Some(DeliveryError::Rejected {
        recipient: "owner@example.com".into(),
        reason: "mailbox full".into(),
    }));

    let outcome = h
        .monitor
        .process_reading_at("owner", &h.pool_id, reading(9.0, 1.0, 27.0), t0())
        .unwrap();
    match outcome.notification {
        NotifyOutcome::DeliveryFailed { reason, .. } => assert!(reason.contains("mailbox full")),
        other => panic!("expected delivery failure, got {:?}", other),
    }
}

#[test]
fn test_neighbour_cannot_post_to_foreign_pool() {
    let h = harness(NotificationMode::Each);
    let verifier = h.config.token_verifier();

    let err = h
        .monitor
        .process_with_token(&verifier, "neighbour-token", &h.pool_id, reading(7.5, 1.0, 27.0))
        .unwrap_err();
    assert!(matches!(err, MonitorError::PoolNotFound(_)));

    let err = h
        .monitor
        .process_with_token(&verifier, "forged", &h.pool_id, reading(7.5, 1.0, 27.0))
        .unwrap_err();
    assert!(matches!(err, MonitorError::Unauthorized(IdentityError::Invalid)));

    assert!(h.pools.history("owner", &h.pool_id, None).unwrap().is_empty());
}

#[test]
fn test_concurrent_breaches_mail_once_per_window() {
    let h = Arc::new(harness(NotificationMode::Every5Min));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let h = Arc::clone(&h);
            thread::spawn(move || {
                h.monitor
                    .process_reading_at("owner", &h.pool_id, reading(8.9, 1.0, 27.0), t0())
                    .unwrap()
                    .notification
            })
        })
        .collect();

    let sent = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|n| matches!(n, NotifyOutcome::Sent { .. }))
        .count();

    assert_eq!(sent, 1);
    assert_eq!(h.mailer.sent().len(), 1);
    assert_eq!(h.pools.history("owner", &h.pool_id, None).unwrap().len(), 8);
}

#[test]
fn test_separate_ingest_runs_share_throttle_window() {
    let h = harness(NotificationMode::Every5Min);
    let verifier = h.config.token_verifier();

    // Same wiring as `aquamon ingest`: one monitor per run, throttle in the store.
    let ingest = |at: DateTime<Utc>| {
        let monitor = ReadingMonitor::with_store_throttle(
            Arc::clone(&h.store),
            Arc::clone(&h.mailer),
            h.config.classification_policy().unwrap(),
        );
        let subject = verifier.verify("owner-token").unwrap();
        monitor
            .process_reading_at(&subject.subject_id, &h.pool_id, reading(8.5, 1.0, 27.0), at)
            .unwrap()
            .notification
    };

    let outcomes = [
        ingest(t0()),
        ingest(t0() + Duration::seconds(60)),
        ingest(t0() + Duration::seconds(299)),
        ingest(t0() + Duration::seconds(300)),
    ];

    assert!(matches!(outcomes[0], NotifyOutcome::Sent { .. }));
    assert_eq!(outcomes[1], NotifyOutcome::Suppressed);
    assert_eq!(outcomes[2], NotifyOutcome::Suppressed);
    assert!(matches!(outcomes[3], NotifyOutcome::Sent { .. }));
    assert_eq!(h.mailer.sent().len(), 2);
}

#[test]
fn test_default_policy_is_strict() {
    let config = AppConfig::default();
    assert_eq!(config.classification_policy().unwrap(), ClassificationPolicy::Strict);
}
