//! Simulated marketplace audit traffic.
//!
//! Everything here is deterministic and fictional: riders request trips,
//! drivers bid on them, payments settle, and now and then a rider asks for
//! their data or a refund is issued. The same arguments always produce the
//! same events, so chains and digests are reproducible across runs.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use coldchain_contracts::event::AuditEvent;

/// Compliance tag for GDPR/CCPA data-subject requests.
pub const FLAG_DATA_SUBJECT_REQUEST: &str = "data-subject-request";
/// Compliance tag for money movement subject to financial record keeping.
pub const FLAG_FINANCIAL: &str = "financial";
/// Compliance tag for privileged operator actions.
pub const FLAG_PRIVILEGED: &str = "privileged-access";

const RIDERS: u64 = 37;
const DRIVERS: u64 = 23;
const OPERATORS: [&str; 3] = ["ops-ana", "ops-kofi", "ops-lin"];
const ZONES: [&str; 5] = ["downtown", "airport", "harbor", "university", "stadium"];

/// Build `count` events starting at `first_sequence`, one every `spacing`
/// from `start`.
pub fn generate_events(
    count: usize,
    first_sequence: u64,
    start: DateTime<Utc>,
    spacing: Duration,
) -> Vec<AuditEvent> {
    (0..count as u64)
        .map(|offset| {
            let sequence = first_sequence + offset;
            let occurred_at = start + spacing * offset as i32;
            marketplace_event(sequence, occurred_at)
        })
        .collect()
}

/// A backlog of `count` minute-spaced events, the newest one minute older
/// than `now - age`, so archiving "older than `age`" picks up all of them.
pub fn backlog(count: usize, now: DateTime<Utc>, age: Duration) -> Vec<AuditEvent> {
    let spacing = Duration::minutes(1);
    let newest = now - age - Duration::minutes(1);
    let start = newest - spacing * count.saturating_sub(1) as i32;
    generate_events(count, 1, start, spacing)
}

/// The event the audit logger would write at `sequence`.
pub fn marketplace_event(sequence: u64, occurred_at: DateTime<Utc>) -> AuditEvent {
    let rider = format!("rider-{:03}", sequence % RIDERS);
    let driver = format!("driver-{:03}", sequence % DRIVERS);
    let trip = format!("trip/{:06}", sequence / 4);
    let zone = ZONES[(sequence % ZONES.len() as u64) as usize];

    // Rare events first so they are not shadowed by the four-step trip cycle.
    if sequence % 97 == 0 {
        return AuditEvent::new(
            sequence,
            occurred_at,
            rider.clone(),
            "account.export_requested",
            format!("account/{rider}"),
            payload(json!({ "channel": "in-app", "scope": "all-personal-data" })),
        )
        .with_flag(FLAG_DATA_SUBJECT_REQUEST);
    }
    if sequence % 61 == 0 {
        let operator = OPERATORS[(sequence % OPERATORS.len() as u64) as usize];
        return AuditEvent::new(
            sequence,
            occurred_at,
            operator,
            "refund.issued",
            trip,
            payload(json!({ "amount_cents": 450 + (sequence % 9) * 100, "reason": "route-deviation" })),
        )
        .with_flag(FLAG_FINANCIAL)
        .with_flag(FLAG_PRIVILEGED);
    }

    match sequence % 4 {
        0 => AuditEvent::new(
            sequence,
            occurred_at,
            rider,
            "trip.requested",
            trip,
            payload(json!({ "zone": zone, "seats": 1 + sequence % 3 })),
        ),
        1 => AuditEvent::new(
            sequence,
            occurred_at,
            driver,
            "bid.placed",
            trip,
            payload(json!({ "eta_minutes": 2 + sequence % 11, "fare_cents": 900 + (sequence % 17) * 35 })),
        ),
        2 => AuditEvent::new(
            sequence,
            occurred_at,
            "matching-engine",
            "trip.matched",
            trip,
            payload(json!({ "driver": driver, "zone": zone })),
        ),
        _ => AuditEvent::new(
            sequence,
            occurred_at,
            "payments",
            "payment.captured",
            trip,
            payload(json!({ "rider": rider, "amount_cents": 900 + (sequence % 17) * 35 })),
        )
        .with_flag(FLAG_FINANCIAL),
    }
}

fn payload(value: serde_json::Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
