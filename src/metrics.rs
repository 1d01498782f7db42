use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder,
};

pub static CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "brigade_connections_total",
        "Total number of accepted client connections"
    ))
    .unwrap()
});

pub static CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "brigade_connections_active",
        "Currently admitted client connections"
    ))
    .unwrap()
});

pub static ADMISSIONS_DENIED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "brigade_admissions_denied_total",
        "Connection admissions denied"
    ))
    .unwrap()
});

pub static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "brigade_events_published_total",
        "Events accepted by the broadcast router"
    ))
    .unwrap()
});

pub static EVENTS_DELIVERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "brigade_events_delivered_total",
        "Event deliveries to individual connections"
    ))
    .unwrap()
});

pub static RATE_LIMITED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "brigade_rate_limited_total",
        "Checks denied by the rate limiter"
    ))
    .unwrap()
});

pub static AUDIT_OVERFLOW_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "brigade_audit_overflow_total",
        "Audit events rejected due to queue back-pressure"
    ))
    .unwrap()
});

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
