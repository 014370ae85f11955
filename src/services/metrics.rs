use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

lazy_static! {
    // ── Tenant resolution ───────────────────────────────────────────────────
    pub static ref RESOLVER_CACHE_COUNTER: CounterVec = register_counter_vec!(
        "sitebuilder_resolver_cache_total",
        "Tenant resolver cache lookups by result (hit/miss)",
        &["result"]
    ).unwrap();

    pub static ref RESOLUTIONS_COUNTER: CounterVec = register_counter_vec!(
        "sitebuilder_resolutions_total",
        "Tenant resolutions by outcome",
        &["outcome"]
    ).unwrap();

    // ── Section gate ────────────────────────────────────────────────────────
    pub static ref SECTION_FAIL_OPEN_COUNTER: IntCounter = register_int_counter!(
        "sitebuilder_section_fail_open_total",
        "Section lookups that failed and defaulted to enabled"
    ).unwrap();

    // ── Provisioning ────────────────────────────────────────────────────────
    pub static ref PROVISION_RUNS_COUNTER: CounterVec = register_counter_vec!(
        "sitebuilder_provision_runs_total",
        "Provisioning runs by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref PROVISION_ROWS_COUNTER: CounterVec = register_counter_vec!(
        "sitebuilder_provision_rows_total",
        "Rows written by provisioning, per table",
        &["table"]
    ).unwrap();
}
