use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

#[derive(Default)]
pub struct Metrics {
    // Aggregate store
    pub plan_reads_total: AtomicU64,
    pub plan_writes_total: AtomicU64,
    pub precondition_failures_total: AtomicU64,

    // Change feed
    pub events_published_total: AtomicU64,
    pub publish_failures_total: AtomicU64,
    pub channel_depth_gauge: AtomicU64,

    // Indexer
    pub indexer_events_total: AtomicU64,
    pub indexer_skipped_total: AtomicU64,
    pub index_upserts_total: AtomicU64,
    pub index_deletes_total: AtomicU64,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}

pub fn record_plan_read() {
    metrics().plan_reads_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_plan_write() {
    metrics().plan_writes_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_precondition_failure() {
    metrics()
        .precondition_failures_total
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_event_published() {
    metrics()
        .events_published_total
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_publish_failure() {
    metrics()
        .publish_failures_total
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_channel_depth(depth: u64) {
    metrics().channel_depth_gauge.store(depth, Ordering::Relaxed);
}

pub fn record_indexer_event() {
    metrics().indexer_events_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_indexer_skip() {
    metrics()
        .indexer_skipped_total
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_index_upsert() {
    metrics().index_upserts_total.fetch_add(1, Ordering::Relaxed);
}

pub fn record_index_delete() {
    metrics().index_deletes_total.fetch_add(1, Ordering::Relaxed);
}

pub fn render_prometheus() -> String {
    let m = metrics();
    let mut s = String::new();
    let counters = [
        ("plan_reads_total", &m.plan_reads_total),
        ("plan_writes_total", &m.plan_writes_total),
        (
            "precondition_failures_total",
            &m.precondition_failures_total,
        ),
        ("events_published_total", &m.events_published_total),
        ("publish_failures_total", &m.publish_failures_total),
        ("indexer_events_total", &m.indexer_events_total),
        ("indexer_skipped_total", &m.indexer_skipped_total),
        ("index_upserts_total", &m.index_upserts_total),
        ("index_deletes_total", &m.index_deletes_total),
    ];
    for (name, counter) in counters {
        let _ = writeln!(
            s,
            "# TYPE {name} counter\n{name} {}",
            counter.load(Ordering::Relaxed)
        );
    }
    let _ = writeln!(
        s,
        "# TYPE channel_depth_gauge gauge\nchannel_depth_gauge {}",
        m.channel_depth_gauge.load(Ordering::Relaxed)
    );
    s
}
