//! Negotiation counters, rendered in Prometheus text format.
//!
//! Counters are atomics keyed by sorted label sets in a `DashMap`; the wait
//! histogram uses fixed microsecond buckets so no float math happens on the
//! hot path.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn render_labels(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        let counter = self
            .map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
    }

    /// Current value for one label set (`0` if never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} counter");
        for r in self.map.iter() {
            let val = r.value().load(Ordering::Relaxed);
            if r.key().is_empty() {
                let _ = writeln!(out, "{name} {val}");
            } else {
                let _ = writeln!(out, "{name}{{{}}} {val}", render_labels(r.key()));
            }
        }
    }
}

// 100us, 1ms, 10ms, 100ms, 1s, 10s
const WAIT_BUCKETS_MICROS: [u64; 6] = [100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000];

#[derive(Default)]
pub struct WaitHistogram {
    count: AtomicU64,
    sum_micros: AtomicU64,
    buckets: [AtomicU64; 6],
}

impl WaitHistogram {
    pub fn observe(&self, waited: Duration) {
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        for (bucket, &le) in self.buckets.iter().zip(WAIT_BUCKETS_MICROS.iter()) {
            if micros <= le {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {name} histogram");
        for (bucket, le) in self.buckets.iter().zip(WAIT_BUCKETS_MICROS.iter()) {
            let _ = writeln!(out, "{name}_bucket{{le=\"{le}\"}} {}", bucket.load(Ordering::Relaxed));
        }
        let count = self.count();
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {count}");
        let _ = writeln!(out, "{name}_sum {}", self.sum_micros.load(Ordering::Relaxed));
        let _ = writeln!(out, "{name}_count {count}");
    }
}

/// Counters shared by every negotiator of a process (one per connection).
#[derive(Default)]
pub struct NegotiationStats {
    pub schemas_pushed: CounterVec,
    pub push_failures: CounterVec,
    pub schemas_requested: CounterVec,
    /// Labelled by `reason`: `timeout`, `peer_error`, `incomplete`.
    pub request_failures: CounterVec,
    pub schemas_received: CounterVec,
    pub schemas_served: CounterVec,
    /// Time decodes spent waiting on peers (microseconds).
    pub request_wait: WaitHistogram,
}

impl NegotiationStats {
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.schemas_pushed.render("partwire_schemas_pushed_total", &mut out);
        self.push_failures.render("partwire_schema_push_failures_total", &mut out);
        self.schemas_requested.render("partwire_schemas_requested_total", &mut out);
        self.request_failures.render("partwire_schema_request_failures_total", &mut out);
        self.schemas_received.render("partwire_schemas_received_total", &mut out);
        self.schemas_served.render("partwire_schemas_served_total", &mut out);
        self.request_wait.render("partwire_schema_request_wait_micros", &mut out);
        out
    }
}
