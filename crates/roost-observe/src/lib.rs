//! roost-observe: vendor-neutral observability ABI.
//!
//! Store, index and sync code depend only on these traits and event types.
//! Backends (Prometheus, log sinks, test recorders) live elsewhere.

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        _buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
    fn emit(&self, evt: VizEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
struct NoopH;
impl Histogram for NoopH {
    fn observe(&self, _v: f64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn histo(
        &self,
        _n: &'static str,
        _b: &'static [f64],
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(NoopH)
    }
    fn emit(&self, _e: VizEvent) {}
}

/// Typed events (record contents and vectors are never included).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum VizEvent {
    Index(IndexEvt),
    Sync(SyncEvt),
    Consistency(ConsistencyEvt),
}

#[derive(Clone, Debug)]
pub struct IndexEvt {
    pub vectors: u64,
    pub kind: IndexKind,
}
#[derive(Clone, Debug)]
pub enum IndexKind {
    Opened,
    Appended { count: u32 },
    Consolidated { ms: u32 },
    TailTruncated { bytes: u64 },
    Rebuilt,
}

#[derive(Clone, Debug)]
pub struct SyncEvt {
    /// Position of the source within the current pass.
    pub source: u32,
    pub kind: SyncKind,
}
#[derive(Clone, Debug)]
pub enum SyncKind {
    PassStart { sources: u32 },
    SourceSkipped,
    SourceImported {
        records: u64,
        vectors_added: u64,
        vectors_deduplicated: u64,
    },
    SourceFailed,
    PassFinish { imported: u32, failed: u32 },
}

#[derive(Clone, Debug)]
pub struct ConsistencyEvt {
    pub vectors: u64,
    pub kind: ConsistencyKind,
}
#[derive(Clone, Debug)]
pub enum ConsistencyKind {
    Healthy,
    CatchUp { missing: u64 },
    CorruptDetected,
    Rebuilt { ms: u32 },
}

/// Macros (simple versions). Can be feature-gated if desired.
#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_gauge {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.gauge($name, $labels).set($v as i64);
    }};
}
#[macro_export]
macro_rules! obs_hist {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.histo($name, &[], $labels).observe($v as f64);
    }};
}
#[macro_export]
macro_rules! obs_timed {
    ($m:expr, $name:expr, $labels:expr, $body:block) => {{
        let __t = std::time::Instant::now();
        let __ret = { $body };
        let __ms = __t.elapsed().as_secs_f64() * 1000.0;
        $m.histo($name, &[], $labels).observe(__ms);
        __ret
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_meter_accepts_everything() {
        let meter = NoopMeter;
        obs_count!(meter, "roost_sync_sources_total", &[("result", "skipped")], 1);
        obs_gauge!(meter, "roost_index_vectors", &[], 42);
        let v = obs_timed!(meter, "roost_index_consolidate_ms", &[], { 7 });
        assert_eq!(v, 7);
        meter.emit(VizEvent::Sync(SyncEvt {
            source: 0,
            kind: SyncKind::SourceSkipped,
        }));
    }
}
