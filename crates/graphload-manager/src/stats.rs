//! Import progress counters.

use std::fmt;
use std::sync::{Mutex, Once, PoisonError};
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};

/// Point-in-time copy of the import counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    #[serde(skip)]
    pub start_time: Option<Instant>,
    /// Declared size of every registered source.
    pub total_bytes: u64,
    /// Bytes whose batches finished, successfully or not.
    pub processed_bytes: u64,
    pub total_records: u64,
    pub failed_records: u64,
    pub total_request: u64,
    pub failed_request: u64,
    #[serde(serialize_with = "as_millis")]
    pub total_latency: Duration,
    #[serde(serialize_with = "as_millis")]
    pub total_resp_time: Duration,
    /// Records sent in requests, counted per importer.
    pub total_processed: u64,
    pub failed_processed: u64,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl Stats {
    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Processed share of the total bytes, 0 to 100.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.processed_bytes as f64 * 100.0 / self.total_bytes as f64
    }

    pub fn records_per_second(&self) -> f64 {
        rate(self.total_records, self.elapsed())
    }

    pub fn requests_per_second(&self) -> f64 {
        rate(self.total_request, self.elapsed())
    }

    pub fn avg_latency(&self) -> Duration {
        average(self.total_latency, self.total_request)
    }

    pub fn avg_resp_time(&self) -> Duration {
        average(self.total_resp_time, self.total_request)
    }

    pub fn is_failed(&self) -> bool {
        self.failed_records > 0 || self.failed_request > 0
    }
}

fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 { 0.0 } else { count as f64 / secs }
}

fn average(total: Duration, n: u64) -> Duration {
    match u32::try_from(n) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / n as f64),
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0?} {:.2}%({}/{} bytes) \
             [records: {} done, {} failed, {:.2}/s] \
             [requests: {} done, {} failed, latency {:?}/{:?}, {:.2}/s] \
             [processed: {} done, {} failed]",
            self.elapsed(),
            self.percentage(),
            self.processed_bytes,
            self.total_bytes,
            self.total_records,
            self.failed_records,
            self.records_per_second(),
            self.total_request,
            self.failed_request,
            self.avg_latency(),
            self.avg_resp_time(),
            self.requests_per_second(),
            self.total_processed,
            self.failed_processed,
        )
    }
}

/// Stats shared by every pipeline; all mutation goes through one lock.
#[derive(Debug)]
pub struct ConcurrencyStats {
    inner: Mutex<Stats>,
    init: Once,
}

impl Default for ConcurrencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Stats::default()),
            init: Once::new(),
        }
    }

    /// Record the start time. Only the first call has any effect.
    pub fn init(&self) {
        self.init.call_once(|| {
            self.with(|s| s.start_time = Some(Instant::now()));
        });
    }

    pub fn add_total_bytes(&self, bytes: u64) {
        self.with(|s| s.total_bytes += bytes);
    }

    pub fn succeeded(&self, bytes: u64, records: u64) {
        self.with(|s| {
            s.processed_bytes += bytes;
            s.total_records += records;
        });
    }

    pub fn failed(&self, bytes: u64, records: u64) {
        self.with(|s| {
            s.processed_bytes += bytes;
            s.total_records += records;
            s.failed_records += records;
        });
    }

    pub fn request_succeeded(&self, records: u64, latency: Duration, resp_time: Duration) {
        self.with(|s| {
            s.total_request += 1;
            s.total_latency += latency;
            s.total_resp_time += resp_time;
            s.total_processed += records;
        });
    }

    pub fn request_failed(&self, records: u64) {
        self.with(|s| {
            s.total_request += 1;
            s.failed_request += 1;
            s.total_processed += records;
            s.failed_processed += records;
        });
    }

    pub fn stats(&self) -> Stats {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with(&self, f: impl FnOnce(&mut Stats)) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }
}
