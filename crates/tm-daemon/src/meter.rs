//! Per-tunnel traffic and liveness accounting
//!
//! Many forwarding sessions write concurrently; the listing path reads
//! occasionally. Cumulative counters are plain atomics so the pump loops
//! never contend with readers. Bandwidth is derived from a small
//! timestamped sample window behind a mutex held only for push and prune.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tm_core::time::current_time_secs;

/// Trailing window over which bandwidth is averaged.
const BANDWIDTH_WINDOW: Duration = Duration::from_secs(2);

/// Traffic counters for one tunnel
pub struct ActivityMeter {
    created_at: u64,
    last_activity: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    total_conns: AtomicU64,
    active_conns: AtomicI32,
    window: Mutex<VecDeque<Sample>>,
}

struct Sample {
    at: Instant,
    sent: u64,
    received: u64,
}

/// Consistent point-in-time view of an [`ActivityMeter`]
#[derive(Debug, Clone, Copy)]
pub struct MeterView {
    pub created_at: u64,
    pub last_activity: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub bandwidth_up: f64,
    pub bandwidth_down: f64,
    pub active_conns: i32,
    pub total_conns: u64,
}

impl ActivityMeter {
    pub fn new() -> Self {
        let now = current_time_secs();
        Self {
            created_at: now,
            last_activity: AtomicU64::new(now),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            total_conns: AtomicU64::new(0),
            active_conns: AtomicI32::new(0),
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Bump the last-activity timestamp. Monotonic non-decreasing.
    pub fn touch(&self) {
        self.last_activity
            .fetch_max(current_time_secs(), Ordering::Relaxed);
    }

    /// Account `n` bytes copied local to remote
    pub fn record_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
        self.push_sample(n, 0);
    }

    /// Account `n` bytes copied remote to local
    pub fn record_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
        self.push_sample(0, n);
    }

    /// A forwarding session was accepted
    pub fn session_began(&self) {
        self.total_conns.fetch_add(1, Ordering::Relaxed);
        self.active_conns.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// A forwarding session terminated, on any path
    pub fn session_ended(&self) {
        self.active_conns.fetch_sub(1, Ordering::Relaxed);
        self.touch();
    }

    /// Number of forwarding sessions currently in flight
    pub fn active_conns(&self) -> i32 {
        self.active_conns.load(Ordering::Relaxed).max(0)
    }

    fn push_sample(&self, sent: u64, received: u64) {
        let now = Instant::now();
        let mut window = self.window.lock().expect("meter window poisoned");
        window.push_back(Sample {
            at: now,
            sent,
            received,
        });
        Self::prune(&mut window, now);
    }

    fn prune(window: &mut VecDeque<Sample>, now: Instant) {
        while let Some(front) = window.front() {
            if now.duration_since(front.at) > BANDWIDTH_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take a consistent snapshot of all counters
    pub fn snapshot(&self) -> MeterView {
        let (bandwidth_up, bandwidth_down) = {
            let now = Instant::now();
            let mut window = self.window.lock().expect("meter window poisoned");
            Self::prune(&mut window, now);
            let (sent, received) = window
                .iter()
                .fold((0u64, 0u64), |(s, r), sample| {
                    (s + sample.sent, r + sample.received)
                });
            let secs = BANDWIDTH_WINDOW.as_secs_f64();
            (sent as f64 / secs, received as f64 / secs)
        };

        MeterView {
            created_at: self.created_at,
            last_activity: self.last_activity.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bandwidth_up,
            bandwidth_down,
            active_conns: self.active_conns(),
            total_conns: self.total_conns.load(Ordering::Relaxed),
        }
    }
}

impl Default for ActivityMeter {
    fn default() -> Self {
        Self::new()
    }
}
