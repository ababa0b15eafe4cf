use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::info;

const REPORT_EVERY: Duration = Duration::from_secs(1);

/// Processed count, percentage and ETA for one stage, logged at most once a second
/// (plus once on the last item).
pub struct Progress {
    label: String,
    total: usize,
    done: AtomicUsize,
    errors: AtomicUsize,
    started: Instant,
    last_report: Mutex<Option<Instant>>,
}

impl Progress {
    pub fn new(label: impl Into<String>, total: usize) -> Self {
        Progress {
            label: label.into(),
            total,
            done: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            started: Instant::now(),
            last_report: Mutex::new(None),
        }
    }

    pub fn tick(&self, failed: bool) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        if failed {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        let now = Instant::now();
        let mut last = self.last_report.lock().unwrap_or_else(PoisonError::into_inner);
        let due = last.map_or(true, |t| now.duration_since(t) >= REPORT_EVERY);
        if due || done == self.total {
            *last = Some(now);
            info!(
                "[{}] Processed {} / {} ({:.1}%), {} errors, ETA {}",
                self.label,
                done,
                self.total,
                percent(done, self.total),
                self.errors.load(Ordering::SeqCst),
                format_eta(eta(done, self.total, now.duration_since(self.started))),
            );
        }
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }
}

pub fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

/// Linear extrapolation from the average time per finished item.
pub fn eta(done: usize, total: usize, elapsed: Duration) -> Option<Duration> {
    if done == 0 {
        return None;
    }
    let remaining = total.saturating_sub(done) as u32;
    Some(elapsed / done as u32 * remaining)
}

fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        None => "unknown".to_string(),
        Some(d) => {
            let secs = d.as_secs();
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }
}
