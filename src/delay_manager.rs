use std::thread;
use std::time::Duration;
use log::{debug, warn};

/// Fixed pause after every request. Not adaptive.
pub fn politeness_delay(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    debug!("Waiting for {:?} (Politeness Delay)...", delay);
    thread::sleep(delay);
}

/// Longer fixed pause after a 429 response.
pub fn rate_limit_backoff(delay: Duration, url: &str) {
    warn!("Rate limited at {}. Waiting for {:?}...", url, delay);
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
