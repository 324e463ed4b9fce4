//! ---
//! ct_section: "02-power-sensing"
//! ct_subsection: "module"
//! ct_type: "source"
//! ct_scope: "code"
//! ct_description: "Blocking delay providers for device settling."
//! ct_version: "v0.1.0"
//! ct_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use parking_lot::Mutex;

/// Sleeps the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Returns immediately and remembers how long it was asked to wait. Clones
/// share the same record.
#[derive(Debug, Default, Clone)]
pub struct RecordingDelay {
    requests: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingDelay {
    pub fn requests(&self) -> Vec<Duration> {
        self.requests.lock().clone()
    }

    pub fn total(&self) -> Duration {
        self.requests.lock().iter().sum()
    }
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.requests
            .lock()
            .push(Duration::from_nanos(u64::from(ns)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_delay_shares_history_between_clones() {
        let mut delay = RecordingDelay::default();
        let observer = delay.clone();
        delay.delay_ms(10);
        delay.delay_us(500);
        assert_eq!(observer.requests().len(), 2);
        assert_eq!(observer.total(), Duration::from_micros(10_500));
    }

    #[test]
    fn std_delay_waits_at_least_requested() {
        let mut delay = StdDelay;
        let started = std::time::Instant::now();
        delay.delay_ms(2);
        assert!(started.elapsed() >= Duration::from_millis(2));
    }
}
