//! Timer driving buffer flushes at the configured sync rate.

use super::BufferFlusher;
use crate::rate::{self, ConfigurationError, SyncPlan};
use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

struct Timer {
    cancel: Sender<()>,
    plan: SyncPlan,
}

/// Periodic flush timer.
///
/// Arming fires one flush immediately and then repeats every period. In the
/// real-time tier it also flushes whenever the buffer nudges it.
pub struct TransmitScheduler {
    flusher: Arc<dyn BufferFlusher>,
    nudges: Receiver<()>,
    timer: Option<Timer>,
}

impl TransmitScheduler {
    /// `nudges` is the receiving end of [`super::nudge_channel`]; pass
    /// `crossbeam_channel::never()` when nothing nudges.
    pub fn new(flusher: Arc<dyn BufferFlusher>, nudges: Receiver<()>) -> Self {
        Self {
            flusher,
            nudges,
            timer: None,
        }
    }

    /// Cancel any running timer and start one for the raw sync-rate value.
    ///
    /// On an invalid value the previous timer is left untouched.
    pub fn arm(&mut self, raw_tier: i32) -> Result<SyncPlan, ConfigurationError> {
        let plan = rate::resolve_sync_raw(raw_tier)?;
        self.cancel();

        let (cancel, cancelled) = bounded::<()>(1);
        let flusher = self.flusher.clone();
        let nudges = if plan.drain_on_ingest {
            self.nudges.clone()
        } else {
            never()
        };

        let spawned = thread::Builder::new()
            .name("Transmit thread".to_string())
            .spawn(move || run_timer(plan, flusher.as_ref(), cancelled, nudges));

        match spawned {
            Ok(_) => {
                info!(
                    "Transmission armed every {}s{}",
                    plan.period.as_secs(),
                    if plan.drain_on_ingest { " with real-time drain" } else { "" }
                );
                self.timer = Some(Timer { cancel, plan });
            }
            Err(e) => warn!("Could not start transmit timer: {e}"),
        }
        Ok(plan)
    }

    /// Stop the timer. A flush already in progress completes.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            let _ = timer.cancel.try_send(());
            debug!("Transmission timer cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Plan of the running timer.
    pub fn plan(&self) -> Option<SyncPlan> {
        self.timer.as_ref().map(|t| t.plan)
    }
}

impl Drop for TransmitScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_timer(
    plan: SyncPlan,
    flusher: &dyn BufferFlusher,
    cancelled: Receiver<()>,
    nudges: Receiver<()>,
) {
    flush(flusher);
    let mut deadline = Instant::now() + plan.period;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        select! {
            recv(cancelled) -> _ => break,
            recv(nudges) -> msg => {
                if msg.is_err() {
                    // Nudger side is gone; keep the periodic schedule only.
                    run_periodic(plan, flusher, &cancelled, deadline);
                    break;
                }
                flush(flusher);
            }
            default(remaining) => {
                flush(flusher);
                deadline += plan.period;
            }
        }
    }
}

fn run_periodic(
    plan: SyncPlan,
    flusher: &dyn BufferFlusher,
    cancelled: &Receiver<()>,
    mut deadline: Instant,
) {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        select! {
            recv(cancelled) -> _ => break,
            default(remaining) => {
                flush(flusher);
                deadline += plan.period;
            }
        }
    }
}

fn flush(flusher: &dyn BufferFlusher) {
    match flusher.flush() {
        Ok(0) => debug!("Nothing to transmit"),
        Ok(count) => info!("Transmitted {count} readings"),
        Err(e) => warn!("Transmission failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmit::{nudge_channel, TransmitError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingFlusher {
        flushes: AtomicUsize,
    }

    impl BufferFlusher for CountingFlusher {
        fn flush(&self) -> Result<usize, TransmitError> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    fn wait_for(deadline: Duration, check: impl Fn() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    #[test]
    fn test_arm_flushes_immediately() {
        let flusher = Arc::new(CountingFlusher::default());
        let mut scheduler = TransmitScheduler::new(flusher.clone(), never());

        let plan = scheduler.arm(0).unwrap();
        assert_eq!(plan.period, Duration::from_secs(300));
        assert!(scheduler.is_armed());
        assert!(wait_for(Duration::from_secs(5), || flusher
            .flushes
            .load(Ordering::SeqCst)
            == 1));

        scheduler.cancel();
        assert!(!scheduler.is_armed());
    }

    #[test]
    fn test_invalid_tier_keeps_previous_timer() {
        let flusher = Arc::new(CountingFlusher::default());
        let mut scheduler = TransmitScheduler::new(flusher, never());

        scheduler.arm(-1).unwrap();
        assert!(scheduler.arm(9).is_err());
        assert_eq!(scheduler.plan().map(|p| p.period), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_realtime_drains_on_nudge() {
        let flusher = Arc::new(CountingFlusher::default());
        let (nudger, nudges) = nudge_channel();
        let mut scheduler = TransmitScheduler::new(flusher.clone(), nudges);

        scheduler.arm(-2).unwrap();
        assert!(wait_for(Duration::from_secs(5), || flusher
            .flushes
            .load(Ordering::SeqCst)
            >= 1));

        nudger.nudge();
        assert!(wait_for(Duration::from_secs(5), || flusher
            .flushes
            .load(Ordering::SeqCst)
            >= 2));
    }

    #[test]
    fn test_normal_tier_ignores_nudges() {
        let flusher = Arc::new(CountingFlusher::default());
        let (nudger, nudges) = nudge_channel();
        let mut scheduler = TransmitScheduler::new(flusher.clone(), nudges);

        scheduler.arm(0).unwrap();
        assert!(wait_for(Duration::from_secs(5), || flusher
            .flushes
            .load(Ordering::SeqCst)
            == 1));
        nudger.nudge();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(flusher.flushes.load(Ordering::SeqCst), 1);
    }
}
