//! Dedicated execution context of one channel.
//!
//! Each context is a named OS thread fed by a command channel. Drivers are
//! built, started, polled and stopped on that thread only, so a slow driver
//! never stalls another channel or the control thread.

use crate::channel::{ChannelKind, IngestionSink, Reading, SubSensor};
use crate::driver::{DriverFactory, SensorDriver};
use crate::rate::SamplingPlan;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll period used for continuous plans.
pub const CONTINUOUS_POLL: Duration = Duration::from_millis(100);

enum Command {
    Start {
        sensors: Vec<SubSensor>,
        plan: SamplingPlan,
    },
    Quit,
}

/// Decrements the live-context counter when the thread ends.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a running channel thread.
pub struct ExecutionContext {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl ExecutionContext {
    /// Spawn the channel thread. `live` counts threads that have not exited yet.
    ///
    /// When `predecessor` is given, the new thread waits for it to exit before
    /// handling any command, so stale workers are stopped before fresh ones start.
    pub fn spawn(
        kind: ChannelKind,
        factory: Arc<dyn DriverFactory>,
        sink: Arc<dyn IngestionSink>,
        live: Arc<AtomicUsize>,
        predecessor: Option<JoinHandle<()>>,
    ) -> std::io::Result<Self> {
        let (commands, receiver) = unbounded();

        live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(live);

        let thread = thread::Builder::new()
            .name(kind.thread_name().to_string())
            .spawn(move || {
                let _guard = guard;
                if let Some(previous) = predecessor {
                    if previous.join().is_err() {
                        warn!("Previous {} panicked", kind.thread_name());
                    }
                }
                run(kind, receiver, factory.as_ref(), sink.as_ref());
            })?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    /// Queue construction and start of `sensors` with `plan`.
    pub fn post_start(&self, sensors: Vec<SubSensor>, plan: SamplingPlan) -> bool {
        self.commands.send(Command::Start { sensors, plan }).is_ok()
    }

    /// Ask the thread to stop its workers and exit. Does not wait.
    ///
    /// Returns the thread's handle so a successor can wait for it.
    pub fn quit(&mut self) -> Option<JoinHandle<()>> {
        let _ = self.commands.send(Command::Quit);
        self.thread.take()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // Detached; the thread exits on its own once its drivers are stopped.
            let _ = self.quit();
        }
    }
}

fn poll_period(plan: &SamplingPlan) -> Duration {
    if plan.is_continuous() {
        CONTINUOUS_POLL
    } else {
        plan.interval()
    }
}

fn run(
    kind: ChannelKind,
    commands: Receiver<Command>,
    factory: &dyn DriverFactory,
    sink: &dyn IngestionSink,
) {
    let mut workers: Vec<Box<dyn SensorDriver>> = Vec::new();
    let mut period: Option<Duration> = None;
    let mut next_poll = Instant::now();

    loop {
        let command = match period {
            None => match commands.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
            Some(_) => match commands.recv_deadline(next_poll) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
        };

        match command {
            Some(Command::Start { sensors, plan }) => {
                stop_workers(&mut workers);
                workers = start_workers(kind, &sensors, &plan, factory);
                info!(
                    "{kind} sensor started {} of {} workers (interval {} ms)",
                    workers.len(),
                    sensors.len(),
                    plan.interval_millis
                );
                period = (!workers.is_empty()).then(|| poll_period(&plan));
                next_poll = Instant::now();
            }
            Some(Command::Quit) => break,
            None => {
                poll_workers(&mut workers, sink);
                if let Some(period) = period {
                    let now = Instant::now();
                    next_poll += period;
                    if next_poll < now {
                        next_poll = now + period;
                    }
                }
            }
        }
    }

    stop_workers(&mut workers);
    debug!("{} finished", kind.thread_name());
}

fn start_workers(
    kind: ChannelKind,
    sensors: &[SubSensor],
    plan: &SamplingPlan,
    factory: &dyn DriverFactory,
) -> Vec<Box<dyn SensorDriver>> {
    let mut started = Vec::with_capacity(sensors.len());
    for sensor in sensors {
        let mut driver = match factory.create(*sensor) {
            Ok(driver) => driver,
            Err(e) => {
                warn!("{kind}: could not create {sensor} worker: {e}");
                continue;
            }
        };
        match driver.start(plan) {
            Ok(()) => started.push(driver),
            Err(e) => warn!("{kind}: could not start {sensor} worker: {e}"),
        }
    }
    started
}

fn poll_workers(workers: &mut [Box<dyn SensorDriver>], sink: &dyn IngestionSink) {
    for driver in workers.iter_mut() {
        match driver.sample() {
            Ok(Some(fields)) => {
                debug!("{} reading with {} fields", driver.sensor(), fields.len());
                sink.ingest(Reading::new(driver.sensor(), fields));
            }
            Ok(None) => {}
            Err(e) => warn!("{e}"),
        }
    }
}

fn stop_workers(workers: &mut Vec<Box<dyn SensorDriver>>) {
    for mut driver in workers.drain(..) {
        driver.stop();
    }
}
