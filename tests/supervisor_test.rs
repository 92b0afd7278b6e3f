//! Threaded supervisor behaviour against fake drivers.

use crossbeam_channel::{bounded, Receiver, Sender};
use sense_platform::channel::{ChannelKind, Fields, IngestionSink, Reading, SubSensor};
use sense_platform::driver::{DriverError, DriverFactory, SensorDriver};
use sense_platform::rate::SamplingPlan;
use sense_platform::supervisor::{ChannelSupervisor, ThreadedSupervisor};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

struct FakeDriver {
    sensor: SubSensor,
    counters: Arc<Counters>,
    gate: Option<Receiver<()>>,
    started: bool,
}

impl SensorDriver for FakeDriver {
    fn sensor(&self) -> SubSensor {
        self.sensor
    }

    fn start(&mut self, _plan: &SamplingPlan) -> Result<(), DriverError> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.started = true;
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sample(&mut self) -> Result<Option<Fields>, DriverError> {
        let mut fields = Fields::new();
        fields.insert("value".to_string(), 1.into());
        Ok(Some(fields))
    }

    fn stop(&mut self) {
        if self.started {
            self.started = false;
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct FakeFactory {
    counters: Arc<Counters>,
    missing: Vec<SubSensor>,
    gate: Option<Receiver<()>>,
}

impl DriverFactory for FakeFactory {
    fn create(&self, sensor: SubSensor) -> Result<Box<dyn SensorDriver>, DriverError> {
        if self.missing.contains(&sensor) {
            return Err(DriverError::Unavailable(sensor));
        }
        Ok(Box::new(FakeDriver {
            sensor,
            counters: self.counters.clone(),
            gate: self.gate.clone(),
            started: false,
        }))
    }
}

#[derive(Default)]
struct CollectingSink {
    readings: Mutex<Vec<Reading>>,
    threads: Mutex<HashSet<String>>,
}

impl CollectingSink {
    fn len(&self) -> usize {
        self.readings.lock().unwrap().len()
    }

    fn sensors(&self) -> HashSet<SubSensor> {
        self.readings
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.sensor)
            .collect()
    }
}

impl IngestionSink for CollectingSink {
    fn ingest(&self, reading: Reading) {
        if let Some(name) = thread::current().name() {
            self.threads.lock().unwrap().insert(name.to_string());
        }
        self.readings.lock().unwrap().push(reading);
    }
}

fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

fn supervisor(
    kind: ChannelKind,
    factory: FakeFactory,
) -> (ThreadedSupervisor, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::default());
    let supervisor = ThreadedSupervisor::new(kind, Arc::new(factory), sink.clone());
    (supervisor, sink)
}

#[test]
fn readings_flow_from_channel_thread() {
    let (mut supervisor, sink) = supervisor(ChannelKind::Ambience, FakeFactory::default());

    supervisor.enable(SamplingPlan::every(10)).unwrap();
    assert!(supervisor.is_active());
    assert!(supervisor.handle().is_some());
    assert_eq!(supervisor.plan(), Some(SamplingPlan::every(10)));

    assert!(wait_until(Duration::from_secs(5), || {
        sink.sensors() == HashSet::from([SubSensor::Noise, SubSensor::Light])
    }));
    let threads = sink.threads.lock().unwrap().clone();
    assert_eq!(threads, HashSet::from([ChannelKind::Ambience.thread_name().to_string()]));
}

#[test]
fn enable_twice_replaces_context() {
    let factory = FakeFactory::default();
    let counters = factory.counters.clone();
    let (mut supervisor, _sink) = supervisor(ChannelKind::Motion, factory);

    supervisor.enable(SamplingPlan::every(20)).unwrap();
    let first = supervisor.handle();
    supervisor.enable(SamplingPlan::every(20)).unwrap();

    assert_ne!(supervisor.handle(), first);
    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.live_contexts() == 1 && counters.starts.load(Ordering::SeqCst) == 2
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        counters.stops.load(Ordering::SeqCst) == 1
    }));
}

#[test]
fn disable_stops_workers_and_thread() {
    let factory = FakeFactory::default();
    let counters = factory.counters.clone();
    let (mut supervisor, sink) = supervisor(ChannelKind::PhoneState, factory);

    supervisor.enable(SamplingPlan::every(10)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || sink.len() > 0));

    supervisor.disable();
    assert!(!supervisor.is_active());
    assert_eq!(supervisor.handle(), None);
    assert_eq!(supervisor.plan(), None);

    assert!(wait_until(Duration::from_secs(5), || supervisor.live_contexts() == 0));
    assert_eq!(counters.stops.load(Ordering::SeqCst), 5);

    // A second disable is a no-op.
    supervisor.disable();
    assert_eq!(counters.stops.load(Ordering::SeqCst), 5);
}

#[test]
fn unavailable_sensor_does_not_block_siblings() {
    let factory = FakeFactory {
        missing: vec![SubSensor::Pressure],
        ..FakeFactory::default()
    };
    let counters = factory.counters.clone();
    let (mut supervisor, sink) = supervisor(ChannelKind::PhoneState, factory);

    supervisor.enable(SamplingPlan::every(10)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || sink.sensors().len() == 4));
    assert_eq!(counters.starts.load(Ordering::SeqCst), 4);
    assert!(!sink.sensors().contains(&SubSensor::Pressure));
}

#[test]
fn enable_returns_before_drivers_start() {
    let (release, gate): (Sender<()>, Receiver<()>) = bounded(0);
    let factory = FakeFactory {
        gate: Some(gate),
        ..FakeFactory::default()
    };
    let counters = factory.counters.clone();
    let (mut supervisor, sink) = supervisor(ChannelKind::Location, factory);

    supervisor.enable(SamplingPlan::every(10)).unwrap();
    assert!(supervisor.is_active());
    assert_eq!(counters.starts.load(Ordering::SeqCst), 0);

    release.send(()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || sink.len() > 0));
    assert_eq!(counters.starts.load(Ordering::SeqCst), 1);
}

#[test]
fn channel_without_sensors_stays_idle() {
    let factory = FakeFactory::default();
    let counters = factory.counters.clone();
    let (mut supervisor, sink) = supervisor(ChannelKind::PopQuiz, factory);

    supervisor.enable(SamplingPlan::every(10)).unwrap();
    assert!(supervisor.is_active());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(sink.len(), 0);
    assert_eq!(counters.starts.load(Ordering::SeqCst), 0);

    supervisor.disable();
    assert!(wait_until(Duration::from_secs(5), || supervisor.live_contexts() == 0));
}

/// Driver that logs `start#N` and `stop#N` and takes a while to sample.
struct SlowDriver {
    sensor: SubSensor,
    id: usize,
    events: Arc<Mutex<Vec<String>>>,
}

impl SensorDriver for SlowDriver {
    fn sensor(&self) -> SubSensor {
        self.sensor
    }

    fn start(&mut self, _plan: &SamplingPlan) -> Result<(), DriverError> {
        self.events.lock().unwrap().push(format!("start#{}", self.id));
        Ok(())
    }

    fn sample(&mut self) -> Result<Option<Fields>, DriverError> {
        thread::sleep(Duration::from_millis(300));
        Ok(None)
    }

    fn stop(&mut self) {
        self.events.lock().unwrap().push(format!("stop#{}", self.id));
    }
}

#[derive(Default)]
struct SlowFactory {
    created: AtomicUsize,
    events: Arc<Mutex<Vec<String>>>,
}

impl DriverFactory for SlowFactory {
    fn create(&self, sensor: SubSensor) -> Result<Box<dyn SensorDriver>, DriverError> {
        let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(SlowDriver {
            sensor,
            id,
            events: self.events.clone(),
        }))
    }
}

fn slow_motion_supervisor() -> (ThreadedSupervisor, Arc<Mutex<Vec<String>>>) {
    let factory = SlowFactory::default();
    let events = factory.events.clone();
    let supervisor = ThreadedSupervisor::new(
        ChannelKind::Motion,
        Arc::new(factory),
        Arc::new(CollectingSink::default()),
    );
    (supervisor, events)
}

#[test]
fn rebuild_stops_stale_workers_before_starting_new_ones() {
    let (mut supervisor, events) = slow_motion_supervisor();

    supervisor.enable(SamplingPlan::every(10)).unwrap();
    thread::sleep(Duration::from_millis(100));
    supervisor.enable(SamplingPlan::every(10)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || events.lock().unwrap().len() >= 3));
    assert_eq!(
        events.lock().unwrap()[..3],
        ["start#1", "stop#1", "start#2"]
    );
}

#[test]
fn disable_then_enable_stops_before_starting() {
    let (mut supervisor, events) = slow_motion_supervisor();

    supervisor.enable(SamplingPlan::every(10)).unwrap();
    thread::sleep(Duration::from_millis(100));
    supervisor.disable();
    supervisor.enable(SamplingPlan::every(10)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || events.lock().unwrap().len() >= 3));
    assert_eq!(
        events.lock().unwrap()[..3],
        ["start#1", "stop#1", "start#2"]
    );
}
