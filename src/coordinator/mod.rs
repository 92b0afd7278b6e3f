//! Coordinator: orchestrates channel supervisors against the state store.
//!
//! The [`Coordinator`] is a cheap handle to a single control thread which
//! owns the [`ServiceState`], every supervisor, the transmit scheduler and
//! the backend session. Operations are sent to that thread and answered
//! through a reply channel, so requests are applied in arrival order.
//!
//! ```no_run
//! use sense_platform::{ChannelKind, Coordinator, JsonPrefs, StateStore};
//! use std::sync::Arc;
//!
//! let store = StateStore::new(Arc::new(JsonPrefs::in_memory()));
//! let coordinator = Coordinator::builder(store).spawn()?;
//! coordinator.toggle(ChannelKind::Motion, true);
//! coordinator.start();
//! assert_ne!(coordinator.status_bitmask(), 0);
//! # Ok::<(), std::io::Error>(())
//! ```

mod control;
pub mod session;
pub mod state;

pub use control::SCREEN_OFF_SETTLE;
pub use session::{LocalSession, LoginOutcome, SessionBackend};
pub use state::{ChannelState, ChannelStatus, ServiceSnapshot, ServiceState};

use crate::channel::{ChannelKind, IngestionSink};
use crate::config::SensingPrefs;
use crate::driver::DriverFactory;
use crate::rate::RateTier;
use crate::store::StateStore;
use crate::supervisor::{ChannelSupervisor, ThreadedSupervisor};
use crate::transmit::TransmitScheduler;
use crate::transparency::SharedTransparencyLog;
use control::{ControlLoop, ControlMessage};
use crossbeam_channel::{bounded, unbounded, Sender};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Handle to the coordinator's control thread.
///
/// Dropping the handle stops all workers and the transmit timer but leaves
/// persisted state untouched.
pub struct Coordinator {
    control: Sender<ControlMessage>,
    thread: Option<JoinHandle<()>>,
}

impl Coordinator {
    pub fn builder(store: StateStore) -> CoordinatorBuilder {
        CoordinatorBuilder::new(store)
    }

    /// Replay the persisted channel state and mark the service running.
    ///
    /// Returns false if any enabled channel failed to activate.
    pub fn start(&self) -> bool {
        self.request(ControlMessage::Start).unwrap_or(false)
    }

    /// Disable every channel, log out and mark the service stopped.
    ///
    /// Channel enabled flags are kept so a later start resumes them.
    pub fn stop(&self) -> bool {
        self.request(ControlMessage::Stop).unwrap_or(false)
    }

    /// Persist the service's main switch, then start or stop accordingly.
    pub fn set_main(&self, active: bool) -> bool {
        self.request(|reply| ControlMessage::SetMain { active, reply })
            .unwrap_or(false)
    }

    /// Persist `active` for `kind`, then apply it if it changes the channel.
    ///
    /// Workers only start while the service runs. Returns false only when an
    /// activation was attempted and failed; persistence failures are logged.
    pub fn toggle(&self, kind: ChannelKind, active: bool) -> bool {
        self.request(|reply| ControlMessage::Toggle {
            kind,
            active,
            reply,
        })
        .unwrap_or(false)
    }

    /// Restart every enabled channel with plans for the new sampling tier.
    pub fn on_rate_change(&self, tier: RateTier) -> bool {
        self.on_raw_rate_change(tier.into())
    }

    /// Like [`Coordinator::on_rate_change`] with an unvalidated preference
    /// value. Channels fail to activate if the value is not a valid tier.
    pub fn on_raw_rate_change(&self, raw: i32) -> bool {
        self.request(|reply| ControlMessage::RateChange { raw, reply })
            .unwrap_or(false)
    }

    /// Re-arm the transmit schedule for a new sync tier.
    pub fn on_sync_rate_change(&self, tier: RateTier) -> bool {
        self.on_raw_sync_rate_change(tier.into())
    }

    pub fn on_raw_sync_rate_change(&self, raw: i32) -> bool {
        self.request(|reply| ControlMessage::SyncRateChange { raw, reply })
            .unwrap_or(false)
    }

    /// Replace the sensing preferences, restarting channels if sampling changed.
    pub fn update_prefs(&self, prefs: SensingPrefs) -> bool {
        self.request(|reply| ControlMessage::UpdatePrefs { prefs, reply })
            .unwrap_or(false)
    }

    /// Network connectivity changed. Logs in on connect, out on disconnect.
    pub fn on_connectivity_change(&self, connected: bool) {
        let _ = self.request(|reply| ControlMessage::Connectivity { connected, reply });
    }

    /// The display turned off; schedule motion sensor re-registration.
    pub fn on_screen_off(&self) {
        let _ = self.request(ControlMessage::ScreenOff);
    }

    pub fn status_bitmask(&self) -> u32 {
        self.request(ControlMessage::StatusBitmask).unwrap_or(0)
    }

    pub fn snapshot(&self) -> Option<ServiceSnapshot> {
        self.request(ControlMessage::Snapshot)
    }

    pub fn is_running(&self) -> bool {
        self.status_bitmask() & crate::channel::STATUS_RUNNING != 0
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> ControlMessage) -> Option<T> {
        let (reply, response) = bounded(1);
        if self.control.send(build(reply)).is_err() {
            warn!("Coordinator control thread is gone");
            return None;
        }
        response.recv().ok()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let _ = self.control.send(ControlMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Coordinator control thread panicked");
            }
        }
    }
}

/// Collects a coordinator's collaborators before spawning its control thread.
pub struct CoordinatorBuilder {
    store: StateStore,
    prefs: SensingPrefs,
    sync_rate: i32,
    supervisors: BTreeMap<ChannelKind, Box<dyn ChannelSupervisor>>,
    transmit: Option<TransmitScheduler>,
    session: Option<Arc<dyn SessionBackend>>,
    transparency: Option<SharedTransparencyLog>,
}

impl CoordinatorBuilder {
    fn new(store: StateStore) -> Self {
        Self {
            store,
            prefs: SensingPrefs::default(),
            sync_rate: RateTier::Normal.into(),
            supervisors: BTreeMap::new(),
            transmit: None,
            session: None,
            transparency: None,
        }
    }

    pub fn prefs(mut self, prefs: SensingPrefs) -> Self {
        self.prefs = prefs;
        self
    }

    pub fn sync_rate(mut self, raw: i32) -> Self {
        self.sync_rate = raw;
        self
    }

    /// Register a supervisor, replacing any earlier one for the same kind.
    pub fn supervisor(mut self, supervisor: Box<dyn ChannelSupervisor>) -> Self {
        self.supervisors.insert(supervisor.kind(), supervisor);
        self
    }

    /// Register a [`ThreadedSupervisor`] for every channel kind.
    pub fn threaded_supervisors(
        mut self,
        factory: Arc<dyn DriverFactory>,
        sink: Arc<dyn IngestionSink>,
    ) -> Self {
        for kind in ChannelKind::ALL {
            let supervisor = ThreadedSupervisor::new(kind, factory.clone(), sink.clone());
            self.supervisors.insert(kind, Box::new(supervisor));
        }
        self
    }

    pub fn transmit(mut self, scheduler: TransmitScheduler) -> Self {
        self.transmit = Some(scheduler);
        self
    }

    pub fn session(mut self, session: Arc<dyn SessionBackend>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn transparency(mut self, log: SharedTransparencyLog) -> Self {
        self.transparency = Some(log);
        self
    }

    /// Spawn the control thread. The service starts stopped.
    pub fn spawn(self) -> std::io::Result<Coordinator> {
        let (control, inbox) = unbounded();
        let control_loop = ControlLoop::new(
            self.store,
            self.prefs,
            self.sync_rate,
            self.supervisors,
            self.transmit,
            self.session,
            self.transparency,
            control.clone(),
        );

        let thread = thread::Builder::new()
            .name("Sense control thread".to_string())
            .spawn(move || control_loop.run(inbox))?;

        Ok(Coordinator {
            control,
            thread: Some(thread),
        })
    }
}
