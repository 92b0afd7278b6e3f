//! The coordinator's single control thread.
//!
//! Every public coordinator operation becomes a [`ControlMessage`] handled
//! here one at a time, so state transitions never interleave.

use super::session::{LoginOutcome, SessionBackend};
use super::state::{ServiceSnapshot, ServiceState};
use crate::channel::ChannelKind;
use crate::config::SensingPrefs;
use crate::rate;
use crate::store::StateStore;
use crate::supervisor::{ChannelSupervisor, DeferredAction};
use crate::transmit::TransmitScheduler;
use crate::transparency::SharedTransparencyLog;
use crossbeam_channel::{Receiver, Sender};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay between a display-off event and re-registering the motion sensor.
pub const SCREEN_OFF_SETTLE: Duration = Duration::from_millis(500);

pub(crate) enum ControlMessage {
    Start(Sender<bool>),
    Stop(Sender<bool>),
    SetMain {
        active: bool,
        reply: Sender<bool>,
    },
    Toggle {
        kind: ChannelKind,
        active: bool,
        reply: Sender<bool>,
    },
    RateChange {
        raw: i32,
        reply: Sender<bool>,
    },
    SyncRateChange {
        raw: i32,
        reply: Sender<bool>,
    },
    UpdatePrefs {
        prefs: SensingPrefs,
        reply: Sender<bool>,
    },
    Connectivity {
        connected: bool,
        reply: Sender<()>,
    },
    ScreenOff(Sender<()>),
    StatusBitmask(Sender<u32>),
    Snapshot(Sender<ServiceSnapshot>),
    DeferredFired {
        ticket: u64,
    },
    LoginFinished {
        attempt: u64,
        outcome: LoginOutcome,
    },
    Shutdown,
}

struct PendingReregister {
    ticket: u64,
    action: DeferredAction,
}

pub(crate) struct ControlLoop {
    state: ServiceState,
    store: StateStore,
    prefs: SensingPrefs,
    sync_rate: i32,
    supervisors: BTreeMap<ChannelKind, Box<dyn ChannelSupervisor>>,
    transmit: Option<TransmitScheduler>,
    session: Option<Arc<dyn SessionBackend>>,
    transparency: Option<SharedTransparencyLog>,
    control: Sender<ControlMessage>,
    reregister: Option<PendingReregister>,
    next_ticket: u64,
    login_attempt: Option<u64>,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: StateStore,
        prefs: SensingPrefs,
        sync_rate: i32,
        supervisors: BTreeMap<ChannelKind, Box<dyn ChannelSupervisor>>,
        transmit: Option<TransmitScheduler>,
        session: Option<Arc<dyn SessionBackend>>,
        transparency: Option<SharedTransparencyLog>,
        control: Sender<ControlMessage>,
    ) -> Self {
        Self {
            state: ServiceState::from_snapshot(&store.snapshot()),
            store,
            prefs,
            sync_rate,
            supervisors,
            transmit,
            session,
            transparency,
            control,
            reregister: None,
            next_ticket: 0,
            login_attempt: None,
        }
    }

    pub(crate) fn run(mut self, inbox: Receiver<ControlMessage>) {
        while let Ok(message) = inbox.recv() {
            if !self.handle(message) {
                break;
            }
        }
        self.shutdown();
    }

    /// Returns false once the loop should end.
    fn handle(&mut self, message: ControlMessage) -> bool {
        match message {
            ControlMessage::Start(reply) => {
                let _ = reply.send(self.start());
            }
            ControlMessage::Stop(reply) => {
                let _ = reply.send(self.stop());
            }
            ControlMessage::SetMain { active, reply } => {
                let _ = reply.send(self.set_main(active));
            }
            ControlMessage::Toggle {
                kind,
                active,
                reply,
            } => {
                let _ = reply.send(self.toggle(kind, active));
            }
            ControlMessage::RateChange { raw, reply } => {
                let _ = reply.send(self.on_rate_change(raw));
            }
            ControlMessage::SyncRateChange { raw, reply } => {
                let _ = reply.send(self.on_sync_rate_change(raw));
            }
            ControlMessage::UpdatePrefs { prefs, reply } => {
                let _ = reply.send(self.update_prefs(prefs));
            }
            ControlMessage::Connectivity { connected, reply } => {
                self.on_connectivity_change(connected);
                let _ = reply.send(());
            }
            ControlMessage::ScreenOff(reply) => {
                self.on_screen_off();
                let _ = reply.send(());
            }
            ControlMessage::StatusBitmask(reply) => {
                let _ = reply.send(self.state.status_bitmask());
            }
            ControlMessage::Snapshot(reply) => {
                let _ = reply.send(self.state.snapshot(self.prefs.sample_rate, self.sync_rate));
            }
            ControlMessage::DeferredFired { ticket } => self.on_deferred_fired(ticket),
            ControlMessage::LoginFinished { attempt, outcome } => {
                self.on_login_finished(attempt, outcome)
            }
            ControlMessage::Shutdown => return false,
        }
        true
    }

    fn start(&mut self) -> bool {
        if self.state.running {
            debug!("Start requested while already running");
            return true;
        }

        info!("Starting sense service");
        self.state.running = true;
        self.state.foreground = true;

        let persisted = self.store.snapshot();
        for kind in ChannelKind::ALL {
            self.state.channel_mut(kind).enabled = persisted.is_enabled(kind);
        }

        let mut ok = true;
        for kind in self.state.enabled_channels() {
            ok &= self.activate(kind);
        }

        if !self.state.logged_in {
            self.request_login();
        }
        ok
    }

    fn stop(&mut self) -> bool {
        if !self.state.running {
            debug!("Stop requested while not running");
            return true;
        }

        info!("Stopping sense service");
        self.cancel_reregister();
        for kind in self.state.enabled_channels() {
            self.deactivate(kind);
        }
        self.logout();
        self.state.running = false;
        self.state.foreground = false;
        true
    }

    fn set_main(&mut self, active: bool) -> bool {
        if let Err(e) = self.store.set_main_enabled(active) {
            warn!("Failed to persist service status: {e}");
        }
        if active {
            self.start()
        } else {
            self.stop()
        }
    }

    fn toggle(&mut self, kind: ChannelKind, active: bool) -> bool {
        if let Err(e) = self.store.set_channel_enabled(kind, active) {
            warn!("Failed to persist {kind} status: {e}");
        }

        let channel = self.state.channel_mut(kind);
        if channel.enabled == active {
            debug!("{kind} sensor is already {}", on_off(active));
            return true;
        }
        channel.enabled = active;

        if let Some(log) = &self.transparency {
            log.record_toggle();
        }
        info!("Toggled {kind} sensor {}", on_off(active));

        if !self.state.running {
            return true;
        }
        if active {
            self.activate(kind)
        } else {
            self.deactivate(kind);
            true
        }
    }

    fn on_rate_change(&mut self, raw: i32) -> bool {
        self.prefs.sample_rate = raw;
        self.restart_enabled()
    }

    /// An invalid value is rejected and the previous schedule stays in force.
    fn on_sync_rate_change(&mut self, raw: i32) -> bool {
        if let Err(e) = rate::resolve_sync_raw(raw) {
            error!("Invalid sync rate: {e}");
            return false;
        }
        self.sync_rate = raw;
        if self.state.running && self.state.logged_in {
            self.arm_transmit()
        } else {
            true
        }
    }

    fn update_prefs(&mut self, prefs: SensingPrefs) -> bool {
        if prefs == self.prefs {
            return true;
        }
        let resample = prefs.sample_rate != self.prefs.sample_rate
            || prefs.override_mode != self.prefs.override_mode;
        self.prefs = prefs;

        if !prefs.screen_off_fix {
            self.cancel_reregister();
        }
        if resample {
            self.restart_enabled()
        } else {
            true
        }
    }

    /// Disable then re-enable every enabled channel with a freshly resolved plan.
    fn restart_enabled(&mut self) -> bool {
        if !self.state.running {
            return true;
        }
        info!("Restarting sensors with sample rate {}", self.prefs.sample_rate);
        self.cancel_reregister();

        let mut ok = true;
        for kind in self.state.enabled_channels() {
            self.deactivate(kind);
            ok &= self.activate(kind);
        }
        ok
    }

    fn on_connectivity_change(&mut self, connected: bool) {
        if !self.state.running {
            return;
        }
        if connected {
            if !self.state.logged_in && self.login_attempt.is_none() {
                self.request_login();
            }
        } else if self.state.logged_in {
            info!("Connectivity lost");
            self.logout();
        }
    }

    fn on_screen_off(&mut self) {
        if !self.state.running || !self.prefs.screen_off_fix {
            return;
        }
        let subscribed = self
            .supervisors
            .get(&ChannelKind::Motion)
            .is_some_and(|s| s.display_off_subscribed());
        if !subscribed {
            return;
        }

        self.cancel_reregister();
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let control = self.control.clone();

        match DeferredAction::schedule("Motion re-register", SCREEN_OFF_SETTLE, move || {
            let _ = control.send(ControlMessage::DeferredFired { ticket });
        }) {
            Ok(action) => {
                debug!("Motion sensor re-registration scheduled");
                self.reregister = Some(PendingReregister { ticket, action });
            }
            Err(e) => warn!("Could not schedule motion re-registration: {e}"),
        }
    }

    fn on_deferred_fired(&mut self, ticket: u64) {
        match &self.reregister {
            Some(pending) if pending.ticket == ticket => {}
            _ => {
                debug!("Ignoring stale motion re-registration");
                return;
            }
        }
        self.reregister = None;

        let kind = ChannelKind::Motion;
        if !self.state.running || !self.state.channel(kind).enabled {
            return;
        }
        let Some(supervisor) = self.supervisors.get_mut(&kind) else {
            return;
        };
        let Some(plan) = supervisor.plan() else {
            return;
        };

        info!("Re-registering motion sensor after display off");
        supervisor.disable();
        let handle = match supervisor.enable(plan) {
            Ok(()) => supervisor.handle(),
            Err(e) => {
                error!("Failed to re-register motion sensor: {e}");
                None
            }
        };
        self.state.channel_mut(kind).worker_handle = handle;
    }

    fn request_login(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };

        self.next_ticket += 1;
        let attempt = self.next_ticket;
        let control = self.control.clone();

        let spawned = thread::Builder::new()
            .name("Connection thread".to_string())
            .spawn(move || {
                let outcome = session.login();
                let _ = control.send(ControlMessage::LoginFinished { attempt, outcome });
            });

        match spawned {
            Ok(_) => {
                debug!("Login attempt {attempt} started");
                self.login_attempt = Some(attempt);
            }
            Err(e) => error!("Could not start login: {e}"),
        }
    }

    fn on_login_finished(&mut self, attempt: u64, outcome: LoginOutcome) {
        if self.login_attempt != Some(attempt) {
            debug!("Ignoring result of stale login attempt {attempt}");
            return;
        }
        self.login_attempt = None;

        if !self.state.running {
            return;
        }
        match outcome {
            LoginOutcome::Success => {
                info!("Logged in");
                self.state.logged_in = true;
                self.arm_transmit();
            }
            LoginOutcome::Forbidden => {
                warn!("Login refused: invalid credentials");
                self.state.logged_in = false;
            }
            LoginOutcome::Failed => {
                warn!("Login failed");
                self.state.logged_in = false;
            }
        }
    }

    fn logout(&mut self) {
        self.login_attempt = None;
        if self.state.logged_in {
            info!("Logged out");
        }
        self.state.logged_in = false;
        if let Some(transmit) = &mut self.transmit {
            transmit.cancel();
        }
    }

    fn arm_transmit(&mut self) -> bool {
        let Some(transmit) = &mut self.transmit else {
            return true;
        };
        match transmit.arm(self.sync_rate) {
            Ok(_) => true,
            Err(e) => {
                error!("Cannot schedule transmission: {e}");
                false
            }
        }
    }

    /// Resolve a plan and enable the channel's supervisor.
    fn activate(&mut self, kind: ChannelKind) -> bool {
        let plan = match rate::resolve_raw(self.prefs.sample_rate, kind, self.prefs.override_mode)
        {
            Ok(plan) => plan,
            Err(e) => {
                error!("Cannot start {kind} sensor: {e}");
                self.state.channel_mut(kind).worker_handle = None;
                return false;
            }
        };

        if kind == ChannelKind::Motion {
            self.cancel_reregister();
        }

        let Some(supervisor) = self.supervisors.get_mut(&kind) else {
            warn!("No supervisor registered for {kind} sensor");
            return true;
        };

        let handle = match supervisor.enable(plan) {
            Ok(()) => supervisor.handle(),
            Err(e) => {
                error!("Failed to enable {kind} sensor: {e}");
                self.state.channel_mut(kind).worker_handle = None;
                return false;
            }
        };
        self.state.channel_mut(kind).worker_handle = handle;
        true
    }

    fn deactivate(&mut self, kind: ChannelKind) {
        if kind == ChannelKind::Motion {
            self.cancel_reregister();
        }
        if let Some(supervisor) = self.supervisors.get_mut(&kind) {
            supervisor.disable();
        }
        self.state.channel_mut(kind).worker_handle = None;
    }

    fn cancel_reregister(&mut self) {
        if let Some(mut pending) = self.reregister.take() {
            pending.action.cancel();
            debug!("Pending motion re-registration cancelled");
        }
    }

    /// Tear down live resources without touching persisted state.
    fn shutdown(&mut self) {
        self.cancel_reregister();
        for supervisor in self.supervisors.values_mut() {
            supervisor.disable();
        }
        for channel in self.state.channels.values_mut() {
            channel.worker_handle = None;
        }
        if let Some(transmit) = &mut self.transmit {
            transmit.cancel();
        }
        self.state.running = false;
        debug!("Control thread finished");
    }
}

fn on_off(active: bool) -> &'static str {
    if active {
        "on"
    } else {
        "off"
    }
}
