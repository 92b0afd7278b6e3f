//! Supervisor backed by one dedicated thread per activation.

use super::{ChannelSupervisor, ExecutionContext, StartError, WorkerHandle};
use crate::channel::{ChannelKind, IngestionSink};
use crate::driver::DriverFactory;
use crate::rate::SamplingPlan;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

/// Supervisor running a channel's drivers on its own [`ExecutionContext`].
pub struct ThreadedSupervisor {
    kind: ChannelKind,
    factory: Arc<dyn DriverFactory>,
    sink: Arc<dyn IngestionSink>,
    context: Option<ExecutionContext>,
    retiring: Option<JoinHandle<()>>,
    handle: Option<WorkerHandle>,
    plan: Option<SamplingPlan>,
    live: Arc<AtomicUsize>,
}

impl ThreadedSupervisor {
    pub fn new(
        kind: ChannelKind,
        factory: Arc<dyn DriverFactory>,
        sink: Arc<dyn IngestionSink>,
    ) -> Self {
        Self {
            kind,
            factory,
            sink,
            context: None,
            retiring: None,
            handle: None,
            plan: None,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Execution context threads of this supervisor that have not exited yet.
    ///
    /// A replaced context winds down asynchronously, so this may briefly
    /// exceed one after a rebuild.
    pub fn live_contexts(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl ChannelSupervisor for ThreadedSupervisor {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn enable(&mut self, plan: SamplingPlan) -> Result<(), StartError> {
        let kind = self.kind;

        if let Some(mut stale) = self.context.take() {
            warn!("{kind} sensor already present, rebuilding its workers");
            self.retiring = stale.quit();
            self.handle = None;
            self.plan = None;
        }

        let context = ExecutionContext::spawn(
            kind,
            self.factory.clone(),
            self.sink.clone(),
            self.live.clone(),
            self.retiring.take(),
        )
        .map_err(|source| StartError::Spawn { kind, source })?;

        let sensors = self.factory.sensors_for(kind);
        if !context.post_start(sensors, plan) {
            return Err(StartError::Rejected {
                kind,
                reason: format!("{} is not accepting work", kind.thread_name()),
            });
        }

        info!("{kind} sensor enabled");
        self.context = Some(context);
        self.handle = Some(WorkerHandle::next());
        self.plan = Some(plan);
        Ok(())
    }

    fn disable(&mut self) {
        if let Some(mut context) = self.context.take() {
            self.retiring = context.quit();
            info!("{} sensor disabled", self.kind);
        }
        self.handle = None;
        self.plan = None;
    }

    fn is_active(&self) -> bool {
        self.context.is_some()
    }

    fn handle(&self) -> Option<WorkerHandle> {
        self.handle
    }

    fn plan(&self) -> Option<SamplingPlan> {
        self.plan
    }
}

impl Drop for ThreadedSupervisor {
    fn drop(&mut self) {
        self.disable();
    }
}

impl std::fmt::Debug for ThreadedSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedSupervisor")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("plan", &self.plan)
            .finish()
    }
}
