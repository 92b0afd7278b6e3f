//! Cancellable one-shot deferred actions.

use crossbeam_channel::{bounded, select, Sender};
use std::thread;
use std::time::Duration;

/// An action that runs once after a delay unless cancelled first.
///
/// Dropping the handle cancels the action.
#[derive(Debug)]
pub struct DeferredAction {
    cancel: Option<Sender<()>>,
}

impl DeferredAction {
    pub fn schedule<F>(name: &str, delay: Duration, action: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel, cancelled) = bounded::<()>(1);

        thread::Builder::new().name(name.to_string()).spawn(move || {
            select! {
                // A send or a dropped sender both mean cancel.
                recv(cancelled) -> _ => {}
                default(delay) => action(),
            }
        })?;

        Ok(Self {
            cancel: Some(cancel),
        })
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.try_send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_none()
    }
}

impl Drop for DeferredAction {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_action_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let (done_tx, done_rx) = bounded(1);

        let _action = DeferredAction::schedule("test deferred", Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        })
        .unwrap();

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_prevents_action() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let mut action = DeferredAction::schedule("test deferred", Duration::from_millis(200), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        action.cancel();
        assert!(action.is_cancelled());

        thread::sleep(Duration::from_millis(400));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_cancels() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        drop(
            DeferredAction::schedule("test deferred", Duration::from_millis(200), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap(),
        );

        thread::sleep(Duration::from_millis(400));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
