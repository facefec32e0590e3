//! Watchers: one running observer per `(state, event)` row of the current state.
//!
//! A watcher polls its event until it holds, announces the event id on the
//! trigger channel and removes itself from the active set (`Triggered`), or
//! observes cancellation and exits (`Stopped`). The active set is shared with
//! the scheduler, which clears it at every state exit.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::log_core_error;
use crate::event::{Event, EventContext};
use crate::trigger::TriggerSender;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WatcherState {
    Created,
    Running,
    Triggered,
    Stopped,
}

/// Watchers of the current state, keyed by `(epoch, event id)`.
///
/// The epoch keeps a late watcher from an exited state from touching an
/// entry of the same event id in a later state.
#[derive(Debug, Clone, Default)]
pub struct ActiveWatchers {
    inner: Arc<Mutex<BTreeMap<(u64, String), WatcherState>>>,
}

impl ActiveWatchers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(u64, String), WatcherState>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    pub fn insert(&self, epoch: u64, event: &str) {
        self.lock()
            .insert((epoch, event.to_string()), WatcherState::Created);
    }

    /// Update an existing entry. Returns false if it is no longer present.
    pub fn set(&self, epoch: u64, event: &str, state: WatcherState) -> bool {
        match self.lock().get_mut(&(epoch, event.to_string())) {
            Some(slot) => {
                *slot = state;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, epoch: u64, event: &str) -> Option<WatcherState> {
        self.lock().remove(&(epoch, event.to_string()))
    }

    pub fn state_of(&self, epoch: u64, event: &str) -> Option<WatcherState> {
        self.lock().get(&(epoch, event.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Event ids and states currently registered.
    pub fn snapshot(&self) -> Vec<(String, WatcherState)> {
        self.lock()
            .iter()
            .map(|((_, event), state)| (event.clone(), *state))
            .collect()
    }

    /// Remove everything; returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut guard = self.lock();
        let n = guard.len();
        guard.clear();
        n
    }
}

/// Scheduler-side handle to a spawned watcher.
#[derive(Debug)]
pub struct WatcherHandle {
    event_id: String,
    cancel: CancellationToken,
    join: JoinHandle<WatcherState>,
}

impl WatcherHandle {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_join(self) -> JoinHandle<WatcherState> {
        self.join
    }
}

/// Register `event` in the active set and start polling it every `poll`.
pub fn spawn_watcher(
    event: Box<dyn Event>,
    ctx: EventContext,
    poll: Duration,
    cancel: CancellationToken,
    announcer: TriggerSender,
    active: ActiveWatchers,
) -> WatcherHandle {
    let event_id = event.id().to_string();
    active.insert(announcer.epoch(), &event_id);

    let join = tokio::spawn(watch(event, ctx, poll, cancel.clone(), announcer, active));
    WatcherHandle {
        event_id,
        cancel,
        join,
    }
}

async fn watch(
    mut event: Box<dyn Event>,
    ctx: EventContext,
    poll: Duration,
    cancel: CancellationToken,
    announcer: TriggerSender,
    active: ActiveWatchers,
) -> WatcherState {
    let epoch = announcer.epoch();
    let id = event.id().to_string();
    active.set(epoch, &id, WatcherState::Running);

    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let checked = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            checked = async {
                ticker.tick().await;
                event.check(&ctx).await
            } => Some(checked),
        };

        match checked {
            None => {
                debug!(state = ctx.state(), event = %id, "watcher stopped");
                active.set(epoch, &id, WatcherState::Stopped);
                return WatcherState::Stopped;
            }
            Some(Ok(true)) if !cancel.is_cancelled() => {
                debug!(state = ctx.state(), event = %id, "watcher triggered");
                announcer.announce(&id);
                active.remove(epoch, &id);
                return WatcherState::Triggered;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                log_core_error(&err);
                warn!(state = ctx.state(), event = %id, "event check failed, retrying");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skyfsm_core::error::{CoreError, Domain, ErrorKind, Result};
    use tokio::time::Instant;

    use crate::compute::MemoryResultStore;
    use crate::event::TimerEvent;
    use crate::trigger::{trigger_channel, TriggerSource};

    /// Fails its first check, then holds.
    struct Flaky {
        calls: u32,
    }

    #[async_trait]
    impl Event for Flaky {
        fn id(&self) -> &str {
            "flaky"
        }

        async fn check(&mut self, _ctx: &EventContext) -> Result<bool> {
            self.calls += 1;
            if self.calls == 1 {
                return Err(CoreError::warn()
                    .domain(Domain::Compute)
                    .kind(ErrorKind::Io)
                    .msg("camera hiccup")
                    .build());
            }
            Ok(true)
        }
    }

    fn ctx() -> EventContext {
        EventContext::new("S", Arc::new(MemoryResultStore::new()), Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn triggered_watcher_announces_and_self_removes() {
        let (hub, mut rx) = trigger_channel();
        let epoch = rx.begin_state();
        let active = ActiveWatchers::new();

        let handle = spawn_watcher(
            Box::new(TimerEvent::new("t".into(), Duration::from_secs(1))),
            ctx(),
            Duration::from_millis(50),
            CancellationToken::new(),
            hub.sender(epoch, TriggerSource::Watcher),
            active.clone(),
        );
        assert_eq!(active.len(), 1);

        let trigger = rx.recv().await.unwrap();
        assert_eq!(trigger.event, "t");
        assert_eq!(handle.into_join().await.unwrap(), WatcherState::Triggered);
        assert!(active.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_watcher_stops_and_stays_registered() {
        let (hub, mut rx) = trigger_channel();
        let epoch = rx.begin_state();
        let active = ActiveWatchers::new();

        let handle = spawn_watcher(
            Box::new(TimerEvent::new("t".into(), Duration::from_secs(3600))),
            ctx(),
            Duration::from_millis(50),
            CancellationToken::new(),
            hub.sender(epoch, TriggerSource::Watcher),
            active.clone(),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(active.state_of(epoch, "t"), Some(WatcherState::Running));

        handle.cancel();
        assert_eq!(handle.into_join().await.unwrap(), WatcherState::Stopped);
        assert_eq!(active.snapshot(), vec![("t".to_string(), WatcherState::Stopped)]);
        assert_eq!(active.clear(), 1);
        assert_eq!(rx.drain(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn check_errors_are_retried() {
        let (hub, mut rx) = trigger_channel();
        let epoch = rx.begin_state();

        let handle = spawn_watcher(
            Box::new(Flaky { calls: 0 }),
            ctx(),
            Duration::from_millis(10),
            CancellationToken::new(),
            hub.sender(epoch, TriggerSource::Watcher),
            ActiveWatchers::new(),
        );
        assert_eq!(rx.recv().await.unwrap().event, "flaky");
        assert_eq!(handle.into_join().await.unwrap(), WatcherState::Triggered);
    }

    #[test]
    fn stale_epoch_cannot_touch_new_entry() {
        let active = ActiveWatchers::new();
        active.insert(2, "t");
        assert!(!active.set(1, "t", WatcherState::Stopped));
        assert_eq!(active.remove(1, "t"), None);
        assert_eq!(active.state_of(2, "t"), Some(WatcherState::Created));
    }
}
