//! Trigger channel.
//!
//! The single channel through which the active action (completion, failure,
//! explicit announcements), every watcher, and external `notify` calls report
//! a candidate winner to the scheduler.
//!
//! Every trigger is tagged with the epoch of the state it was raised in.
//! The scheduler bumps the epoch on each state entry, so a late trigger from
//! an already-exited state can never win the race of a later state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use skyfsm_core::error::CoreError;
use skyfsm_core::mission::{DONE_EVENT, ERROR_EVENT};
use tokio::sync::mpsc;
use tracing::debug;

/// Who raised a trigger.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TriggerSource {
    Action,
    Watcher,
    External,
}

/// A candidate winning event for the state identified by `epoch`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub epoch: u64,
    pub event: String,
    pub source: TriggerSource,
    /// Set when the action failed (`event == "error"`).
    pub error: Option<CoreError>,
}

/// Create a connected hub/receiver pair.
pub fn trigger_channel() -> (TriggerHub, TriggerReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let epoch = Arc::new(AtomicU64::new(0));
    (
        TriggerHub {
            tx,
            epoch: Arc::clone(&epoch),
        },
        TriggerReceiver { rx, epoch },
    )
}

/// Cloneable producer side. Hands out per-state senders and accepts
/// external notifications for whatever state is current.
#[derive(Debug, Clone)]
pub struct TriggerHub {
    tx: mpsc::UnboundedSender<Trigger>,
    epoch: Arc<AtomicU64>,
}

impl TriggerHub {
    /// Sender bound to `epoch`.
    pub fn sender(&self, epoch: u64, source: TriggerSource) -> TriggerSender {
        TriggerSender {
            tx: self.tx.clone(),
            epoch,
            source,
        }
    }

    /// Raise `event` in the current state's race.
    pub fn notify(&self, event: &str) -> bool {
        let epoch = self.epoch.load(Ordering::Acquire);
        self.sender(epoch, TriggerSource::External).announce(event)
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// Producer bound to one state visit.
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::UnboundedSender<Trigger>,
    epoch: u64,
    source: TriggerSource,
}

impl TriggerSender {
    /// Announce a named event. Returns false if the scheduler is gone.
    pub fn announce(&self, event: &str) -> bool {
        self.send(event, None)
    }

    /// Announce the implicit `done` event.
    pub fn done(&self) -> bool {
        self.send(DONE_EVENT, None)
    }

    /// Announce the implicit `error` event, carrying the failure.
    pub fn fail(&self, error: CoreError) -> bool {
        self.send(ERROR_EVENT, Some(error))
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn send(&self, event: &str, error: Option<CoreError>) -> bool {
        self.tx
            .send(Trigger {
                epoch: self.epoch,
                event: event.to_string(),
                source: self.source,
                error,
            })
            .is_ok()
    }
}

/// Consumer side, owned by the scheduler.
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::UnboundedReceiver<Trigger>,
    epoch: Arc<AtomicU64>,
}

impl TriggerReceiver {
    /// Enter a new state: bump the epoch and discard anything still queued.
    pub fn begin_state(&mut self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.drain();
        epoch
    }

    /// Next trigger raised for the current epoch. Stale triggers are dropped.
    pub async fn recv(&mut self) -> Option<Trigger> {
        loop {
            let trigger = self.rx.recv().await?;
            if trigger.epoch == self.epoch.load(Ordering::Acquire) {
                return Some(trigger);
            }
            debug!(
                event = %trigger.event,
                epoch = trigger.epoch,
                "discarding trigger from an exited state"
            );
        }
    }

    /// Drop every queued trigger; returns how many were discarded.
    pub fn drain(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(trigger) = self.rx.try_recv() {
            debug!(event = %trigger.event, epoch = trigger.epoch, "discarding queued trigger");
            discarded += 1;
        }
        discarded
    }
}
