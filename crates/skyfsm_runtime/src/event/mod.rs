//! Events: conditions a watcher polls while their state is active.
//!
//! Checkers are built fresh from the mission's resolved [`EventTree`]s on
//! every state entry. Combinators evaluate level, not edge: `and` holds when
//! every child holds at the same evaluation, `not` when its child does not.

use std::sync::Arc;

use async_trait::async_trait;
use skyfsm_core::error::{CoreError, Domain, ErrorKind, Result};
use skyfsm_core::mission::{duration, EventKind, EventTree};
use tokio::time::Instant;

use crate::compute::ResultStore;

pub mod builtin;

pub use builtin::{
    AndEvent, ExternalEvent, NotEvent, ObjectDetectedEvent, ObjectLostEvent, SignalLostEvent,
    TimerEvent,
};

/// Read-only view handed to every check.
#[derive(Clone)]
pub struct EventContext {
    state: String,
    compute: Arc<dyn ResultStore>,
    entered_at: Instant,
}

impl EventContext {
    pub fn new(state: impl Into<String>, compute: Arc<dyn ResultStore>, entered_at: Instant) -> Self {
        Self {
            state: state.into(),
            compute,
            entered_at,
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn compute(&self) -> &dyn ResultStore {
        self.compute.as_ref()
    }

    /// When the owning state was entered.
    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }
}

#[async_trait]
pub trait Event: Send {
    fn id(&self) -> &str;

    /// True when the condition holds now.
    async fn check(&mut self, ctx: &EventContext) -> Result<bool>;
}

/// Build a checker for a resolved event tree.
pub fn instantiate(tree: &EventTree) -> Result<Box<dyn Event>> {
    let event: Box<dyn Event> = match tree {
        EventTree::Leaf { id, kind } => leaf(id, kind)?,
        EventTree::And { id, children } => {
            let children = children.iter().map(instantiate).collect::<Result<Vec<_>>>()?;
            Box::new(AndEvent::new(id.clone(), children))
        }
        EventTree::Not { id, child } => Box::new(NotEvent::new(id.clone(), instantiate(child)?)),
    };
    Ok(event)
}

fn leaf(id: &str, kind: &EventKind) -> Result<Box<dyn Event>> {
    let id = id.to_string();
    let event: Box<dyn Event> = match kind {
        EventKind::Timer { seconds } => {
            let after = duration("timer seconds", *seconds, &id)?;
            Box::new(TimerEvent::new(id, after))
        }
        EventKind::ObjectDetected {
            source,
            class,
            min_confidence,
        } => Box::new(ObjectDetectedEvent::new(
            id,
            source.clone(),
            class.clone(),
            *min_confidence,
        )),
        EventKind::ObjectLost {
            source,
            class,
            min_confidence,
            grace_seconds,
        } => {
            let grace = duration("object_lost grace_seconds", *grace_seconds, &id)?;
            Box::new(ObjectLostEvent::new(
                id,
                source.clone(),
                class.clone(),
                *min_confidence,
                grace,
            ))
        }
        EventKind::SignalLost {
            source,
            stale_seconds,
        } => {
            let stale = duration("signal_lost stale_seconds", *stale_seconds, &id)?;
            Box::new(SignalLostEvent::new(id, source.clone(), stale))
        }
        EventKind::External => Box::new(ExternalEvent::new(id)),
        EventKind::And { .. } | EventKind::Not { .. } => {
            return Err(CoreError::error()
                .domain(Domain::Watcher)
                .kind(ErrorKind::InvalidState)
                .msgf(format_args!("event '{id}' is an unresolved combinator"))
                .build())
        }
    };
    Ok(event)
}
