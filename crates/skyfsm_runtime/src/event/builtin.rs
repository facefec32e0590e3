use std::time::Duration;

use async_trait::async_trait;
use skyfsm_core::error::Result;
use tokio::time::Instant;

use super::{Event, EventContext};

/// Holds once `after` has elapsed since the state was entered.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerEvent {
    id: String,
    after: Duration,
}

impl TimerEvent {
    pub fn new(id: String, after: Duration) -> Self {
        Self { id, after }
    }
}

#[async_trait]
impl Event for TimerEvent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&mut self, ctx: &EventContext) -> Result<bool> {
        Ok(ctx.entered_at().elapsed() >= self.after)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetectedEvent {
    id: String,
    source: String,
    class: String,
    min_confidence: f64,
}

impl ObjectDetectedEvent {
    pub fn new(id: String, source: String, class: String, min_confidence: f64) -> Self {
        Self {
            id,
            source,
            class,
            min_confidence,
        }
    }
}

#[async_trait]
impl Event for ObjectDetectedEvent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&mut self, ctx: &EventContext) -> Result<bool> {
        Ok(sighted(ctx, &self.source, &self.class, self.min_confidence))
    }
}

/// Holds once nothing qualifying has been seen for `grace`, counting from
/// the last sighting or from state entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectLostEvent {
    id: String,
    source: String,
    class: String,
    min_confidence: f64,
    grace: Duration,
    last_seen: Option<Instant>,
}

impl ObjectLostEvent {
    pub fn new(
        id: String,
        source: String,
        class: String,
        min_confidence: f64,
        grace: Duration,
    ) -> Self {
        Self {
            id,
            source,
            class,
            min_confidence,
            grace,
            last_seen: None,
        }
    }
}

#[async_trait]
impl Event for ObjectLostEvent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&mut self, ctx: &EventContext) -> Result<bool> {
        if sighted(ctx, &self.source, &self.class, self.min_confidence) {
            self.last_seen = Some(Instant::now());
            return Ok(false);
        }
        let since = self.last_seen.unwrap_or(ctx.entered_at());
        Ok(since.elapsed() >= self.grace)
    }
}

/// Holds when `source` has published nothing for `stale`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalLostEvent {
    id: String,
    source: String,
    stale: Duration,
}

impl SignalLostEvent {
    pub fn new(id: String, source: String, stale: Duration) -> Self {
        Self { id, source, stale }
    }
}

#[async_trait]
impl Event for SignalLostEvent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&mut self, ctx: &EventContext) -> Result<bool> {
        let age = match ctx.compute().get_result(&self.source) {
            Some(result) => result.age(),
            None => ctx.entered_at().elapsed(),
        };
        Ok(age >= self.stale)
    }
}

/// Never holds; raised only through `notify`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalEvent {
    id: String,
}

impl ExternalEvent {
    pub fn new(id: String) -> Self {
        Self { id }
    }
}

#[async_trait]
impl Event for ExternalEvent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&mut self, _ctx: &EventContext) -> Result<bool> {
        Ok(false)
    }
}

pub struct AndEvent {
    id: String,
    children: Vec<Box<dyn Event>>,
}

impl AndEvent {
    pub fn new(id: String, children: Vec<Box<dyn Event>>) -> Self {
        Self { id, children }
    }
}

#[async_trait]
impl Event for AndEvent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&mut self, ctx: &EventContext) -> Result<bool> {
        // Every child is checked so stateful leaves keep their bookkeeping.
        let mut all = true;
        for child in &mut self.children {
            all &= child.check(ctx).await?;
        }
        Ok(all)
    }
}

pub struct NotEvent {
    id: String,
    child: Box<dyn Event>,
}

impl NotEvent {
    pub fn new(id: String, child: Box<dyn Event>) -> Self {
        Self { id, child }
    }
}

#[async_trait]
impl Event for NotEvent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&mut self, ctx: &EventContext) -> Result<bool> {
        Ok(!self.child.check(ctx).await?)
    }
}

fn sighted(ctx: &EventContext, source: &str, class: &str, min_confidence: f64) -> bool {
    ctx.compute()
        .get_result(source)
        .is_some_and(|result| result.best(class, min_confidence).is_some())
}
