//! Event Router
//!
//! Dispatch table from [`EventKind`] to the one handler that consumes it.
//! Stages publish; the router delivers. Unrouted kinds are logged and
//! dropped.
//!
//! **Modes:**
//! - [`EventRouter::drain`]: deliver queued events one at a time until the
//!   channel is empty (single-shot CLI runs, tests)
//! - [`EventRouter::run`]: background loop, one tokio task per delivery,
//!   stopped through a [`CancellationToken`]

use crate::error::{StageError, StageResult};
use crate::stages::{AnalysisStage, NotificationStage};
use async_trait::async_trait;
use sdp_common::{Error, EventKind, StageEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Consumer of one event kind
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: StageEvent) -> StageResult<()>;
}

#[async_trait]
impl StageHandler for AnalysisStage {
    fn name(&self) -> &'static str {
        "analysis"
    }

    async fn handle(&self, event: StageEvent) -> StageResult<()> {
        match event {
            StageEvent::ProcessingComplete { correlation_id, detail } => {
                let source_file = Some(detail.source_file.as_str()).filter(|s| !s.is_empty());
                self.analyze(correlation_id, &detail.processed_file, source_file).await?;
                Ok(())
            }
            other => Err(unexpected(self.name(), &other)),
        }
    }
}

#[async_trait]
impl StageHandler for NotificationStage {
    fn name(&self) -> &'static str {
        "notification"
    }

    async fn handle(&self, event: StageEvent) -> StageResult<()> {
        match event {
            StageEvent::AnalysisComplete { correlation_id, detail } => {
                self.notify(&detail.analysis_id, Some(correlation_id)).await?;
                Ok(())
            }
            other => Err(unexpected(self.name(), &other)),
        }
    }
}

fn unexpected(handler: &str, event: &StageEvent) -> StageError {
    Error::InvalidInput(format!("{} cannot handle {} events", handler, event.kind())).into()
}

/// What happened to one delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Handled,
    Failed,
    Unrouted,
}

/// Tally of a [`EventRouter::drain`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub handled: usize,
    pub failed: usize,
    pub unrouted: usize,
}

#[derive(Default)]
pub struct EventRouter {
    routes: HashMap<EventKind, Arc<dyn StageHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`; a kind has at most one handler
    pub fn subscribe(&mut self, kind: EventKind, handler: Arc<dyn StageHandler>) -> sdp_common::Result<()> {
        if let Some(existing) = self.routes.get(&kind) {
            return Err(Error::Config(format!(
                "{} events already routed to {}",
                kind,
                existing.name()
            )));
        }
        debug!(event = %kind, handler = handler.name(), "Route registered");
        self.routes.insert(kind, handler);
        Ok(())
    }

    pub fn handler_for(&self, kind: EventKind) -> Option<&Arc<dyn StageHandler>> {
        self.routes.get(&kind)
    }

    /// Deliver one event to its handler
    ///
    /// Stage failures are logged here with the correlation id; they do not
    /// stop the router.
    pub async fn dispatch(&self, event: StageEvent) -> Delivery {
        let kind = event.kind();
        let correlation_id = event.correlation_id();

        let Some(handler) = self.routes.get(&kind).cloned() else {
            warn!(correlation_id = %correlation_id, event = %kind, "No route for event, dropping");
            return Delivery::Unrouted;
        };

        debug!(correlation_id = %correlation_id, event = %kind, handler = handler.name(), "Dispatching event");

        match handler.handle(event).await {
            Ok(()) => Delivery::Handled,
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    event = %kind,
                    handler = handler.name(),
                    fatal = e.is_fatal(),
                    error = %e,
                    "Stage failed"
                );
                Delivery::Failed
            }
        }
    }

    /// Deliver queued events sequentially until the channel is empty
    ///
    /// Events published by handlers during the pass are delivered too.
    pub async fn drain(&self, rx: &mut broadcast::Receiver<StageEvent>) -> DrainReport {
        let mut report = DrainReport::default();

        loop {
            match rx.try_recv() {
                Ok(event) => match self.dispatch(event).await {
                    Delivery::Handled => report.handled += 1,
                    Delivery::Failed => report.failed += 1,
                    Delivery::Unrouted => report.unrouted += 1,
                },
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("Router lagged {} events (increase events.bus_capacity)", skipped);
                }
                Err(broadcast::error::TryRecvError::Empty) | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }

        report
    }

    /// Route events until `shutdown` is cancelled or every sender is dropped
    ///
    /// Each delivery runs as its own task. Events already queued when
    /// shutdown is requested are still delivered, and the returned handle
    /// resolves only after every in-flight delivery has finished. Events
    /// those deliveries publish afterwards are left on the bus.
    pub fn run(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<StageEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!("Event router started");
            let mut deliveries = JoinSet::new();

            loop {
                tokio::select! {
                    biased;

                    received = rx.recv() => match received {
                        Ok(event) => {
                            let router = Arc::clone(&self);
                            deliveries.spawn(async move {
                                router.dispatch(event).await;
                            });
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Router lagged {} events (increase events.bus_capacity)", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    Some(finished) = deliveries.join_next(), if !deliveries.is_empty() => {
                        log_join(finished);
                    }
                    _ = shutdown.cancelled() => {
                        debug!(in_flight = deliveries.len(), "Event router shutting down");
                        break;
                    }
                }
            }

            while let Some(finished) = deliveries.join_next().await {
                log_join(finished);
            }
            debug!("Event router stopped");
        })
    }
}

fn log_join(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "Delivery task failed to complete");
    }
}
