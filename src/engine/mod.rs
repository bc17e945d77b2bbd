//! Extraction engine module
//!
//! Runs many entities at once and streams their records to one consumer.
//!
//! # Overview
//!
//! The engine module provides:
//! - `ExtractionEngine` - Bounded-concurrency orchestration over entity plans
//! - `EntityPlan` / `EngineConfig` - What to extract and how
//! - `Message` - Schema, record, bookmark and failure output
//! - `PageSizer` - Throughput-driven page size adjustment
//!
//! # Guarantees
//!
//! - At most `concurrency` entities are extracted at once
//! - Within one entity, pages are fetched and emitted in order
//! - At most `buffer_pages` messages wait for the consumer; extraction
//!   pauses until it catches up
//! - Bookmarks advance only when the consumer receives the page carrying
//!   them, and are flushed when the run ends, including on cancellation
//! - A consumer that drops the stream early ends the run with
//!   `Error::Cancelled`

mod adaptive;
mod extractor;
mod types;

pub use adaptive::{PageSizer, WINDOW};
pub use types::{
    EngineConfig, EntityPlan, EntityStats, ExtractionPhase, Message, RunSummary,
};

use types::Outbound;

use crate::cancel::{cancellation, CancelSignal};
use crate::error::{Error, Result};
use crate::http::Transport;
use crate::pagination::PaginationSettings;
use crate::state::BookmarkStore;
use crate::types::ErrorPolicy;
use extractor::EntityExtractor;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use url::Url;

/// Messages of a run, in production order
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Orchestrates the extraction of a set of entities
pub struct ExtractionEngine {
    transport: Arc<dyn Transport>,
    base_url: Url,
    pagination: PaginationSettings,
    store: BookmarkStore,
    config: EngineConfig,
    plans: Vec<EntityPlan>,
}

impl std::fmt::Debug for ExtractionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionEngine")
            .field("base_url", &self.base_url.as_str())
            .field("config", &self.config)
            .field(
                "plans",
                &self.plans.iter().map(EntityPlan::name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl ExtractionEngine {
    pub fn new(transport: Arc<dyn Transport>, base_url: Url, store: BookmarkStore) -> Self {
        Self {
            transport,
            base_url,
            pagination: PaginationSettings::default(),
            store,
            config: EngineConfig::default(),
            plans: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_pagination(mut self, pagination: PaginationSettings) -> Self {
        self.pagination = pagination;
        self
    }

    #[must_use]
    pub fn with_plans(mut self, plans: impl IntoIterator<Item = EntityPlan>) -> Self {
        self.plans.extend(plans);
        self
    }

    #[must_use]
    pub fn add_plan(mut self, plan: EntityPlan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    pub fn plans(&self) -> &[EntityPlan] {
        &self.plans
    }

    /// Start the run
    ///
    /// Messages arrive on the returned stream while the run progresses; the
    /// handle resolves once every entity has finished and bookmarks are
    /// flushed. Dropping the stream stops the run.
    pub fn run(self, cancel: CancelSignal) -> (MessageStream, JoinHandle<Result<RunSummary>>) {
        let (tx, rx) = mpsc::channel(self.config.buffer_pages.max(1));
        let (drained_tx, drained_rx) = oneshot::channel();
        let delivery = Delivery {
            rx,
            store: self.store.clone(),
            drained: Some(drained_tx),
        };
        let handle = tokio::spawn(self.orchestrate(cancel, tx, drained_rx));
        let stream = futures::stream::unfold(delivery, |mut delivery| async move {
            let message = delivery.next().await?;
            Some((message, delivery))
        });
        (Box::pin(stream), handle)
    }

    /// Run to completion, collecting every message
    pub async fn run_to_end(self, cancel: CancelSignal) -> (Vec<Message>, Result<RunSummary>) {
        use futures::StreamExt;

        let (stream, handle) = self.run(cancel);
        let messages = stream.collect::<Vec<_>>().await;
        let summary = match handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("extraction task failed: {e}"))),
        };
        (messages, summary)
    }

    async fn orchestrate(
        self,
        external: CancelSignal,
        tx: mpsc::Sender<Outbound>,
        drained: oneshot::Receiver<()>,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let (handle, signal) = cancellation();

        // External cancellation stops everything; fail-fast also uses `handle`
        let forwarder = {
            let handle = handle.clone();
            let external = external.clone();
            tokio::spawn(async move {
                external.cancelled().await;
                handle.cancel();
            })
        };

        let config = Arc::new(self.config);
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let count = self.plans.len();
        info!(
            entities = count,
            concurrency = config.concurrency,
            "starting extraction"
        );

        let mut workers = JoinSet::new();
        for (index, plan) in self.plans.into_iter().enumerate() {
            let policy = plan.error_policy;
            let extractor = EntityExtractor {
                transport: self.transport.clone(),
                base_url: self.base_url.clone(),
                pagination: self.pagination.clone(),
                store: self.store.clone(),
                config: config.clone(),
                stats: EntityStats::new(plan.name()),
                phase: ExtractionPhase::NotStarted,
                plan,
                cancel: signal.clone(),
                tx: tx.clone(),
            };
            let semaphore = semaphore.clone();
            let signal = signal.clone();

            workers.spawn(async move {
                let permit = signal
                    .guard(async {
                        semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| Error::Cancelled)
                    })
                    .await;
                let outcome = match permit {
                    Ok(_permit) => extractor.run().await,
                    Err(e) => extractor.abandon(e),
                };
                (index, policy, outcome)
            });
        }

        let mut finished: Vec<Option<EntityStats>> = vec![None; count];
        let mut fatal: Option<Error> = None;

        while let Some(joined) = workers.join_next().await {
            let (index, policy, (stats, failure)) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "extraction worker panicked");
                    fatal.get_or_insert(Error::Other(format!("extraction worker failed: {e}")));
                    handle.cancel();
                    continue;
                }
            };

            if let Some(e) = failure {
                match policy {
                    _ if matches!(e.root(), Error::Cancelled) => {}
                    ErrorPolicy::FailFast => {
                        warn!(entity = %stats.entity, "stopping run after entity failure");
                        fatal.get_or_insert(e);
                        handle.cancel();
                    }
                    ErrorPolicy::SkipAndContinue | ErrorPolicy::RetryAndContinue => {
                        // Consumer may already be gone; the summary still records it
                        let _ = tx
                            .send(Outbound::Message(Message::EntityFailed {
                                entity: stats.entity.clone(),
                                kind: e.kind(),
                                message: e.root().to_string(),
                            }))
                            .await;
                    }
                }
            }
            finished[index] = Some(stats);
        }

        forwarder.abort();
        drop(tx);

        // Queued pages carry bookmarks the store has not taken yet; wait for
        // the consumer to drain them unless the run was cancelled from outside
        let delivered = tokio::select! {
            done = drained => done.is_ok(),
            () = external.cancelled() => false,
        };
        if !delivered && !external.is_cancelled() {
            warn!("consumer stopped before the run finished");
        }

        let flushed = self.store.flush().await;

        let summary = RunSummary {
            entities: finished.into_iter().flatten().collect(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            records = summary.total_records(),
            pages = summary.total_pages(),
            failed = summary.failed().count(),
            duration_ms = summary.duration_ms,
            "extraction finished"
        );

        if let Some(e) = fatal {
            if let Err(flush_error) = flushed {
                error!(error = %flush_error, "bookmark flush failed");
            }
            return Err(e);
        }
        flushed?;
        if external.is_cancelled() || !delivered {
            return Err(Error::Cancelled);
        }
        Ok(summary)
    }
}

/// Consumer side of the run's channel
///
/// Applies each page's bookmark as the page is handed out and performs
/// checkpoint flushes in delivery order.
struct Delivery {
    rx: mpsc::Receiver<Outbound>,
    store: BookmarkStore,
    /// Fired once every queued message has been delivered
    drained: Option<oneshot::Sender<()>>,
}

impl Delivery {
    async fn next(&mut self) -> Option<Message> {
        let Some(outbound) = self.rx.recv().await else {
            if let Some(drained) = self.drained.take() {
                let _ = drained.send(());
            }
            return None;
        };

        match outbound {
            Outbound::Message(message) => {
                if let Message::Records {
                    entity,
                    bookmark: Some(value),
                    ..
                } = &message
                {
                    self.store.advance(entity, value.clone()).await;
                }
                Some(message)
            }
            Outbound::Checkpoint { entity } => {
                if let Err(e) = self.store.flush().await {
                    error!(entity = %entity, error = %e, "checkpoint flush failed");
                }
                Some(Message::Bookmark {
                    entity,
                    state: self.store.snapshot().await,
                })
            }
        }
    }
}
