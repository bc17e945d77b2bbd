//! Per-entity extraction
//!
//! One extractor drives one entity through
//! `NotStarted -> DiscoveringSchema -> Paginating -> Completed`, dropping
//! to `Failed` on the first unrecovered error. Pages are strictly
//! sequential so bookmark updates stay ordered.

use super::adaptive::PageSizer;
use super::types::{EngineConfig, EntityPlan, EntityStats, ExtractionPhase, Message, Outbound};
use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::http::{ApiRequest, ApiResponse, Transport};
use crate::pagination::{records_in, select_strategy, PaginationSettings};
use crate::schema::RecordTransformer;
use crate::state::{BookmarkStore, ReplicationValue};
use crate::types::ErrorPolicy;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

pub(super) struct EntityExtractor {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) base_url: Url,
    pub(super) pagination: PaginationSettings,
    pub(super) store: BookmarkStore,
    pub(super) config: Arc<EngineConfig>,
    pub(super) plan: EntityPlan,
    pub(super) cancel: CancelSignal,
    pub(super) tx: mpsc::Sender<Outbound>,
    pub(super) stats: EntityStats,
    pub(super) phase: ExtractionPhase,
}

impl EntityExtractor {
    /// Extract the entity; the error, if any, is attributed to it
    pub(super) async fn run(mut self) -> (EntityStats, Option<Error>) {
        let started = Instant::now();
        let result = self.extract().await;

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                self.transition(ExtractionPhase::Failed);
                if matches!(e.root(), Error::Cancelled) {
                    info!(entity = %self.plan.name(), "extraction cancelled");
                } else {
                    error!(
                        entity = %self.plan.name(),
                        kind = e.kind(),
                        error = %e,
                        errors = self.stats.errors,
                        "extraction failed"
                    );
                }
                Some(e.for_entity(self.plan.name()))
            }
        };

        self.stats.phase = self.phase;
        self.stats.duration_ms = started.elapsed().as_millis() as u64;
        (self.stats, error)
    }

    /// Report an entity that never got a worker slot
    pub(super) fn abandon(self, error: Error) -> (EntityStats, Option<Error>) {
        (self.stats, Some(error.for_entity(self.plan.name())))
    }

    async fn extract(&mut self) -> Result<()> {
        self.transition(ExtractionPhase::DiscoveringSchema);
        let transformer = RecordTransformer::new(
            self.plan.schema.clone(),
            self.plan.descriptor.primary_key.clone(),
        );
        self.send(Message::Schema {
            entity: self.plan.name().to_string(),
            schema: self.plan.schema.clone(),
            key_properties: self.plan.descriptor.primary_key.clone(),
            replication_key: self.plan.incremental_key().map(ToString::to_string),
        })
        .await?;

        let filters = self.filters().await;
        let strategy = self
            .cancel
            .guard(select_strategy(
                self.transport.as_ref(),
                &self.pagination,
                self.plan.pagination_mode,
                &self.base_url,
                &self.plan.descriptor.endpoint,
                &filters,
            ))
            .await?;
        self.stats.strategy = Some(strategy.name());
        self.transition(ExtractionPhase::Paginating);

        let mut sizer = PageSizer::new(
            self.pagination.page_size,
            self.pagination.min_page_size,
            self.pagination.max_page_size,
        );
        let first =
            strategy.first_request(&self.plan.descriptor.endpoint, &filters, sizer.current());
        let mut request = first.clone();
        let mut page = 0u32;
        let mut since_checkpoint = 0usize;

        loop {
            let response = self.fetch_page(&request).await?;
            page += 1;

            let raw = records_in(&response.body, self.pagination.records_path.as_deref())
                .ok_or_else(|| Error::decode(format!("page {page} carries no record list")))?;
            let received = raw.len();

            let mut records = Vec::with_capacity(received);
            let mut candidate: Option<ReplicationValue> = None;
            for record in raw {
                match transformer.transform(record) {
                    Ok(flat) => {
                        if let Some(value) = self
                            .plan
                            .incremental_key()
                            .and_then(|key| flat.get(key))
                            .and_then(ReplicationValue::from_json)
                        {
                            candidate = Some(match candidate {
                                Some(best) if best >= value => best,
                                _ => value,
                            });
                        }
                        records.push(flat);
                    }
                    Err(e) => {
                        warn!(entity = %self.plan.name(), page, error = %e, "dropping record");
                        self.stats.add_dropped();
                    }
                }
            }

            let count = records.len();
            self.stats.add_page(count);
            debug!(entity = %self.plan.name(), page, records = count, "page extracted");

            if count > 0 {
                self.send(Message::Records {
                    entity: self.plan.name().to_string(),
                    page,
                    records,
                    bookmark: candidate,
                })
                .await?;
            }
            since_checkpoint += count;
            if self.config.checkpoint_interval > 0
                && since_checkpoint >= self.config.checkpoint_interval
            {
                self.checkpoint().await?;
                since_checkpoint = 0;
            }

            let next_size = sizer.observe(received, response.elapsed);
            let Some(mut token) = strategy.next_page_token(&request, &response) else {
                break;
            };
            token.set_page_size(next_size);
            request = strategy.apply_token(&first, &token)?;
        }

        self.checkpoint().await?;
        self.transition(ExtractionPhase::Completed);
        info!(
            entity = %self.plan.name(),
            records = self.stats.records,
            pages = self.stats.pages,
            dropped = self.stats.dropped,
            "extraction complete"
        );
        Ok(())
    }

    /// Caller filters plus the replication lower bound and ordering
    async fn filters(&self) -> BTreeMap<String, String> {
        let mut filters = self.plan.filters.clone();
        let Some(key) = self.plan.incremental_key() else {
            return filters;
        };

        let bound = self
            .store
            .lower_bound(
                self.plan.name(),
                self.config.lookback,
                self.config.start_date.as_deref(),
            )
            .await;
        if let Some(bound) = bound {
            debug!(entity = %self.plan.name(), %bound, "incremental lower bound");
            filters.insert(self.config.filter_param(key), bound);
        }
        if let Some(param) = &self.pagination.ordering_param {
            filters
                .entry(param.clone())
                .or_insert_with(|| key.to_string());
        }
        filters
    }

    /// One page, with extra attempts under `retry_and_continue`
    async fn fetch_page(&mut self, request: &ApiRequest) -> Result<ApiResponse> {
        let extra_attempts = match self.plan.error_policy {
            ErrorPolicy::RetryAndContinue => self.config.page_retries,
            ErrorPolicy::FailFast | ErrorPolicy::SkipAndContinue => 0,
        };

        let mut attempt = 0;
        loop {
            match self.cancel.guard(self.transport.execute(request)).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    self.stats.add_error();
                    let recoverable =
                        e.is_retryable() || matches!(e.root(), Error::CircuitOpen { .. });
                    if attempt >= extra_attempts || !recoverable {
                        return Err(e);
                    }
                    attempt += 1;

                    let delay = match e.root() {
                        Error::CircuitOpen { retry_in_ms } => {
                            Duration::from_millis(*retry_in_ms).max(self.config.page_retry_delay)
                        }
                        _ => self.config.page_retry_delay,
                    };
                    warn!(
                        entity = %self.plan.name(),
                        attempt,
                        errors = self.stats.errors,
                        error = %e,
                        "page failed, retrying"
                    );
                    self.cancel
                        .guard(async {
                            tokio::time::sleep(delay).await;
                            Ok(())
                        })
                        .await?;
                }
            }
        }
    }

    /// Ask for a flush once the pages sent so far have been delivered
    async fn checkpoint(&self) -> Result<()> {
        self.enqueue(Outbound::Checkpoint {
            entity: self.plan.name().to_string(),
        })
        .await
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.enqueue(Outbound::Message(message)).await
    }

    /// Queue for the consumer, waiting while its buffer is full
    async fn enqueue(&self, outbound: Outbound) -> Result<()> {
        self.cancel
            .guard(async {
                self.tx
                    .send(outbound)
                    .await
                    .map_err(|_| Error::Cancelled)
            })
            .await
    }

    fn transition(&mut self, next: ExtractionPhase) {
        if self.phase.can_transition_to(next) {
            debug!(entity = %self.plan.name(), from = %self.phase, to = %next, "phase change");
            self.phase = next;
        }
    }
}
