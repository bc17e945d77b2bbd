//! CLI runner - executes commands

use crate::cancel::cancellation;
use crate::cli::commands::{parse_entity_list, Cli, Commands, OutputFormat};
use crate::config::TapConfig;
use crate::discovery::{Catalog, EntityDiscoverer};
use crate::engine::{ExtractionEngine, Message};
use crate::http::HttpClient;
use crate::error::{Error, Result};
use crate::state::BookmarkStore;
use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Check => self.check().await,
            Commands::Discover { entities } => self.discover(entities.as_deref()).await,
            Commands::Read { entities } => self.read(entities.as_deref()).await,
        }
    }

    /// Load and validate configuration
    fn load_config(&self) -> Result<TapConfig> {
        let source = self
            .cli
            .config
            .as_deref()
            .ok_or_else(|| Error::config("Config not specified (use --config)"))?;
        TapConfig::load(source)
    }

    /// Load bookmarks; inline state wins over the state file's contents
    fn load_state(&self) -> Result<BookmarkStore> {
        match (&self.cli.state_json, &self.cli.state) {
            (Some(json), Some(path)) => Ok(BookmarkStore::from_json(json)?.persist_to(path)),
            (Some(json), None) => BookmarkStore::from_json(json),
            (None, Some(path)) => BookmarkStore::from_file(path),
            (None, None) => Ok(BookmarkStore::in_memory()),
        }
    }

    /// Discoverer over `transport`, which extraction may go on to share
    fn discoverer(config: &TapConfig, transport: Arc<HttpClient>) -> EntityDiscoverer {
        EntityDiscoverer::new(
            transport,
            config.discovery.clone(),
            config.pagination.clone(),
        )
        .with_hints(config.hints())
    }

    /// Entities named on the command line, else the configured selection
    fn selection(config: &TapConfig, entities: Option<&str>) -> Vec<String> {
        let requested = parse_entity_list(entities);
        if requested.is_empty() {
            config.entities.clone()
        } else {
            requested
        }
    }

    async fn catalog(
        config: &TapConfig,
        transport: Arc<HttpClient>,
        selected: &[String],
    ) -> Result<Catalog> {
        let catalog = Self::discoverer(config, transport)
            .discover(selected)
            .await?;
        config.validate_against_catalog(&catalog)?;
        Ok(catalog)
    }

    /// Check connection
    async fn check(&self) -> Result<()> {
        let config = self.load_config()?;
        let discoverer = Self::discoverer(&config, Arc::new(config.build_transport()?));

        match discoverer.check().await {
            Ok(entities) => {
                self.output_message(&json!({
                    "type": "CONNECTION_STATUS",
                    "connectionStatus": {
                        "status": "SUCCEEDED",
                        "message": format!("Connection successful, {entities} entities listed")
                    }
                }))?;
                Ok(())
            }
            Err(e) => {
                self.output_message(&json!({
                    "type": "CONNECTION_STATUS",
                    "connectionStatus": {
                        "status": "FAILED",
                        "message": format!("Connection failed: {e}")
                    }
                }))?;
                Err(e)
            }
        }
    }

    /// Discover entities
    async fn discover(&self, entities: Option<&str>) -> Result<()> {
        let mut config = self.load_config()?;
        config.entities = Self::selection(&config, entities);

        let transport = Arc::new(config.build_transport()?);
        let catalog = Self::catalog(&config, transport, &config.entities).await?;
        info!(entities = catalog.len(), "discovery complete");

        self.output_message(&json!({
            "type": "CATALOG",
            "catalog": catalog.to_json()
        }))
    }

    /// Extract records
    async fn read(&self, entities: Option<&str>) -> Result<()> {
        let mut config = self.load_config()?;
        config.entities = Self::selection(&config, entities);
        let store = self.load_state()?;

        // One client for the whole run: breaker, limiter and token are shared
        let transport = Arc::new(config.build_transport()?);
        let catalog = Self::catalog(&config, transport.clone(), &config.entities).await?;
        let plans = config.plans(&catalog)?;
        if plans.is_empty() {
            warn!("no entities selected for extraction");
            return Ok(());
        }

        let (handle, signal) = cancellation();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping extraction");
                handle.cancel();
            }
        });

        let engine = ExtractionEngine::new(transport, config.base_url()?, store)
            .with_config(config.engine_config()?)
            .with_pagination(config.pagination.clone())
            .with_plans(plans);

        let (mut stream, task) = engine.run(signal);
        let mut written = Ok(());
        while let Some(message) = stream.next().await {
            if let Err(e) = self.emit(&message) {
                // Dropping the stream below stops the run
                written = Err(e);
                break;
            }
        }
        drop(stream);

        let summary = task
            .await
            .map_err(|e| Error::Other(format!("extraction task failed: {e}")));
        interrupt.abort();
        written?;
        let summary = summary??;

        for stats in &summary.entities {
            info!(
                entity = %stats.entity,
                phase = %stats.phase,
                strategy = stats.strategy.unwrap_or("-"),
                records = stats.records,
                pages = stats.pages,
                dropped = stats.dropped,
                errors = stats.errors,
                duration_ms = stats.duration_ms,
                "entity summary"
            );
        }
        Ok(())
    }

    /// Write one engine message as protocol lines
    fn emit(&self, message: &Message) -> Result<()> {
        if let Message::EntityFailed {
            entity,
            kind,
            message,
        } = message
        {
            warn!(entity = %entity, kind = *kind, error = %message, "entity skipped");
        }
        for line in render_message(message)? {
            self.output_message(&line)?;
        }
        Ok(())
    }

    /// Output a message
    fn output_message(&self, msg: &Value) -> Result<()> {
        let line = match self.cli.format {
            OutputFormat::Json => serde_json::to_string(msg)?,
            OutputFormat::Pretty => serde_json::to_string_pretty(msg)?,
        };
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        Ok(())
    }
}

/// Protocol lines for one engine message
///
/// Entity failures produce no data lines; they are reported on stderr.
pub fn render_message(message: &Message) -> Result<Vec<Value>> {
    let lines = match message {
        Message::Schema {
            entity,
            schema,
            key_properties,
            replication_key,
        } => vec![json!({
            "type": "SCHEMA",
            "stream": entity,
            "schema": schema.to_json_schema(),
            "key_properties": key_properties,
            "bookmark_properties": replication_key.iter().collect::<Vec<_>>(),
        })],
        Message::Records {
            entity, records, ..
        } => {
            let extracted = Utc::now().to_rfc3339();
            records
                .iter()
                .map(|record| {
                    json!({
                        "type": "RECORD",
                        "stream": entity,
                        "record": record,
                        "time_extracted": extracted,
                    })
                })
                .collect()
        }
        Message::Bookmark { state, .. } => vec![json!({
            "type": "STATE",
            "value": serde_json::to_value(state)?,
        })],
        Message::EntityFailed { .. } => Vec::new(),
    };
    Ok(lines)
}

/// Structured error line for stderr
pub fn error_message(error: &Error) -> Value {
    json!({
        "type": "ERROR",
        "kind": error.kind(),
        "message": error.root().to_string(),
        "entity": error.entity(),
    })
}
