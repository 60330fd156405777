//! Definition source synchronization.
//!
//! Tails the definition feed and keeps the schema registry and policy engine
//! current. Items are applied in feed order; a malformed item is logged and
//! skipped. The first time the feed is drained both engines are marked synced.
//!
//! Engine state lives only in memory, so every boot replays the feed from the
//! start. The cursor file records progress for operators and is never used as
//! the replay start.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use admit_events::{DefinitionAction, DefinitionEvent, DefinitionResource};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::policy::PolicyDecisionEngine;
use crate::schema::SchemaRegistry;
use crate::settings::Secret;

#[derive(Debug, Deserialize)]
pub struct DefinitionPage {
    /// Raw items; each is decoded on its own so one bad item cannot stall the feed.
    pub items: Vec<Value>,
    pub next_after: i64,
}

/// HTTP client for the definition source. Built once at startup.
#[derive(Debug, Clone)]
pub struct DefinitionSourceClient {
    http: reqwest::Client,
    base_url: String,
    limit: i64,
}

impl DefinitionSourceClient {
    pub fn new(
        base_url: &str,
        token: Option<&Secret>,
        limit: i64,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let raw = token.expose().trim();
            let bearer = if raw.starts_with("Bearer ") || raw.starts_with("bearer ") {
                raw.to_string()
            } else {
                format!("Bearer {raw}")
            };

            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer).context("Invalid definition-source token format")?,
            );
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("admit-ingestion/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limit,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.definitions_url,
            config.definitions_token.as_ref(),
            config.sync_limit,
            config.sync_request_timeout,
        )
    }

    /// Fetch definition events with `seq > after`.
    pub async fn fetch(&self, after: i64) -> Result<DefinitionPage> {
        let url = format!("{}/v1/definitions/events", self.base_url);

        let resp = self
            .http
            .get(url)
            .query(&[("after", after), ("limit", self.limit)])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "definition query failed (status={}): {}",
                status,
                body
            ));
        }

        Ok(resp.json::<DefinitionPage>().await?)
    }
}

pub fn read_cursor(path: &Path) -> Result<i64> {
    if !path.exists() {
        return Ok(0);
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read cursor file {}", path.display()))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    trimmed
        .parse::<i64>()
        .with_context(|| format!("Invalid cursor in {}", path.display()))
}

pub fn write_cursor(path: &Path, cursor: i64) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp: PathBuf = path.with_extension("tmp");
    fs::write(&tmp, cursor.to_string())
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| {
        format!(
            "Failed to move cursor file into place ({} -> {})",
            tmp.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// Applies the definition feed to the registry and engine.
pub struct DefinitionSync {
    client: DefinitionSourceClient,
    registry: Arc<SchemaRegistry>,
    engine: Arc<PolicyDecisionEngine>,
    poll_interval: Duration,
    cursor_file: Option<PathBuf>,
}

impl DefinitionSync {
    pub fn new(
        client: DefinitionSourceClient,
        registry: Arc<SchemaRegistry>,
        engine: Arc<PolicyDecisionEngine>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            engine,
            poll_interval,
            cursor_file: None,
        }
    }

    pub fn with_cursor_file(mut self, path: Option<PathBuf>) -> Self {
        self.cursor_file = path;
        self
    }

    /// Apply one decoded feed item.
    pub async fn apply(&self, event: &DefinitionEvent) -> Result<()> {
        let resource = event.decode()?;

        match (event.action, resource) {
            (DefinitionAction::Added | DefinitionAction::Updated, DefinitionResource::EventType(def)) => {
                self.registry.apply_definition(&def).await;
            }
            (DefinitionAction::Deleted, DefinitionResource::EventType(def)) => {
                self.registry.remove_definition(&def).await;
            }
            (
                DefinitionAction::Added | DefinitionAction::Updated,
                DefinitionResource::IngestionPolicy(policy),
            ) => {
                self.engine.apply_policy(&policy).await;
            }
            (DefinitionAction::Deleted, DefinitionResource::IngestionPolicy(policy)) => {
                self.engine.remove_policy(&policy.resource_ref()).await;
            }
        }

        Ok(())
    }

    /// Fetch and apply one page. Returns the new cursor and the number of items seen.
    pub async fn poll_once(&self, cursor: i64) -> Result<(i64, usize)> {
        let page = self.client.fetch(cursor).await?;
        let seen = page.items.len();
        let mut cursor = cursor;

        for item in page.items {
            let seq = item.get("seq").and_then(Value::as_i64);
            if let Some(seq) = seq {
                cursor = cursor.max(seq);
            }

            let event: DefinitionEvent = match serde_json::from_value(item) {
                Ok(event) => event,
                Err(e) => {
                    warn!(seq = ?seq, error = %e, "skipping malformed definition event");
                    continue;
                }
            };

            if let Err(e) = self.apply(&event).await {
                warn!(
                    seq = event.seq,
                    action = event.action.as_str(),
                    kind = event.kind.as_str(),
                    error = %e,
                    "skipping definition event"
                );
            }
        }

        Ok((page.next_after.max(cursor), seen))
    }

    fn mark_synced(&self, cursor: i64) {
        if self.registry.is_synced() && self.engine.is_synced() {
            return;
        }
        self.registry.mark_synced();
        self.engine.mark_synced();
        info!(cursor, "definition sync caught up; ingestion ready");
    }

    /// Poll the definition feed forever, starting from the beginning.
    pub async fn run(&self) {
        if let Some(path) = &self.cursor_file {
            match read_cursor(path) {
                Ok(previous) => {
                    info!(previous, "replaying definition feed from the start");
                }
                Err(e) => warn!(error = %e, "ignoring unreadable cursor file"),
            }
        }

        let mut cursor = 0;
        loop {
            let (next, seen) = match self.poll_once(cursor).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, cursor, "failed to fetch definitions; retrying");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            if next != cursor {
                cursor = next;
                if let Some(path) = &self.cursor_file {
                    if let Err(e) = write_cursor(path, cursor) {
                        warn!(error = %e, cursor, "failed to persist definition cursor");
                    }
                }
            }

            if seen == 0 {
                self.mark_synced(cursor);
                debug!(cursor, "definition feed idle");
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}
