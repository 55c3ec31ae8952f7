//! Query engine.
//!
//! Resolves a channel to its live snapshot and answers one query against
//! that snapshot only, so a concurrent publish never mixes two builds into
//! one page.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use fc_search_types::{Record, RecordKind, Revisions};

use crate::error::QueryError;
use crate::rank::MatchClass;
use crate::registry::ChannelRegistry;

/// Default number of hits per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Default upper bound for requested page sizes.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 200;

/// Search options for filtering and paging results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Filter by record kind (None = all kinds)
    pub kind: Option<RecordKind>,
    /// Page size; `None` uses the engine default
    pub limit: Option<usize>,
    /// Zero-based page number
    pub page: usize,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: RecordKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }

    pub fn packages_only() -> Self {
        Self::new().with_kind(RecordKind::Package)
    }

    pub fn options_only() -> Self {
        Self::new().with_kind(RecordKind::Option)
    }
}

/// Whether a channel can answer queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "sequence", rename_all = "snake_case")]
pub enum Readiness {
    Unknown,
    NotReady,
    /// Serving the snapshot with this sequence.
    Ready(u64),
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub record: Arc<Record>,
    pub match_class: MatchClass,
}

/// One page of ranked results from a single snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub channel: String,
    pub readiness: Readiness,
    pub built_at: Option<DateTime<Utc>>,
    pub revisions: Revisions,
    /// Matches before paging.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub hits: Vec<Hit>,
}

impl Page {
    fn empty(channel: &str, readiness: Readiness, page_size: usize) -> Self {
        Self {
            channel: channel.to_string(),
            readiness,
            built_at: None,
            revisions: Revisions::new(),
            total: 0,
            page: 0,
            page_size,
            hits: Vec::new(),
        }
    }

    /// Build sequence of the snapshot that answered, if any.
    pub fn sequence(&self) -> Option<u64> {
        match self.readiness {
            Readiness::Ready(sequence) => Some(sequence),
            _ => None,
        }
    }

    pub fn has_more(&self) -> bool {
        self.page
            .saturating_add(1)
            .saturating_mul(self.page_size)
            < self.total
    }
}

/// Answers searches against the registry's live snapshots.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    registry: Arc<ChannelRegistry>,
    page_size: usize,
    max_page_size: usize,
}

impl QueryEngine {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self {
            registry,
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    /// Override the default and maximum page sizes. Zero values are raised
    /// to one; the maximum is never below the default.
    pub fn with_page_sizes(mut self, page_size: usize, max_page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self.max_page_size = max_page_size.max(self.page_size);
        self
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn readiness(&self, channel: &str) -> Readiness {
        if !self.registry.contains(channel) {
            return Readiness::Unknown;
        }
        match self.registry.get(channel) {
            Some(index) => Readiness::Ready(index.sequence()),
            None => Readiness::NotReady,
        }
    }

    /// First page of `query` in `channel`, optionally restricted to `kind`.
    pub fn search(
        &self,
        channel: &str,
        query: &str,
        kind: Option<RecordKind>,
    ) -> Result<Page, QueryError> {
        self.search_with(
            channel,
            query,
            SearchOptions {
                kind,
                ..SearchOptions::default()
            },
        )
    }

    /// Search with explicit paging.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` for channels never registered. `ChannelNotReady` for
    /// a non-empty query against a channel without a build; an empty query
    /// always yields an empty page.
    pub fn search_with(
        &self,
        channel: &str,
        query: &str,
        options: SearchOptions,
    ) -> Result<Page, QueryError> {
        if !self.registry.contains(channel) {
            return Err(QueryError::UnknownChannel(channel.to_string()));
        }
        let page_size = options
            .limit
            .unwrap_or(self.page_size)
            .clamp(1, self.max_page_size);

        // one load; everything below reads this snapshot only
        let snapshot = self.registry.get(channel);

        if query.trim().is_empty() {
            let readiness = snapshot
                .as_ref()
                .map_or(Readiness::NotReady, |index| Readiness::Ready(index.sequence()));
            return Ok(Page::empty(channel, readiness, page_size));
        }

        let index = snapshot.ok_or_else(|| QueryError::ChannelNotReady(channel.to_string()))?;
        let matches = index.search(query, options.kind);
        let total = matches.len();

        let hits: Vec<Hit> = matches
            .iter()
            .skip(options.page.saturating_mul(page_size))
            .take(page_size)
            .filter_map(|m| {
                index.record(m.id).map(|record| Hit {
                    record: Arc::clone(record),
                    match_class: m.class,
                })
            })
            .collect();

        debug!(
            channel,
            query,
            sequence = index.sequence(),
            total,
            returned = hits.len(),
            "Search"
        );

        Ok(Page {
            channel: channel.to_string(),
            readiness: Readiness::Ready(index.sequence()),
            built_at: Some(index.built_at()),
            revisions: index.revisions().clone(),
            total,
            page: options.page,
            page_size,
            hits,
        })
    }
}
