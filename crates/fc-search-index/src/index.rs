//! Immutable per-channel search index.
//!
//! A [`ChannelIndex`] is built once from a feed load and only read
//! afterwards. Three structures serve lookups:
//!
//! - gram postings: every lowercase 1-, 2- and 3-char window of the
//!   searchable text maps to the sorted ids of the records containing it;
//! - segment table: the identity suffixes starting at the identity itself and
//!   after each `.`, sorted, for binary-searched dotted prefix lookup;
//! - exact map: lowercase identity to record ids.
//!
//! A query never scans the full record set. Candidates come from the
//! postings of the query's grams and are verified against the lowered text.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use fc_search_feed::LoadResult;
use fc_search_types::{Record, RecordKind, Revisions};

use crate::rank::{self, LoweredFields, MatchClass};

const MAX_GRAM: usize = 3;

/// Suffix of an identity starting at a segment boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SegmentEntry {
    suffix: String,
    id: u32,
    /// The suffix is the whole identity.
    leading: bool,
}

/// A ranked match: record id within the index plus its class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub id: u32,
    pub class: MatchClass,
}

/// Immutable search snapshot of one channel.
#[derive(Debug, PartialEq)]
pub struct ChannelIndex {
    channel: String,
    sequence: u64,
    built_at: DateTime<Utc>,
    revisions: Revisions,
    skipped: usize,
    records: Vec<Arc<Record>>,
    lowered: Vec<LoweredFields>,
    grams: HashMap<String, Vec<u32>>,
    segments: Vec<SegmentEntry>,
    exact: HashMap<String, Vec<u32>>,
}

impl ChannelIndex {
    /// Build an index stamped with the current time.
    pub fn build(channel: impl Into<String>, sequence: u64, load: LoadResult) -> Self {
        Self::build_at(channel, sequence, load, Utc::now())
    }

    /// Build an index with an explicit build time.
    ///
    /// Records are numbered in (kind, identity) order, so the same record set
    /// yields an equal index regardless of feed order.
    pub fn build_at(
        channel: impl Into<String>,
        sequence: u64,
        load: LoadResult,
        built_at: DateTime<Utc>,
    ) -> Self {
        let channel = channel.into();
        let skipped = load.skipped.len();

        let mut records = load.records;
        records.sort_by(|a, b| {
            a.kind()
                .cmp(&b.kind())
                .then_with(|| a.identity().cmp(b.identity()))
        });
        // loader output is unique per document; this only guards merged sets
        records.dedup_by(|a, b| a.kind() == b.kind() && a.identity() == b.identity());

        let lowered: Vec<LoweredFields> = records.iter().map(LoweredFields::of).collect();

        let mut grams: HashMap<String, Vec<u32>> = HashMap::new();
        let mut segments = Vec::new();
        let mut exact: HashMap<String, Vec<u32>> = HashMap::new();

        let mut record_grams: HashSet<String> = HashSet::new();
        for (id, fields) in lowered.iter().enumerate() {
            let id = id as u32;

            record_grams.clear();
            for text in fields.texts() {
                collect_grams(text, &mut record_grams);
            }
            for gram in record_grams.drain() {
                grams.entry(gram).or_default().push(id);
            }

            segments.push(SegmentEntry {
                suffix: fields.identity.clone(),
                id,
                leading: true,
            });
            for (pos, _) in fields.identity.match_indices('.') {
                let suffix = &fields.identity[pos + 1..];
                if !suffix.is_empty() {
                    segments.push(SegmentEntry {
                        suffix: suffix.to_string(),
                        id,
                        leading: false,
                    });
                }
            }

            exact.entry(fields.identity.clone()).or_default().push(id);
        }
        segments.sort();

        debug!(
            channel = %channel,
            sequence,
            records = records.len(),
            grams = grams.len(),
            segments = segments.len(),
            "Built channel index"
        );

        Self {
            channel,
            sequence,
            built_at,
            revisions: load.revisions,
            skipped,
            records: records.into_iter().map(Arc::new).collect(),
            lowered,
            grams,
            segments,
            exact,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Build sequence number; higher is newer.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn revisions(&self) -> &Revisions {
        &self.revisions
    }

    /// Number of feed entries skipped while loading this build.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, id: u32) -> Option<&Arc<Record>> {
        self.records.get(id as usize)
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.iter()
    }

    /// Look up a record by exact identity.
    pub fn lookup(&self, kind: RecordKind, identity: &str) -> Option<&Arc<Record>> {
        self.exact
            .get(&identity.to_lowercase())?
            .iter()
            .filter_map(|&id| self.record(id))
            .find(|r| r.kind() == kind && r.identity() == identity)
    }

    /// Count records per kind.
    pub fn kind_counts(&self) -> BTreeMap<RecordKind, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// All records matching `query`, ranked best first.
    ///
    /// Matching is case-insensitive. An empty or whitespace-only query
    /// matches nothing.
    pub fn search(&self, query: &str, kind: Option<RecordKind>) -> Vec<Match> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let terms: Vec<&str> = query.split_whitespace().collect();

        // identity equality and identity prefixes come from the structures
        let mut structural: HashMap<u32, MatchClass> = HashMap::new();
        if let Some(ids) = self.exact.get(&query) {
            for &id in ids {
                structural.insert(id, MatchClass::Exact);
            }
        }
        for entry in self.segment_range(&query) {
            let class = if entry.leading {
                MatchClass::Prefix
            } else {
                MatchClass::SegmentPrefix
            };
            structural
                .entry(entry.id)
                .and_modify(|c| *c = (*c).min(class))
                .or_insert(class);
        }

        let candidates = if terms.len() == 1 {
            self.candidates(&query)
        } else {
            terms
                .iter()
                .map(|term| self.candidates(term))
                .reduce(|acc, next| intersect(&acc, &next))
                .unwrap_or_default()
        };

        let mut matches: Vec<Match> = candidates
            .into_iter()
            .chain(structural.keys().copied())
            .collect::<HashSet<u32>>()
            .into_iter()
            .filter(|&id| kind.map_or(true, |k| self.records[id as usize].kind() == k))
            .filter_map(|id| {
                let textual = self.lowered[id as usize].classify(&query, &terms);
                let class = match (structural.get(&id).copied(), textual) {
                    (Some(a), Some(b)) => a.min(b),
                    (a, b) => a.or(b)?,
                };
                Some(Match { id, class })
            })
            .collect();

        matches.sort_by(|a, b| {
            rank::compare(
                (a.class, &self.records[a.id as usize]),
                (b.class, &self.records[b.id as usize]),
            )
        });
        matches
    }

    fn segment_range<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a SegmentEntry> + 'a {
        let start = self
            .segments
            .partition_point(|entry| entry.suffix.as_str() < query);
        self.segments[start..]
            .iter()
            .take_while(move |entry| entry.suffix.starts_with(query))
    }

    /// Ids whose text contains every gram of `term`, shortest posting first.
    /// A superset of the true matches; callers verify.
    fn candidates(&self, term: &str) -> Vec<u32> {
        let mut needed = HashSet::new();
        let n = term.chars().count().min(MAX_GRAM);
        collect_grams_of_len(term, n, &mut needed);

        let mut lists = Vec::with_capacity(needed.len());
        for gram in &needed {
            match self.grams.get(gram.as_str()) {
                Some(list) => lists.push(list),
                None => return Vec::new(),
            }
        }
        lists.sort_by_key(|list| list.len());

        let Some((first, rest)) = lists.split_first() else {
            return Vec::new();
        };
        first
            .iter()
            .copied()
            .filter(|id| rest.iter().all(|list| list.binary_search(id).is_ok()))
            .collect()
    }
}

fn collect_grams(text: &str, out: &mut HashSet<String>) {
    for n in 1..=MAX_GRAM {
        collect_grams_of_len(text, n, out);
    }
}

fn collect_grams_of_len(text: &str, n: usize, out: &mut HashSet<String>) {
    if n == 0 {
        return;
    }
    let chars: Vec<char> = text.chars().collect();
    for window in chars.windows(n) {
        out.insert(window.iter().collect());
    }
}

fn intersect(a: &[u32], b: &[u32]) -> Vec<u32> {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .copied()
        .filter(|id| large.binary_search(id).is_ok())
        .collect()
}
