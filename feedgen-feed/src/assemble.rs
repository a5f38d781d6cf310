//! Feed assembly pipeline.
//!
//! `login -> sources (sequential, gated) -> relevance filter -> dedup by uri
//! -> cache merge -> recency sort -> truncate -> pinned head`.
//!
//! Source queries never abort the pipeline; each one's outcome is returned
//! as a [`SourceReport`]. Only the session call is fatal, and the configured
//! [`FailurePolicy`] decides whether that becomes an error or a degraded page.
use crate::cache::{CachedPost, PostCache, SharedCache, DEFAULT_CACHE_CAPACITY};
use crate::relevance::RelevanceFilter;
use crate::throttle::RequestGate;
use crate::upstream::{PostPage, SourceError, UpstreamClient};
use crate::{FeedEntry, FeedPage, PostRef};
use chrono::{SecondsFormat, Utc};
use feedgen_common::Result;
use feedgen_social::bluesky::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Which upstream queries run for every assembly, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub timeline: bool,
    pub timeline_limit: u32,
    /// Handles or DIDs whose author feeds are always consulted.
    pub authors: Vec<String>,
    pub author_limit: u32,
    /// Fixed search terms (hashtags included).
    pub search_terms: Vec<String>,
    pub search_limit: u32,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            timeline: true,
            timeline_limit: 30,
            authors: Vec::new(),
            author_limit: 30,
            search_terms: vec![
                "gay men's health".into(),
                "#gayhealth".into(),
                "PrEP".into(),
                "HIV prevention".into(),
                "LGBTQ health".into(),
            ],
            search_limit: 25,
        }
    }
}

/// What to do when the session cannot be opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Propagate the error (the HTTP surface answers 500).
    #[default]
    Strict,
    /// Answer with the pinned entry alone.
    Degrade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Upper bound on feed length, pinned entry included.
    pub max_items: usize,
    /// Announcement post always served first.
    pub pinned_uri: Option<String>,
    pub cache: bool,
    pub cache_capacity: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_items: 50,
            pinned_uri: None,
            cache: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            failure_policy: FailurePolicy::Strict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceQuery {
    Timeline,
    Author(String),
    Search(String),
}

impl fmt::Display for SourceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceQuery::Timeline => write!(f, "timeline"),
            SourceQuery::Author(actor) => write!(f, "author:{actor}"),
            SourceQuery::Search(term) => write!(f, "search:{term}"),
        }
    }
}

/// Outcome of one source query: number of posts fetched, or why none were.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: SourceQuery,
    pub outcome: std::result::Result<usize, SourceError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub page: FeedPage,
    pub reports: Vec<SourceReport>,
    /// True when the session failed and the degrade policy answered.
    pub degraded: bool,
}

impl Assembly {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.reports.iter().filter(|r| r.outcome.is_err())
    }
}

pub struct FeedAssembler {
    upstream: Arc<dyn UpstreamClient>,
    filter: RelevanceFilter,
    gate: RequestGate,
    cache: Option<SharedCache>,
    sources: SourcesConfig,
    config: AssemblerConfig,
}

impl FeedAssembler {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        filter: RelevanceFilter,
        gate: RequestGate,
        sources: SourcesConfig,
        config: AssemblerConfig,
    ) -> Self {
        let cache = config
            .cache
            .then(|| PostCache::shared(config.cache_capacity));
        Self {
            upstream,
            filter,
            gate,
            cache,
            sources,
            config,
        }
    }

    /// Replace the internally created cache, e.g. to inspect it from tests.
    pub fn with_cache(mut self, cache: Option<SharedCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> Option<&SharedCache> {
        self.cache.as_ref()
    }

    pub fn pinned_uri(&self) -> Option<&str> {
        self.config.pinned_uri.as_deref().filter(|u| !u.is_empty())
    }

    /// The ordered list of source queries run for every assembly.
    pub fn queries(&self) -> Vec<SourceQuery> {
        let mut queries = Vec::new();
        if self.sources.timeline {
            queries.push(SourceQuery::Timeline);
        }
        queries.extend(self.sources.authors.iter().cloned().map(SourceQuery::Author));
        queries.extend(
            self.sources
                .search_terms
                .iter()
                .cloned()
                .map(SourceQuery::Search),
        );
        queries
    }

    /// Build one feed skeleton page.
    ///
    /// `limit` can only shrink the configured maximum.
    pub async fn assemble(&self, cursor: Option<&str>, limit: Option<usize>) -> Result<Assembly> {
        let cursor = cursor.filter(|c| !c.is_empty());

        let session = match self.upstream.login().await {
            Ok(session) => session,
            Err(err) => match self.config.failure_policy {
                FailurePolicy::Strict => {
                    tracing::warn!(error = %err, "assemble.login.failed");
                    return Err(err);
                }
                FailurePolicy::Degrade => {
                    tracing::warn!(error = %err, "assemble.login.failed.degrading");
                    return Ok(self.degraded());
                }
            },
        };

        let (fetched, reports, upstream_cursor) = self.gather(&session, cursor).await;
        let fetched_count = fetched.len();

        let relevant: Vec<PostRef> = fetched
            .into_iter()
            .filter(|post| {
                let keep = self.filter.is_relevant(post.text.as_deref());
                if keep {
                    tracing::trace!(uri = %post.uri, author = ?post.author, "assemble.relevant");
                }
                keep
            })
            .collect();
        let relevant_count = relevant.len();

        let unique = dedup_by_uri(relevant);
        let mut ordered: Vec<CachedPost> = match &self.cache {
            Some(cache) => {
                let mut cache = cache.lock().await;
                for post in unique {
                    cache.put(to_cached(post));
                }
                cache.values()
            }
            None => unique.into_iter().map(to_cached).collect(),
        };
        sort_by_recency(&mut ordered);

        let cap = limit.map_or(self.config.max_items, |l| l.min(self.config.max_items));
        let feed = build_feed(self.pinned_uri(), ordered, cap);

        let cursor = upstream_cursor
            .or_else(|| cursor.map(str::to_string))
            .or_else(|| Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)));

        let failed = reports.iter().filter(|r| r.outcome.is_err()).count();
        if failed > 0 && failed == reports.len() {
            tracing::warn!(sources = failed, "assemble.all_sources_failed");
        }
        tracing::info!(
            fetched = fetched_count,
            relevant = relevant_count,
            served = feed.len(),
            failed_sources = failed,
            "assemble.done"
        );

        Ok(Assembly {
            page: FeedPage { cursor, feed },
            reports,
            degraded: false,
        })
    }

    fn degraded(&self) -> Assembly {
        Assembly {
            page: FeedPage {
                cursor: None,
                feed: self.pinned_uri().map(FeedEntry::new).into_iter().collect(),
            },
            reports: Vec::new(),
            degraded: true,
        }
    }

    /// Run every source query one after another. Returns the fetched posts,
    /// per-source reports and the timeline's continuation cursor.
    async fn gather(
        &self,
        session: &Session,
        cursor: Option<&str>,
    ) -> (Vec<PostRef>, Vec<SourceReport>, Option<String>) {
        let queries = self.queries();
        let mut posts = Vec::new();
        let mut reports = Vec::with_capacity(queries.len());
        let mut timeline_cursor = None;

        for (idx, query) in queries.iter().enumerate() {
            self.gate.acquire().await;
            let result = self.run_query(session, query, cursor).await;

            match result {
                Ok(page) => {
                    tracing::debug!(source = %query, posts = page.posts.len(), "assemble.source.ok");
                    if *query == SourceQuery::Timeline {
                        timeline_cursor = page.cursor;
                    }
                    reports.push(SourceReport {
                        source: query.clone(),
                        outcome: Ok(page.posts.len()),
                    });
                    posts.extend(page.posts);
                }
                Err(err) => {
                    tracing::warn!(source = %query, error = %err, "assemble.source.failed");
                    let rate_limited = err.is_rate_limited();
                    reports.push(SourceReport {
                        source: query.clone(),
                        outcome: Err(err),
                    });
                    if rate_limited && idx + 1 < queries.len() {
                        self.gate.back_off().await;
                    }
                }
            }
        }

        (posts, reports, timeline_cursor)
    }

    async fn run_query(
        &self,
        session: &Session,
        query: &SourceQuery,
        cursor: Option<&str>,
    ) -> std::result::Result<PostPage, SourceError> {
        match query {
            SourceQuery::Timeline => {
                self.upstream
                    .timeline(session, self.sources.timeline_limit, cursor)
                    .await
            }
            SourceQuery::Author(actor) => {
                self.upstream
                    .author_feed(session, actor, self.sources.author_limit)
                    .await
            }
            SourceQuery::Search(term) => {
                self.upstream
                    .search(session, term, self.sources.search_limit)
                    .await
            }
        }
    }
}

/// Keep one post per uri. When the same uri arrives twice, the instance with
/// the more recent `indexed_at` wins; otherwise the first one seen stays.
/// Output keeps first-seen order.
pub fn dedup_by_uri(posts: Vec<PostRef>) -> Vec<PostRef> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(posts.len());
    let mut unique: Vec<PostRef> = Vec::with_capacity(posts.len());

    for post in posts {
        match index.get(&post.uri) {
            Some(&at) => {
                if post.indexed_at > unique[at].indexed_at {
                    unique[at] = post;
                }
            }
            None => {
                index.insert(post.uri.clone(), unique.len());
                unique.push(post);
            }
        }
    }
    unique
}

/// Newest first; posts without a timestamp sink to the end in arrival order.
pub fn sort_by_recency(posts: &mut [CachedPost]) {
    posts.sort_by(|a, b| b.indexed_at.cmp(&a.indexed_at));
}

fn to_cached(post: PostRef) -> CachedPost {
    CachedPost {
        uri: post.uri,
        indexed_at: post.indexed_at,
    }
}

/// Pinned entry first, then up to `cap` entries in total.
fn build_feed(pinned: Option<&str>, ordered: Vec<CachedPost>, cap: usize) -> Vec<FeedEntry> {
    let mut feed = Vec::with_capacity(cap.min(ordered.len() + 1));
    if let Some(uri) = pinned {
        feed.push(FeedEntry::new(uri));
    }
    let cap = cap.max(feed.len());
    feed.extend(
        ordered
            .into_iter()
            .filter(|p| Some(p.uri.as_str()) != pinned)
            .take(cap - feed.len())
            .map(|p| FeedEntry::new(p.uri)),
    );
    feed
}
