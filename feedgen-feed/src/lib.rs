//! Feed assembly core: relevance filtering, the bounded post cache, the
//! outbound request gate and the assembler that ties them to the upstream
//! network.
//!
//! # Overview
//!
//! - [`relevance::RelevanceFilter`]: keyword policy deciding which posts belong
//! - [`cache::PostCache`]: insertion-ordered window over recently seen posts
//! - [`throttle::RequestGate`]: token bucket + rate-limit backoff
//! - [`upstream::UpstreamClient`]: the network seam, with the Bluesky impl
//! - [`assemble::FeedAssembler`]: `assemble(cursor, limit) -> Assembly`
//!
//! # Examples
//!
//! ```rust
//! use feedgen_feed::{FeedEntry, FeedPage};
//!
//! let page = FeedPage {
//!     cursor: None,
//!     feed: vec![FeedEntry::new("at://did:plc:x/app.bsky.feed.post/1")],
//! };
//! let json = serde_json::to_value(&page).unwrap();
//! assert_eq!(json, serde_json::json!({"feed": [{"post": "at://did:plc:x/app.bsky.feed.post/1"}]}));
//! ```
use chrono::{DateTime, Utc};
use feedgen_social::bluesky::PostView;
use serde::{Deserialize, Serialize};

pub mod assemble;
pub mod cache;
pub mod relevance;
pub mod throttle;
pub mod upstream;

pub use assemble::{
    Assembly, AssemblerConfig, FailurePolicy, FeedAssembler, SourceQuery, SourceReport,
    SourcesConfig,
};
pub use cache::{CachedPost, PostCache, SharedCache};
pub use relevance::{RelevanceConfig, RelevanceFilter, RelevancePolicy};
pub use throttle::{RequestGate, ThrottleConfig};
pub use upstream::{BlueskyUpstream, PostPage, SourceError, UpstreamClient};

/// A candidate post as fetched from one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRef {
    pub uri: String,
    pub indexed_at: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub author: Option<String>,
}

impl PostRef {
    /// `None` when the view carries no usable uri.
    pub fn from_view(view: &PostView) -> Option<Self> {
        let uri = view.uri.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
        Some(Self {
            uri: uri.to_string(),
            indexed_at: view.indexed_at(),
            text: view.text().map(str::to_string),
            author: view.author_handle().map(str::to_string),
        })
    }
}

/// One item of a feed skeleton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub post: String,
}

impl FeedEntry {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { post: uri.into() }
    }
}

/// Body of `app.bsky.feed.getFeedSkeleton`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub feed: Vec<FeedEntry>,
}
