use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of `com.atproto.server.createSession`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_jwt: String,
    #[serde(default)]
    pub refresh_jwt: Option<String>,
    pub did: String,
    pub handle: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("did", &self.did)
            .field("handle", &self.handle)
            .field("access_jwt", &"<redacted>")
            .finish()
    }
}

/// Page returned by `getTimeline` and `getAuthorFeed`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedPage {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub feed: Vec<FeedViewPost>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedViewPost {
    #[serde(default)]
    pub post: Option<PostView>,
}

/// Page returned by `searchPosts`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub hits_total: Option<u64>,
    #[serde(default)]
    pub posts: Vec<PostView>,
}

/// Hydrated post as served by the AppView. Every field is optional so one
/// malformed item never sinks the whole page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub cid: Option<String>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Author {
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub handle: Option<String>,
}

impl PostView {
    /// `record.text` of an `app.bsky.feed.post`, if present.
    pub fn text(&self) -> Option<&str> {
        self.record.get("text").and_then(|t| t.as_str())
    }

    /// `indexedAt`, falling back to the record's `createdAt`.
    pub fn indexed_at(&self) -> Option<DateTime<Utc>> {
        self.indexed_at
            .as_deref()
            .or_else(|| self.record.get("createdAt").and_then(|c| c.as_str()))
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn author_handle(&self) -> Option<&str> {
        self.author.as_ref().and_then(|a| a.handle.as_deref())
    }
}
