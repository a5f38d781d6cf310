//! The seam between the assembler and the upstream network.
//!
//! [`UpstreamClient`] is what the assembler talks to; [`BlueskyUpstream`] is
//! the production implementation over `feedgen_social::bluesky::BskyApi`.
//! Tests substitute in-memory fakes.
use crate::PostRef;
use async_trait::async_trait;
use feedgen_common::{FeedgenError, Result};
use feedgen_http::HttpError;
use feedgen_social::bluesky::{BskyApi, PostView, Session};

/// One page of posts from a single source query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostPage {
    pub posts: Vec<PostRef>,
    pub cursor: Option<String>,
}

/// Why a single source query produced nothing. Never fatal to the assembly.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("upstream request failed: {0}")]
    Http(String),

    #[error("unexpected response shape: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited(_))
    }
}

impl From<HttpError> for SourceError {
    fn from(err: HttpError) -> Self {
        if err.is_rate_limited() {
            return SourceError::RateLimited(err.to_string());
        }
        match err {
            HttpError::Decode(msg, _) => SourceError::Decode(msg),
            other => SourceError::Http(other.to_string()),
        }
    }
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Open a session. Must succeed before any fetch.
    async fn login(&self) -> Result<Session>;

    async fn timeline(
        &self,
        session: &Session,
        limit: u32,
        cursor: Option<&str>,
    ) -> std::result::Result<PostPage, SourceError>;

    async fn author_feed(
        &self,
        session: &Session,
        actor: &str,
        limit: u32,
    ) -> std::result::Result<PostPage, SourceError>;

    async fn search(
        &self,
        session: &Session,
        term: &str,
        limit: u32,
    ) -> std::result::Result<PostPage, SourceError>;
}

/// Production upstream: logs in with an app password on every assembly.
pub struct BlueskyUpstream {
    api: BskyApi,
    identifier: String,
    password: String,
}

impl BlueskyUpstream {
    pub fn new(api: BskyApi, identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            api,
            identifier: identifier.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl UpstreamClient for BlueskyUpstream {
    async fn login(&self) -> Result<Session> {
        tracing::debug!(identifier = %self.identifier, "upstream.login");
        self.api
            .create_session(&self.identifier, &self.password)
            .await
            .map_err(|err| match err.status() {
                Some(status) if status.is_client_error() => {
                    FeedgenError::Authentication(err.to_string())
                }
                _ => FeedgenError::Upstream(format!("session request failed: {err}")),
            })
    }

    async fn timeline(
        &self,
        session: &Session,
        limit: u32,
        cursor: Option<&str>,
    ) -> std::result::Result<PostPage, SourceError> {
        let page = self.api.get_timeline(session, limit, cursor).await?;
        Ok(PostPage {
            posts: collect_posts(page.feed.into_iter().filter_map(|item| item.post)),
            cursor: page.cursor,
        })
    }

    async fn author_feed(
        &self,
        session: &Session,
        actor: &str,
        limit: u32,
    ) -> std::result::Result<PostPage, SourceError> {
        let page = self.api.get_author_feed(session, actor, limit, None).await?;
        Ok(PostPage {
            posts: collect_posts(page.feed.into_iter().filter_map(|item| item.post)),
            cursor: page.cursor,
        })
    }

    async fn search(
        &self,
        session: &Session,
        term: &str,
        limit: u32,
    ) -> std::result::Result<PostPage, SourceError> {
        let page = self.api.search_posts(session, term, limit, None).await?;
        Ok(PostPage {
            posts: collect_posts(page.posts),
            cursor: page.cursor,
        })
    }
}

/// Convert wire posts, dropping items without a uri.
pub fn collect_posts(views: impl IntoIterator<Item = PostView>) -> Vec<PostRef> {
    let mut dropped = 0usize;
    let posts: Vec<PostRef> = views
        .into_iter()
        .filter_map(|view| {
            let post = PostRef::from_view(&view);
            if post.is_none() {
                dropped += 1;
            }
            post
        })
        .collect();
    if dropped > 0 {
        tracing::debug!(dropped, kept = posts.len(), "upstream.posts.malformed_dropped");
    }
    posts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn posts_without_uri_are_dropped() {
        let views = vec![
            PostView {
                uri: Some("at://a/app.bsky.feed.post/1".into()),
                record: json!({"text": "one"}),
                ..Default::default()
            },
            PostView {
                uri: None,
                record: json!({"text": "orphan"}),
                ..Default::default()
            },
            PostView {
                uri: Some("   ".into()),
                ..Default::default()
            },
        ];
        let posts = collect_posts(views);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text.as_deref(), Some("one"));
    }

    #[test]
    fn http_errors_are_classified() {
        let limited = HttpError::Api {
            status: reqwest_status(429),
            error: "RateLimitExceeded".into(),
            message: "slow down".into(),
            request_id: "-".into(),
        };
        assert!(SourceError::from(limited).is_rate_limited());

        let decode = HttpError::Decode("missing field".into(), "{}".into());
        assert!(matches!(SourceError::from(decode), SourceError::Decode(_)));

        let network = HttpError::Network("connection reset".into());
        assert!(matches!(SourceError::from(network), SourceError::Http(_)));
    }

    fn reqwest_status(code: u16) -> feedgen_http::StatusCode {
        feedgen_http::StatusCode::from_u16(code).unwrap()
    }
}
