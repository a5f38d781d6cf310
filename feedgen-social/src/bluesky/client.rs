//! Thin wrapper over the Bluesky XRPC endpoints the feed generator reads.
//!
//! Handles session creation, parameter shaping and limit clamping before
//! delegating to the shared HTTP client. Errors are returned as `HttpError`
//! so callers can tell throttling apart from other failures.
use crate::bluesky::types::{FeedPage, SearchPage, Session};
use feedgen_http::{HttpClient, HttpError, RequestOpts};
use serde::Serialize;
use std::borrow::Cow;

/// Upstream PDS/entryway. Fixed; only tests point the client elsewhere.
pub const BSKY_SERVICE: &str = "https://bsky.social";

const MAX_PAGE: u32 = 100;

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Clone)]
pub struct BskyApi {
    http: HttpClient,
}

impl BskyApi {
    pub fn new() -> Result<Self, HttpError> {
        Self::with_service(BSKY_SERVICE)
    }

    pub fn with_service(base: &str) -> Result<Self, HttpError> {
        Ok(Self::with_http(HttpClient::new(base)?))
    }

    pub fn with_http(http: HttpClient) -> Self {
        Self { http }
    }

    pub async fn create_session(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Session, HttpError> {
        let session: Session = self
            .http
            .post_json(
                "xrpc/com.atproto.server.createSession",
                &CreateSessionRequest {
                    identifier,
                    password,
                },
                RequestOpts {
                    // A rejected password will not improve on retry.
                    retries: Some(0),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(did = %session.did, handle = %session.handle, "bsky.session.created");
        Ok(session)
    }

    pub async fn get_timeline(
        &self,
        session: &Session,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<FeedPage, HttpError> {
        let mut query = vec![("limit", clamp_limit(limit))];
        push_cursor(&mut query, cursor);

        let page: FeedPage = self
            .http
            .get_json(
                "xrpc/app.bsky.feed.getTimeline",
                RequestOpts {
                    bearer: Some(&session.access_jwt),
                    query: Some(query),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(items = page.feed.len(), cursor = ?page.cursor, "bsky.timeline.page");
        Ok(page)
    }

    pub async fn get_author_feed(
        &self,
        session: &Session,
        actor: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<FeedPage, HttpError> {
        let mut query = vec![("actor", Cow::Borrowed(actor)), ("limit", clamp_limit(limit))];
        push_cursor(&mut query, cursor);

        let page: FeedPage = self
            .http
            .get_json(
                "xrpc/app.bsky.feed.getAuthorFeed",
                RequestOpts {
                    bearer: Some(&session.access_jwt),
                    query: Some(query),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(actor, items = page.feed.len(), "bsky.author_feed.page");
        Ok(page)
    }

    /// `searchPosts` sorted by recency. Retries are left to the caller's
    /// throttle so a 429 surfaces immediately.
    pub async fn search_posts(
        &self,
        session: &Session,
        term: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<SearchPage, HttpError> {
        let mut query = vec![
            ("q", Cow::Borrowed(term)),
            ("sort", Cow::Borrowed("latest")),
            ("limit", clamp_limit(limit)),
        ];
        push_cursor(&mut query, cursor);

        let page: SearchPage = self
            .http
            .get_json(
                "xrpc/app.bsky.feed.searchPosts",
                RequestOpts {
                    bearer: Some(&session.access_jwt),
                    query: Some(query),
                    retries: Some(0),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(term, hits = page.posts.len(), hits_total = ?page.hits_total, "bsky.search.page");
        Ok(page)
    }
}

fn clamp_limit(limit: u32) -> Cow<'static, str> {
    Cow::Owned(limit.clamp(1, MAX_PAGE).to_string())
}

fn push_cursor<'a>(query: &mut Vec<(&'a str, Cow<'a, str>)>, cursor: Option<&'a str>) {
    if let Some(c) = cursor.filter(|c| !c.is_empty()) {
        query.push(("cursor", Cow::Borrowed(c)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped_to_the_xrpc_range() {
        assert_eq!(clamp_limit(0), "1");
        assert_eq!(clamp_limit(30), "30");
        assert_eq!(clamp_limit(500), "100");
    }

    #[test]
    fn empty_cursor_is_not_sent() {
        let mut q = Vec::new();
        push_cursor(&mut q, Some(""));
        assert!(q.is_empty());
        push_cursor(&mut q, Some("c1"));
        assert_eq!(q, vec![("cursor", Cow::Borrowed("c1"))]);
    }
}
