use feedgen_common::FeedgenError;
use feedgen_feed::{
    AssemblerConfig, BlueskyUpstream, FeedAssembler, RelevanceFilter, RequestGate, SourceError,
    SourcesConfig, ThrottleConfig, UpstreamClient,
};
use feedgen_social::bluesky::BskyApi;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_session(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accessJwt": "jwt-abc",
            "did": "did:plc:feedbot",
            "handle": "feedbot.bsky.social"
        })))
        .mount(server)
        .await;
}

fn view(uri: &str, text: &str, indexed_at: &str) -> serde_json::Value {
    json!({
        "uri": uri,
        "cid": "bafy",
        "author": {"did": "did:plc:someone", "handle": "someone.bsky.social"},
        "record": {"$type": "app.bsky.feed.post", "text": text, "createdAt": indexed_at},
        "indexedAt": indexed_at
    })
}

fn upstream(server: &MockServer) -> BlueskyUpstream {
    let api = BskyApi::with_service(&server.uri()).unwrap();
    BlueskyUpstream::new(api, "feedbot.bsky.social", "app-pw")
}

#[tokio::test]
async fn assembles_from_timeline_and_search() {
    let server = MockServer::start().await;
    mount_session(&server).await;

    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.feed.getTimeline"))
        .and(header("authorization", "Bearer jwt-abc"))
        .and(query_param("limit", "30"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "cursor": "tl-next",
            "feed": [
                {"post": view("at://did:plc:a/app.bsky.feed.post/1", "Gay men's health week", "2024-06-01T12:00:00.000Z")},
                {"post": view("at://did:plc:a/app.bsky.feed.post/2", "Lunch was great", "2024-06-01T12:05:00.000Z")},
                {"post": {"record": {"text": "no uri, gay health"}}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.feed.searchPosts"))
        .and(query_param("q", "PrEP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "posts": [
                view("at://did:plc:a/app.bsky.feed.post/1", "Gay men's health week", "2024-06-01T12:00:00.000Z"),
                view("at://did:plc:b/app.bsky.feed.post/9", "PrEP access expands for queer folks", "2024-06-01T13:00:00.000Z")
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sources = SourcesConfig {
        search_terms: vec!["PrEP".into()],
        ..SourcesConfig::default()
    };
    let config = AssemblerConfig {
        pinned_uri: Some("at://did:plc:feedbot/app.bsky.feed.post/pin".into()),
        ..AssemblerConfig::default()
    };
    let assembler = FeedAssembler::new(
        Arc::new(upstream(&server)),
        RelevanceFilter::default(),
        RequestGate::new(ThrottleConfig::default()),
        sources,
        config,
    );

    let out = assembler.assemble(None, None).await.unwrap();
    let served: Vec<_> = out.page.feed.iter().map(|e| e.post.as_str()).collect();
    assert_eq!(
        served,
        vec![
            "at://did:plc:feedbot/app.bsky.feed.post/pin",
            "at://did:plc:b/app.bsky.feed.post/9",
            "at://did:plc:a/app.bsky.feed.post/1",
        ]
    );
    assert_eq!(out.page.cursor.as_deref(), Some("tl-next"));
}

#[tokio::test]
async fn rejected_login_is_an_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xrpc/com.atproto.server.createSession"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "AuthenticationRequired",
            "message": "Invalid identifier or password"
        })))
        .mount(&server)
        .await;

    let err = upstream(&server).login().await.unwrap_err();
    assert!(matches!(err, FeedgenError::Authentication(_)));
}

#[tokio::test]
async fn throttled_search_is_classified_as_rate_limited() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    Mock::given(method("GET"))
        .and(path("/xrpc/app.bsky.feed.searchPosts"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": "RateLimitExceeded",
            "message": "Rate Limit Exceeded"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let upstream = upstream(&server);
    let session = upstream.login().await.unwrap();
    let err = upstream.search(&session, "PrEP", 25).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert!(matches!(err, SourceError::RateLimited(_)));
}
