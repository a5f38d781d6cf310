//! Turns a loaded [`FeedgenConfig`] into the running pieces.
use crate::routes::{AppState, EnvironmentStatus};
use anyhow::{Context, Result};
use feedgen_config::{Credentials, FeedgenConfig};
use feedgen_feed::{BlueskyUpstream, FeedAssembler, RelevanceFilter, RequestGate, UpstreamClient};
use feedgen_social::bluesky::BskyApi;
use std::sync::Arc;

/// Production upstream backed by the public Bluesky service.
pub fn bluesky_upstream(credentials: Credentials) -> Result<Arc<dyn UpstreamClient>> {
    let api = BskyApi::new().context("failed to build Bluesky client")?;
    Ok(Arc::new(BlueskyUpstream::new(
        api,
        credentials.identifier,
        credentials.password,
    )))
}

pub fn assembler(upstream: Arc<dyn UpstreamClient>, config: &FeedgenConfig) -> FeedAssembler {
    let filter = RelevanceFilter::new(&config.relevance);
    tracing::debug!(policy = ?filter.policy(), "relevance.policy");

    FeedAssembler::new(
        upstream,
        filter,
        RequestGate::new(config.throttle),
        config.sources.clone(),
        config.assembler.clone(),
    )
}

pub fn app_state(upstream: Arc<dyn UpstreamClient>, config: &FeedgenConfig) -> AppState {
    AppState {
        assembler: Arc::new(assembler(upstream, config)),
        feed: Arc::new(config.feed.clone()),
        environment: EnvironmentStatus::from_config(config),
    }
}
