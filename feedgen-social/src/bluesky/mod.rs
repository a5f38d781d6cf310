//! Bluesky (AT Protocol) XRPC surface.
//!
//! `client` wraps the shared HTTP client with the endpoint paths and parameter
//! shaping; `types` holds the lenient response models. Pagination cursors are
//! returned untouched to callers.
pub mod client;
pub mod types;

pub use client::{BSKY_SERVICE, BskyApi};
pub use types::{FeedPage, FeedViewPost, PostView, SearchPage, Session};
