//! Social network clients used by the feed generator.
//!
//! Only Bluesky is implemented: session creation plus the three read
//! endpoints (home timeline, author feed, post search) whose pages feed the
//! relevance pipeline.
pub mod bluesky;
