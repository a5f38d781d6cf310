//! Keyword relevance filter.
//!
//! Matching is plain case-insensitive substring containment against fixed
//! keyword lists: no tokenization, stemming or ranking. Absent or empty text
//! is never relevant.
use serde::{Deserialize, Serialize};

/// Which combination of keyword lists makes a post relevant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevancePolicy {
    /// Any phrase from the flat topic list.
    AnyTopic,
    /// At least one health term and at least one identity term.
    HealthAndIdentity,
    /// A curated compound phrase, or [`RelevancePolicy::HealthAndIdentity`].
    #[default]
    Curated,
}

const DEFAULT_TOPICS: &[&str] = &[
    "mens health",
    "sexual health",
    "mental health",
    "prep",
    "hiv prevention",
    "wellness",
    "healthcare",
    "fitness",
    "nutrition",
    "mental wellness",
    "preventive care",
];

// "gym" and "fitness" are left out on purpose: they match far too much
// unrelated timeline chatter once paired with an identity term.
const DEFAULT_HEALTH_TERMS: &[&str] = &[
    "health",
    "clinic",
    "prep",
    "hiv",
    "doxypep",
    "mpox",
    "vaccine",
    "testing",
    "wellness",
    "therapy",
    "therapist",
    "nutrition",
    "preventive care",
];

const DEFAULT_IDENTITY_TERMS: &[&str] = &[
    "gay",
    "queer",
    "lgbt",
    "mlm",
    "msm",
    "bisexual",
    "men who have sex with men",
    "same-sex",
];

const DEFAULT_PHRASES: &[&str] = &[
    "gay men's health",
    "gay mens health",
    "gay health",
    "queer health",
    "lgbtq health",
    "lgbt health",
    "hiv prevention",
    "prep access",
    "doxypep",
    "mpox vaccine",
];

/// Optional overrides for the built-in keyword lists. `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub policy: RelevancePolicy,
    pub topics: Option<Vec<String>>,
    pub health_terms: Option<Vec<String>>,
    pub identity_terms: Option<Vec<String>>,
    pub phrases: Option<Vec<String>>,
}

/// What made a post relevant; useful in debug logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelevanceMatch<'a> {
    Topic(&'a str),
    Phrase(&'a str),
    HealthAndIdentity { health: &'a str, identity: &'a str },
}

#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    policy: RelevancePolicy,
    topics: Vec<String>,
    health_terms: Vec<String>,
    identity_terms: Vec<String>,
    phrases: Vec<String>,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self::new(&RelevanceConfig::default())
    }
}

impl RelevanceFilter {
    pub fn new(config: &RelevanceConfig) -> Self {
        Self {
            policy: config.policy,
            topics: keywords(config.topics.as_deref(), DEFAULT_TOPICS),
            health_terms: keywords(config.health_terms.as_deref(), DEFAULT_HEALTH_TERMS),
            identity_terms: keywords(config.identity_terms.as_deref(), DEFAULT_IDENTITY_TERMS),
            phrases: keywords(config.phrases.as_deref(), DEFAULT_PHRASES),
        }
    }

    pub fn policy(&self) -> RelevancePolicy {
        self.policy
    }

    /// ```
    /// use feedgen_feed::relevance::RelevanceFilter;
    ///
    /// let filter = RelevanceFilter::default();
    /// assert!(filter.is_relevant(Some("Great gay health clinic info")));
    /// assert!(!filter.is_relevant(Some("I went to the gym today")));
    /// assert!(!filter.is_relevant(None));
    /// ```
    pub fn is_relevant(&self, text: Option<&str>) -> bool {
        text.is_some_and(|t| self.find_match(t).is_some())
    }

    /// First rule that accepts `text` under the configured policy.
    pub fn find_match(&self, text: &str) -> Option<RelevanceMatch<'_>> {
        if text.trim().is_empty() {
            return None;
        }
        let haystack = text.to_lowercase();

        match self.policy {
            RelevancePolicy::AnyTopic => {
                first_in(&haystack, &self.topics).map(RelevanceMatch::Topic)
            }
            RelevancePolicy::HealthAndIdentity => self.health_and_identity(&haystack),
            RelevancePolicy::Curated => first_in(&haystack, &self.phrases)
                .map(RelevanceMatch::Phrase)
                .or_else(|| self.health_and_identity(&haystack)),
        }
    }

    fn health_and_identity(&self, haystack: &str) -> Option<RelevanceMatch<'_>> {
        let health = first_in(haystack, &self.health_terms)?;
        let identity = first_in(haystack, &self.identity_terms)?;
        Some(RelevanceMatch::HealthAndIdentity { health, identity })
    }
}

fn keywords(overrides: Option<&[String]>, defaults: &[&str]) -> Vec<String> {
    let raw: Vec<&str> = match overrides {
        Some(list) => list.iter().map(String::as_str).collect(),
        None => defaults.to_vec(),
    };
    raw.into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

fn first_in<'k>(haystack: &str, needles: &'k [String]) -> Option<&'k str> {
    needles
        .iter()
        .find(|n| haystack.contains(n.as_str()))
        .map(String::as_str)
}
