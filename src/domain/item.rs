use chrono::{DateTime, Utc};

/// A piece of user-submitted content as returned by the content source.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    pub body: String,
    /// Ordered as returned by the source; the first tag is the primary one.
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn primary_tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }
}

/// A relevant stream event, decoded from the feed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEvent {
    pub site: String,
    pub item_id: i64,
}
