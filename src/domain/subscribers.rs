use crate::config::SubscriberEntry;

/// Handles to mention on reports, each optionally limited to a tag set.
#[derive(Debug, Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Vec<SubscriberEntry>,
}

impl SubscriberRegistry {
    pub fn new(subscribers: Vec<SubscriberEntry>) -> Self {
        Self { subscribers }
    }

    /// Subscribers with no tag filter match every item.
    pub fn audience_for(&self, tags: &[String]) -> Vec<String> {
        let mut audience: Vec<String> = Vec::new();
        for sub in &self.subscribers {
            let interested = sub.tags.is_empty()
                || tags
                    .iter()
                    .any(|tag| sub.tags.iter().any(|wanted| wanted.eq_ignore_ascii_case(tag)));
            if interested && !audience.contains(&sub.handle) {
                audience.push(sub.handle.clone());
            }
        }
        audience
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }
}
