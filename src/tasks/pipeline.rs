use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    classifier::{Classifier, Evaluation},
    domain::{CandidateEvent, ContentItem, PipelineSnapshot, SubscriberRegistry},
    infrastructure::notifier::{escape_html, NotificationSink},
    source::{ContentSource, FetchError},
    tasks::throttle::ReportThrottle,
};

const UNTAGGED: &str = "tagless";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    NotFound,
    FetchFailed,
    Stale,
    NotBad,
    AlreadyReported,
    Reported,
    DeliveryFailed,
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub item: ContentItem,
    pub evaluation: Evaluation,
    pub stale: bool,
}

#[derive(Debug, Clone)]
pub struct ReportFormat {
    pub prefix: String,
    pub item_url_base: String,
}

impl ReportFormat {
    pub fn permalink(&self, item_id: i64) -> String {
        format!("{}/{}", self.item_url_base.trim_end_matches('/'), item_id)
    }

    pub fn render(&self, item: &ContentItem) -> String {
        format!(
            "{} [tag:{}] Potentially bad question: <a href=\"{}\">{}</a>",
            self.prefix,
            escape_html(item.primary_tag().unwrap_or(UNTAGGED)),
            self.permalink(item.id),
            escape_html(&item.title)
        )
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    not_found: AtomicU64,
    fetch_failed: AtomicU64,
    stale: AtomicU64,
    classified_bad: AtomicU64,
    duplicates: AtomicU64,
    reported: AtomicU64,
    delivery_failed: AtomicU64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            received: self.received.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            fetch_failed: self.fetch_failed.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            classified_bad: self.classified_bad.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            reported: self.reported.load(Ordering::Relaxed),
            delivery_failed: self.delivery_failed.load(Ordering::Relaxed),
        }
    }
}

/// Fetch, filter, classify, throttle and notify for one candidate event.
pub struct ClassificationPipeline {
    source: Arc<dyn ContentSource>,
    classifier: Arc<Classifier>,
    throttle: Arc<ReportThrottle>,
    notifier: Arc<dyn NotificationSink>,
    subscribers: SubscriberRegistry,
    format: ReportFormat,
    recency_window: chrono::Duration,
    stats: PipelineStats,
}

impl ClassificationPipeline {
    pub fn new(
        source: Arc<dyn ContentSource>,
        classifier: Arc<Classifier>,
        throttle: Arc<ReportThrottle>,
        notifier: Arc<dyn NotificationSink>,
        subscribers: SubscriberRegistry,
        format: ReportFormat,
        recency_window: Duration,
    ) -> Self {
        Self {
            source,
            classifier,
            throttle,
            notifier,
            subscribers,
            format,
            recency_window: chrono::Duration::from_std(recency_window)
                .unwrap_or(chrono::Duration::MAX),
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineSnapshot {
        self.stats.snapshot()
    }

    pub async fn handle(&self, event: CandidateEvent) -> HandleOutcome {
        self.handle_at(event, Utc::now()).await
    }

    pub async fn handle_at(&self, event: CandidateEvent, now: DateTime<Utc>) -> HandleOutcome {
        PipelineStats::bump(&self.stats.received);
        let item_id = event.item_id;

        let CheckOutcome {
            item,
            evaluation,
            stale,
        } = match self.check(item_id).await {
            Ok(outcome) => outcome,
            Err(FetchError::NotFound) => {
                tracing::debug!(target: "pipeline", item_id, "item vanished before fetch");
                PipelineStats::bump(&self.stats.not_found);
                return HandleOutcome::NotFound;
            }
            Err(err) => {
                tracing::error!(
                    target: "pipeline",
                    item_id,
                    site = %event.site,
                    error = %err,
                    "failed to fetch item"
                );
                PipelineStats::bump(&self.stats.fetch_failed);
                return HandleOutcome::FetchFailed;
            }
        };

        if stale {
            tracing::trace!(target: "pipeline", item_id, "skipping bumped old item");
            PipelineStats::bump(&self.stats.stale);
            return HandleOutcome::Stale;
        }

        if !evaluation.bad {
            return HandleOutcome::NotBad;
        }
        PipelineStats::bump(&self.stats.classified_bad);
        tracing::debug!(
            target: "classifier",
            item_id,
            p_bad = evaluation.p_bad,
            p_good = evaluation.p_good,
            matched = evaluation.matched_tokens.len(),
            "item classified as bad"
        );

        if self.throttle.report(item.id, now) {
            PipelineStats::bump(&self.stats.duplicates);
            return HandleOutcome::AlreadyReported;
        }

        tracing::debug!(
            target: "throttle",
            item_id,
            tracked = self.throttle.live_records(),
            "report recorded"
        );

        let message = self.format.render(&item);
        let audience = self.subscribers.audience_for(&item.tags);
        tracing::info!(
            target: "pipeline",
            item_id,
            tag = item.primary_tag().unwrap_or(UNTAGGED),
            audience = audience.len(),
            "reporting item"
        );

        match self.notifier.notify(&message, &audience).await {
            Ok(()) => {
                PipelineStats::bump(&self.stats.reported);
                HandleOutcome::Reported
            }
            Err(err) => {
                tracing::warn!(target: "notify", item_id, error = %err, "failed to deliver report");
                PipelineStats::bump(&self.stats.delivery_failed);
                HandleOutcome::DeliveryFailed
            }
        }
    }

    /// Fetches and classifies one item without throttling or notifying.
    pub async fn check(&self, item_id: i64) -> Result<CheckOutcome, FetchError> {
        let item = self.source.fetch_item(item_id).await?;
        let evaluation = self.classifier.score(&item);
        let stale = self.is_stale(&item);
        Ok(CheckOutcome {
            item,
            evaluation,
            stale,
        })
    }

    fn is_stale(&self, item: &ContentItem) -> bool {
        item.last_activity_at - item.created_at > self.recency_window
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    use super::*;
    use crate::{classifier::ClassifierModel, config::SubscriberEntry};

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[derive(Default)]
    struct FakeSource {
        items: HashMap<i64, ContentItem>,
        broken: Vec<i64>,
    }

    #[async_trait]
    impl ContentSource for FakeSource {
        async fn fetch_item(&self, item_id: i64) -> Result<ContentItem, FetchError> {
            if self.broken.contains(&item_id) {
                return Err(FetchError::Malformed("boom".into()));
            }
            self.items.get(&item_id).cloned().ok_or(FetchError::NotFound)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<(String, Vec<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, message: &str, audience: &[String]) -> Result<()> {
            if self.fail {
                return Err(anyhow!("chat unavailable"));
            }
            self.messages
                .lock()
                .push((message.to_string(), audience.to_vec()));
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn item(id: i64, body: &str, tags: &[&str], activity_after: chrono::Duration) -> ContentItem {
        ContentItem {
            id,
            title: format!("Question <{id}>"),
            body: body.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: t0(),
            last_activity_at: t0() + activity_after,
        }
    }

    fn event(item_id: i64) -> CandidateEvent {
        CandidateEvent {
            site: "stackoverflow".into(),
            item_id,
        }
    }

    fn pipeline(source: FakeSource, sink: Arc<RecordingSink>) -> ClassificationPipeline {
        let model = ClassifierModel::from_entries(
            0.263,
            [("plz", 0.9, 0.01), ("benchmark", 1e-12, 0.9)],
        );
        ClassificationPipeline::new(
            Arc::new(source),
            Arc::new(Classifier::new(model, 1e45)),
            Arc::new(ReportThrottle::new(6 * HOUR)),
            sink,
            SubscriberRegistry::new(vec![
                SubscriberEntry {
                    handle: "alice".into(),
                    tags: vec!["python".into()],
                },
                SubscriberEntry {
                    handle: "bob".into(),
                    tags: vec!["java".into()],
                },
            ]),
            ReportFormat {
                prefix: "[ test ]".into(),
                item_url_base: "https://stackoverflow.com/q/".into(),
            },
            24 * HOUR,
        )
    }

    fn source_with(items: Vec<ContentItem>) -> FakeSource {
        FakeSource {
            items: items.into_iter().map(|i| (i.id, i)).collect(),
            broken: vec![],
        }
    }

    #[tokio::test]
    async fn bad_item_is_reported_once_per_window() {
        let sink = Arc::new(RecordingSink::default());
        let source = source_with(vec![item(
            10,
            "<p>plz give code plz</p>",
            &["python", "pandas"],
            chrono::Duration::minutes(30),
        )]);
        let pipeline = pipeline(source, sink.clone());

        let first = pipeline.handle_at(event(10), t0() + chrono::Duration::hours(1)).await;
        assert_eq!(first, HandleOutcome::Reported);
        let dup = pipeline.handle_at(event(10), t0() + chrono::Duration::hours(2)).await;
        assert_eq!(dup, HandleOutcome::AlreadyReported);
        let later = pipeline.handle_at(event(10), t0() + chrono::Duration::hours(8)).await;
        assert_eq!(later, HandleOutcome::Reported);

        let messages = sink.messages.lock();
        assert_eq!(messages.len(), 2);
        let (text, audience) = &messages[0];
        assert_eq!(
            text,
            "[ test ] [tag:python] Potentially bad question: \
             <a href=\"https://stackoverflow.com/q/10\">Question &lt;10&gt;</a>"
        );
        assert_eq!(audience, &vec!["alice".to_string()]);

        let stats = pipeline.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.reported, 2);
        assert_eq!(stats.duplicates, 1);
    }

    #[tokio::test]
    async fn old_bumped_items_are_skipped() {
        let sink = Arc::new(RecordingSink::default());
        let source = source_with(vec![item(11, "plz", &["java"], chrono::Duration::hours(25))]);
        let pipeline = pipeline(source, sink.clone());

        assert_eq!(pipeline.handle_at(event(11), t0()).await, HandleOutcome::Stale);
        assert!(sink.messages.lock().is_empty());
        assert_eq!(pipeline.throttle.live_records(), 0);
    }

    #[tokio::test]
    async fn good_items_never_touch_the_throttle() {
        let sink = Arc::new(RecordingSink::default());
        let body = "benchmark ".repeat(5);
        let source = source_with(vec![item(12, &body, &["rust"], chrono::Duration::zero())]);
        let pipeline = pipeline(source, sink.clone());

        assert_eq!(pipeline.handle_at(event(12), t0()).await, HandleOutcome::NotBad);
        assert_eq!(pipeline.throttle.live_records(), 0);
        assert!(sink.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_and_failing_fetches_are_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let source = FakeSource {
            items: HashMap::new(),
            broken: vec![14],
        };
        let pipeline = pipeline(source, sink.clone());

        assert_eq!(pipeline.handle_at(event(13), t0()).await, HandleOutcome::NotFound);
        assert_eq!(pipeline.handle_at(event(14), t0()).await, HandleOutcome::FetchFailed);
        assert!(sink.messages.lock().is_empty());
        let stats = pipeline.stats();
        assert_eq!((stats.not_found, stats.fetch_failed), (1, 1));
    }

    #[tokio::test]
    async fn untagged_items_use_fallback_marker_and_wildcard_audience_only() {
        let sink = Arc::new(RecordingSink::default());
        let source = source_with(vec![item(15, "plz", &[], chrono::Duration::zero())]);
        let pipeline = pipeline(source, sink.clone());

        assert_eq!(pipeline.handle_at(event(15), t0()).await, HandleOutcome::Reported);
        let messages = sink.messages.lock();
        assert!(messages[0].0.contains("[tag:tagless]"));
        assert!(messages[0].1.is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_still_marks_item_reported() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let source = source_with(vec![item(16, "plz", &["c"], chrono::Duration::zero())]);
        let pipeline = pipeline(source, sink.clone());

        assert_eq!(pipeline.handle_at(event(16), t0()).await, HandleOutcome::DeliveryFailed);
        assert_eq!(pipeline.handle_at(event(16), t0()).await, HandleOutcome::AlreadyReported);
    }

    #[tokio::test]
    async fn check_reports_evaluation_without_side_effects() {
        let sink = Arc::new(RecordingSink::default());
        let source = source_with(vec![item(17, "plz plz", &["go"], chrono::Duration::hours(30))]);
        let pipeline = pipeline(source, sink.clone());

        let outcome = pipeline.check(17).await.unwrap();
        assert!(outcome.evaluation.bad);
        assert!(outcome.stale);
        assert_eq!(outcome.evaluation.matched_tokens, vec!["plz", "plz"]);
        assert_eq!(pipeline.throttle.live_records(), 0);
        assert!(sink.messages.lock().is_empty());
        assert!(matches!(pipeline.check(99).await, Err(FetchError::NotFound)));
    }

    #[tokio::test]
    async fn handle_acts_on_the_check_verdict() {
        let sink = Arc::new(RecordingSink::default());
        let good = "benchmark ".repeat(5);
        let source = source_with(vec![
            item(18, "plz", &["go"], chrono::Duration::zero()),
            item(19, &good, &["go"], chrono::Duration::zero()),
        ]);
        let pipeline = pipeline(source, sink.clone());

        assert!(pipeline.check(18).await.unwrap().evaluation.bad);
        assert_eq!(pipeline.handle_at(event(18), t0()).await, HandleOutcome::Reported);
        assert!(!pipeline.check(19).await.unwrap().evaluation.bad);
        assert_eq!(pipeline.handle_at(event(19), t0()).await, HandleOutcome::NotBad);

        assert_eq!(pipeline.throttle.live_records(), 1);
        assert_eq!(pipeline.stats().classified_bad, 1);
    }
}
