use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;
use teloxide::Bot;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    classifier::{Classifier, ClassifierModel},
    config::AppConfig,
    domain::{CandidateEvent, SubscriberRegistry},
    infrastructure::{
        directories::ResolvedPaths,
        notifier::{LogNotifier, NotificationSink, TelegramNotifier},
        shutdown::{Shutdown, ShutdownReason},
    },
    source::StackExchangeSource,
    stream::{EventDecoder, FatalAlert, StreamConnection, WebSocketConnector},
    tasks::{
        dispatcher::Dispatcher,
        pipeline::{ClassificationPipeline, ReportFormat},
        throttle::ReportThrottle,
    },
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct SentinelApp {
    connection: StreamConnection,
    events: mpsc::UnboundedSender<CandidateEvent>,
    dispatcher_handle: JoinHandle<()>,
    notifier: Arc<dyn NotificationSink>,
    shutdown: Shutdown,
    config: Arc<AppConfig>,
}

impl SentinelApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let config = Arc::new(config);

        let model = ClassifierModel::load(&paths.model_path, config.classifier.prior)
            .with_context(|| format!("failed to load model {}", paths.model_path.display()))?;
        if model.is_empty() {
            tracing::warn!(
                target: "classifier",
                "model has no tokens; every item will be judged on the prior alone"
            );
        }
        tracing::info!(
            target: "classifier",
            tokens = model.len(),
            prior = config.classifier.prior,
            threshold = config.classifier.threshold,
            data_dir = %paths.data_dir.display(),
            "classifier model loaded"
        );
        let classifier = Arc::new(Classifier::new(model, config.classifier.threshold));
        install_reload_handler(classifier.clone(), paths.model_path.clone(), config.classifier.prior);

        let http_client = Client::builder()
            .user_agent(format!("lq-sentinel/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;
        let source = Arc::new(StackExchangeSource::new(
            http_client,
            config.source.clone(),
            config.stream.target_site.clone(),
        ));

        let notifier = build_notifier(config.as_ref());
        let subscribers = SubscriberRegistry::new(config.notifier.subscribers.clone());
        tracing::info!(target: "notify", subscribers = subscribers.len(), "subscribers loaded");

        let pipeline = Arc::new(ClassificationPipeline::new(
            source,
            classifier,
            Arc::new(ReportThrottle::new(config.throttle.window)),
            notifier.clone(),
            subscribers,
            ReportFormat {
                prefix: config.notifier.report_prefix.clone(),
                item_url_base: config.source.item_url_base.clone(),
            },
            config.pipeline.recency_window,
        ));

        let (events, events_rx) = mpsc::unbounded_channel();
        let dispatcher_handle =
            Dispatcher::new(pipeline, config.pipeline.concurrency, SHUTDOWN_GRACE)
                .spawn(events_rx, shutdown.subscribe());

        let alert = FatalAlert {
            prefix: config.notifier.report_prefix.clone(),
            operator_handle: config.notifier.operator_handle.clone(),
            timezone: config.timezone,
        };
        let connection = StreamConnection::new(
            Arc::new(WebSocketConnector::new(config.stream.url.clone())),
            EventDecoder::new(config.stream.target_site.clone()),
            notifier.clone(),
            alert,
            &config.stream,
        );

        Ok(Self {
            connection,
            events,
            dispatcher_handle,
            notifier,
            shutdown,
            config,
        })
    }

    pub async fn run(self) -> Result<()> {
        let SentinelApp {
            connection,
            events,
            mut dispatcher_handle,
            notifier,
            shutdown,
            config,
        } = self;

        tracing::info!(
            target: "lifecycle",
            site = %config.stream.target_site,
            url = %config.stream.url,
            "lq-sentinel starting"
        );
        announce(notifier.as_ref(), config.as_ref(), "Monitoring started.").await;

        match connection.run(events, shutdown.subscribe()).await {
            Ok(()) => tracing::info!(
                target: "lifecycle",
                state = %connection.state(),
                "stream stopped on request"
            ),
            Err(err) => {
                tracing::error!(
                    target: "lifecycle",
                    state = %connection.state(),
                    error = %err,
                    "stream gave up"
                );
                shutdown.trigger_with(ShutdownReason::StreamDied);
            }
        }
        shutdown.trigger();

        let dispatcher_sleep = tokio::time::sleep(SHUTDOWN_GRACE * 2);
        tokio::pin!(dispatcher_sleep);
        tokio::select! {
            res = &mut dispatcher_handle => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!(target: "lifecycle", "dispatcher task panicked");
                    }
                }
            }
            _ = &mut dispatcher_sleep => {
                tracing::warn!(
                    target: "lifecycle",
                    "dispatcher did not stop within {:?}; aborting",
                    SHUTDOWN_GRACE * 2
                );
                dispatcher_handle.abort();
            }
        }

        let reason = shutdown
            .subscribe()
            .reason()
            .unwrap_or(ShutdownReason::Signal);
        tracing::info!(target: "lifecycle", %reason, "lq-sentinel stopped");
        announce(
            notifier.as_ref(),
            config.as_ref(),
            &format!("Monitoring stopped ({reason})."),
        )
        .await;
        Ok(())
    }
}

/// Re-reads the model file on SIGHUP and swaps it in whole.
fn install_reload_handler(classifier: Arc<Classifier>, model_path: PathBuf, prior: f64) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        tokio::spawn(async move {
            let Ok(mut sig) = signal(SignalKind::hangup()) else {
                return;
            };
            while sig.recv().await.is_some() {
                match ClassifierModel::load(&model_path, prior) {
                    Ok(model) => classifier.reload(model),
                    Err(err) => tracing::error!(
                        target: "classifier",
                        error = %err,
                        path = %model_path.display(),
                        "model reload failed; keeping current table"
                    ),
                }
            }
        });
    }
    #[cfg(not(unix))]
    {
        let _ = (classifier, model_path, prior);
    }
}

fn build_notifier(config: &AppConfig) -> Arc<dyn NotificationSink> {
    match (&config.notifier.telegram_bot_token, config.notifier.report_chat_id) {
        (Some(token), Some(chat_id)) => {
            tracing::info!(target: "notify", chat_id, "reporting to telegram");
            Arc::new(TelegramNotifier::new(Bot::new(token), chat_id))
        }
        _ => {
            tracing::info!(target: "notify", "no telegram chat configured; reporting to the log");
            Arc::new(LogNotifier)
        }
    }
}

async fn announce(notifier: &dyn NotificationSink, config: &AppConfig, text: &str) {
    let message = format!("{} {}", config.notifier.report_prefix, text);
    if let Err(err) = notifier.notify(&message, &[]).await {
        tracing::warn!(target: "notify", error = %err, "failed to send lifecycle notice");
    }
}
