use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Semaphore},
    task::{JoinHandle, JoinSet},
    time::timeout,
};

use crate::{
    domain::CandidateEvent, infrastructure::shutdown::ShutdownListener,
    tasks::pipeline::ClassificationPipeline,
};

/// Fans stream events out to pipeline tasks, at most `concurrency` at a time.
pub struct Dispatcher {
    pipeline: Arc<ClassificationPipeline>,
    permits: Arc<Semaphore>,
    grace: Duration,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<ClassificationPipeline>, concurrency: usize, grace: Duration) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            grace,
        }
    }

    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<CandidateEvent>,
        shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(events, shutdown).await })
    }

    async fn run_loop(
        self,
        mut events: mpsc::UnboundedReceiver<CandidateEvent>,
        mut shutdown: ShutdownListener,
    ) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let pipeline = self.pipeline.clone();
                    let permits = self.permits.clone();
                    tasks.spawn(async move {
                        let Ok(_permit) = permits.acquire_owned().await else {
                            return;
                        };
                        pipeline.handle(event).await;
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join(joined);
                }
                _ = shutdown.notified() => break,
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            tracing::info!(target: "pipeline", in_flight, "waiting for in-flight classifications");
        }
        let drained = timeout(self.grace, async {
            while let Some(joined) = tasks.join_next().await {
                log_join(joined);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                target: "pipeline",
                remaining = tasks.len(),
                "classifications did not finish within {:?}; aborting",
                self.grace
            );
            tasks.abort_all();
        }

        let stats = self.pipeline.stats();
        tracing::info!(target: "pipeline", ?stats, "dispatcher stopped");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            tracing::error!(target: "pipeline", error = %err, "classification task panicked");
        }
    }
}
