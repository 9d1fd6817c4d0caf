use std::{sync::Arc, time::Duration};

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{sync::mpsc, time::sleep};

use crate::{
    config::StreamConfig,
    domain::{CandidateEvent, ConnectionState},
    infrastructure::{notifier::NotificationSink, shutdown::ShutdownListener},
};

use super::{
    decoder::{Decoded, EventDecoder},
    transport::{Connector, Frame, StreamTransport, TransportError},
};

const HEARTBEAT_REPLY: &str = "hb";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream could not be re-established after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Operator-facing message sent once when the stream gives up.
#[derive(Debug, Clone)]
pub struct FatalAlert {
    pub prefix: String,
    pub operator_handle: Option<String>,
    pub timezone: Tz,
}

impl FatalAlert {
    fn render(&self, attempts: u32) -> String {
        let ts = Utc::now().with_timezone(&self.timezone).format("%Y-%m-%d %H:%M:%S %Z");
        format!(
            "{} Realtime questions stream died at {ts}; failed to reconnect after {attempts} attempts. \
             Active posts will not be reported until manual intervention.",
            self.prefix
        )
    }

    fn audience(&self) -> Vec<String> {
        self.operator_handle.iter().cloned().collect()
    }
}

enum SessionEnd {
    Stopped,
    Closed,
    Failed(TransportError),
}

/// Owns the feed subscription and its reconnect policy.
pub struct StreamConnection {
    connector: Arc<dyn Connector>,
    decoder: EventDecoder,
    notifier: Arc<dyn NotificationSink>,
    alert: FatalAlert,
    channel: String,
    max_retries: u32,
    backoff: ExponentialBuilder,
    backoff_max: Duration,
    state: Mutex<ConnectionState>,
}

impl StreamConnection {
    pub fn new(
        connector: Arc<dyn Connector>,
        decoder: EventDecoder,
        notifier: Arc<dyn NotificationSink>,
        alert: FatalAlert,
        config: &StreamConfig,
    ) -> Self {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(config.backoff_min)
            .with_max_delay(config.backoff_max)
            .with_max_times(config.max_retries as usize)
            .with_jitter();
        Self {
            connector,
            decoder,
            notifier,
            alert,
            channel: config.channel.clone(),
            max_retries: config.max_retries,
            backoff,
            backoff_max: config.backoff_max,
            state: Mutex::new(ConnectionState::Idle),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Runs until shutdown (`Ok`, terminal state `Idle`) or until the retry
    /// bound is exhausted (`Err`, terminal state `Failed`). Relevant events
    /// are forwarded on `events` without waiting on their consumer.
    pub async fn run(
        &self,
        events: mpsc::UnboundedSender<CandidateEvent>,
        mut shutdown: ShutdownListener,
    ) -> Result<(), StreamError> {
        let mut failures: u32 = 0;
        let mut backoff = self.backoff.build();

        loop {
            if shutdown.is_triggered() {
                break;
            }

            self.transition(ConnectionState::Connecting);
            let connected = tokio::select! {
                res = self.connector.connect() => res,
                _ = shutdown.notified() => break,
            };

            match connected {
                Ok(mut transport) => {
                    failures = 0;
                    backoff = self.backoff.build();
                    self.transition(ConnectionState::Open);

                    match self.pump(transport.as_mut(), &events, &mut shutdown).await {
                        SessionEnd::Stopped => {
                            transport.close().await;
                            break;
                        }
                        SessionEnd::Closed => {
                            tracing::warn!(target: "stream", "stream closed by peer");
                            self.transition(ConnectionState::Closed);
                        }
                        SessionEnd::Failed(err) => {
                            tracing::warn!(target: "stream", error = %err, "stream transport error");
                            transport.close().await;
                            self.transition(ConnectionState::Failed);
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(
                        target: "stream",
                        attempt = failures,
                        max_attempts = self.max_retries,
                        error = %err,
                        "stream connect failed"
                    );
                    self.transition(ConnectionState::Failed);

                    if failures >= self.max_retries {
                        return Err(self.give_up(failures).await);
                    }
                }
            }

            if shutdown.is_triggered() {
                break;
            }
            let delay = backoff.next().unwrap_or(self.backoff_max);
            tracing::info!(target: "stream", delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.notified() => break,
            }
        }

        self.transition(ConnectionState::Idle);
        tracing::info!(target: "stream", "stream stopped");
        Ok(())
    }

    async fn pump(
        &self,
        transport: &mut dyn StreamTransport,
        events: &mpsc::UnboundedSender<CandidateEvent>,
        shutdown: &mut ShutdownListener,
    ) -> SessionEnd {
        if let Err(err) = transport.send_text(&self.channel).await {
            return SessionEnd::Failed(err);
        }
        tracing::info!(target: "stream", channel = %self.channel, "listening to active questions");

        loop {
            let frame = tokio::select! {
                frame = transport.next_frame() => frame,
                _ = shutdown.notified() => return SessionEnd::Stopped,
            };

            let decoded = match frame {
                None | Some(Ok(Frame::Close)) => return SessionEnd::Closed,
                Some(Err(err)) => return SessionEnd::Failed(err),
                Some(Ok(Frame::Text(text))) => self.decoder.decode_text(&text),
                Some(Ok(Frame::Binary(bytes))) => self.decoder.decode(&bytes),
            };

            match decoded {
                Ok(Decoded::Candidate(event)) => {
                    tracing::debug!(target: "decoder", item_id = event.item_id, "candidate event");
                    if events.send(event).is_err() {
                        tracing::warn!(target: "stream", "event consumer is gone; stopping");
                        return SessionEnd::Stopped;
                    }
                }
                Ok(Decoded::Irrelevant { site }) => {
                    tracing::trace!(target: "decoder", %site, "ignoring event for other site");
                }
                Ok(Decoded::Heartbeat) => {
                    if let Err(err) = transport.send_text(HEARTBEAT_REPLY).await {
                        return SessionEnd::Failed(err);
                    }
                }
                Err(err) => {
                    tracing::warn!(target: "decoder", error = %err, "dropping undecodable frame");
                }
            }
        }
    }

    async fn give_up(&self, attempts: u32) -> StreamError {
        tracing::error!(
            target: "stream",
            attempts,
            "stream died; will not recover without manual intervention"
        );
        let message = self.alert.render(attempts);
        if let Err(err) = self.notifier.notify(&message, &self.alert.audience()).await {
            tracing::error!(target: "notify", error = %err, "failed to deliver stream death alert");
        }
        StreamError::Exhausted { attempts }
    }

    fn transition(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        let previous = *state;
        if previous != next {
            tracing::debug!(target: "stream", from = %previous, to = %next, "connection state");
            *state = next;
        }
    }
}
