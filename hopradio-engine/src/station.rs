//! Station metadata poller.
//!
//! Periodically fetches the station info endpoint and forwards results
//! into the engine core as commands; the core decides what to publish.
//! Poll failures are logged and skipped, the poll cadence never stops.

use std::time::Duration;

use hopradio_common::StationStatus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::EngineCommand;
use crate::net::HttpFetcher;

pub(crate) fn spawn_poller(
    fetcher: HttpFetcher,
    url: String,
    interval: Duration,
    commands: mpsc::UnboundedSender<EngineCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(url, interval_secs = interval.as_secs_f64(), "station poller started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match fetcher.fetch_json::<StationStatus>(&url).await {
                Ok(status) => {
                    if commands.send(EngineCommand::Station(status)).is_err() {
                        // Engine gone, nothing left to do.
                        break;
                    }
                }
                Err(e) => debug!(error = %e, "station poll failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopradio_common::EventBus;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn poller_forwards_status_into_command_channel() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"listeners": 42})),
            )
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetcher = HttpFetcher::new(EventBus::new(4));
        let handle = spawn_poller(
            fetcher,
            format!("{}/status", server.uri()),
            Duration::from_millis(50),
            tx,
        );

        match rx.recv().await {
            Some(EngineCommand::Station(status)) => assert_eq!(status.listeners, 42),
            other => panic!("unexpected command {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn poll_failure_does_not_stop_the_cadence() {
        let server = MockServer::start().await;
        // First call 500s, later calls succeed.
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"listeners": 7})),
            )
            .mount(&server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetcher = HttpFetcher::new(EventBus::new(4));
        let handle = spawn_poller(
            fetcher,
            format!("{}/status", server.uri()),
            Duration::from_millis(20),
            tx,
        );

        match rx.recv().await {
            Some(EngineCommand::Station(status)) => assert_eq!(status.listeners, 7),
            other => panic!("unexpected command {other:?}"),
        }
        handle.abort();
    }
}
