//! Per-target probe loop.

use super::target::Report;
use super::Command;
use crate::probe::run_http_probe;

use chrono::Utc;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Handle to the background task probing one target.
pub(super) struct Poller {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Start probing `url` immediately, then once per `interval`.
    ///
    /// The poller only holds a weak handle to the owner's inbox, so it exits
    /// on its own once every `Checker` handle is gone.
    pub(super) fn spawn(
        name: String,
        url: String,
        interval: Duration,
        client: Client,
        tx: mpsc::WeakSender<Command>,
    ) -> Self {
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_probe_loop(name, url, interval, client, tx, stop_rx));
        Self { stop_tx, handle }
    }

    /// Ask the task to stop without waiting for it.
    pub(super) fn stop(self) {
        let _ = self.stop_tx.send(());
    }

    /// Ask the task to stop and wait until it has exited.
    pub(super) async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            tracing::warn!("Poller task ended abnormally: {}", e);
        }
    }
}

/// Run the probe loop for a single target.
///
/// Stop is observed while waiting for the tick, during the probe and while
/// handing the report to the owner, so a stopped poller never sends more
/// than the one report that may already be in flight.
async fn run_probe_loop(
    name: String,
    url: String,
    interval: Duration,
    client: Client,
    tx: mpsc::WeakSender<Command>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {}
        }

        let started = Utc::now();
        let result = tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            result = run_http_probe(&client, &url) => result,
        };

        let report = match result {
            Ok(()) => {
                tracing::debug!(service = %name, "Probe succeeded");
                Report::new(&name, started, None)
            }
            Err(e) => {
                tracing::info!(service = %name, url = %url, error = %e, "Probe failed");
                Report::new(&name, started, Some(e.to_string()))
            }
        };

        let Some(tx) = tx.upgrade() else {
            break;
        };
        tokio::select! {
            biased;
            _ = stop_rx.recv() => break,
            sent = tx.send(Command::Report(report)) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(service = %name, "Poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::build_client;
    use axum::{http::StatusCode, routing::get, Router};
    use chrono::TimeDelta;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn expect_report(cmd: Option<Command>) -> Report {
        match cmd {
            Some(Command::Report(r)) => r,
            _ => panic!("expected a report"),
        }
    }

    #[tokio::test]
    async fn test_first_probe_is_immediate() {
        let base = serve(Router::new().route("/", get(|| async { "OK" }))).await;
        let (tx, mut rx) = mpsc::channel(8);
        let client = build_client(Duration::from_secs(2)).unwrap();

        let poller = Poller::spawn(
            "a".into(),
            base,
            Duration::from_secs(60),
            client,
            tx.downgrade(),
        );

        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        let report = expect_report(report);
        assert_eq!(report.name, "a");
        assert!(report.is_success());

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_carries_status() {
        let base = serve(Router::new().route(
            "/",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let (tx, mut rx) = mpsc::channel(8);
        let client = build_client(Duration::from_secs(2)).unwrap();

        let poller = Poller::spawn(
            "a".into(),
            base,
            Duration::from_secs(60),
            client,
            tx.downgrade(),
        );

        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        let report = expect_report(report);
        assert_eq!(report.error.as_deref(), Some("Status 503"));

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_reports_after_shutdown() {
        let base = serve(Router::new().route("/", get(|| async { "OK" }))).await;
        let (tx, mut rx) = mpsc::channel(64);
        let client = build_client(Duration::from_millis(40)).unwrap();

        let poller = Poller::spawn(
            "a".into(),
            base,
            Duration::from_millis(50),
            client,
            tx.downgrade(),
        );
        let _ = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();

        poller.shutdown().await;
        while rx.try_recv().is_ok() {}

        // With the task gone, dropping our sender closes the channel
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_exits_when_inbox_is_dropped() {
        let base = serve(Router::new().route("/", get(|| async { "OK" }))).await;
        let (tx, mut rx) = mpsc::channel(64);
        let client = build_client(Duration::from_millis(40)).unwrap();

        let poller = Poller::spawn(
            "a".into(),
            base,
            Duration::from_millis(50),
            client,
            tx.downgrade(),
        );
        let _ = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), poller.handle)
            .await
            .expect("poller kept running without an inbox")
            .unwrap();
    }

    #[tokio::test]
    async fn test_report_time_is_taken_before_the_request() {
        let base = serve(Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "OK"
            }),
        ))
        .await;
        let (tx, mut rx) = mpsc::channel(8);
        let client = build_client(Duration::from_secs(2)).unwrap();

        let before = Utc::now();
        let poller = Poller::spawn(
            "a".into(),
            base,
            Duration::from_secs(60),
            client,
            tx.downgrade(),
        );

        let report = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        let received = Utc::now();
        let report = expect_report(report);

        assert!(report.is_success());
        assert!(report.time >= before);
        assert!(report.time < before + TimeDelta::milliseconds(200));
        assert!(received >= before + TimeDelta::milliseconds(300));

        poller.shutdown().await;
    }
}
