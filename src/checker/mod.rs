//! Health aggregation engine.
//!
//! A single owner task holds every target and every counter. Membership
//! changes, poller reports and queries all arrive on one bounded channel and
//! are applied in arrival order, so no lock guards the hot state. Queries
//! carry a closure plus a one-shot reply channel and are answered inline
//! during the owner's turn.
//!
//! The channel is bounded: when it is full, `add`, `delete` and pollers wait
//! for room instead of dropping messages, which keeps FIFO order between
//! membership changes and reports.

mod poller;
mod target;

pub use target::{Report, TargetUpdate, Thresholds, Transition};

use crate::probe::{build_client, ProbeError};
use poller::Poller;
use target::Fleet;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Capacity of the owner's inbound channel.
const COMMAND_BUFFER: usize = 1024;

/// Lowercase alphanumeric, `-` and `.` inside, 3 to 63 characters.
const CLUSTER_ID_PATTERN: &str = r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$";

/// Hook invoked by the owner after every applied report.
pub type UpdateObserver = Arc<dyn Fn(&TargetUpdate) + Send + Sync>;

/// Checker error types.
#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("cluster ID {0:?} must be a lowercase alphanumeric string of 3 to 63 characters, optionally separated by '-' or '.'")]
    InvalidClusterId(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to build probe client: {0}")]
    Client(#[from] ProbeError),
    #[error("checker is not running")]
    Stopped,
}

/// Startup settings for the checker.
#[derive(Clone)]
pub struct CheckerConfig {
    pub cluster_id: String,
    /// Time between two probes of the same target.
    pub interval: Duration,
    /// Consecutive successes needed to mark a target healthy.
    pub success_threshold: u32,
    /// Consecutive failures needed to mark a target unhealthy.
    pub failure_threshold: u32,
    /// Minimum percentage of healthy active targets for a healthy cluster.
    pub state_threshold: u32,
    pub observer: Option<UpdateObserver>,
}

impl CheckerConfig {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            interval: Duration::from_secs(60),
            success_threshold: 1,
            failure_threshold: 2,
            state_threshold: 100,
            observer: None,
        }
    }

    #[cfg(test)]
    pub fn with_observer(mut self, observer: UpdateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    fn validate(&self) -> Result<(), CheckerError> {
        validate_cluster_id(&self.cluster_id)?;

        if self.interval.is_zero() {
            return Err(CheckerError::InvalidConfig(
                "interval must be greater than zero".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(CheckerError::InvalidConfig(
                "success threshold must be at least 1".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(CheckerError::InvalidConfig(
                "failure threshold must be at least 1".to_string(),
            ));
        }
        if self.state_threshold > 100 {
            return Err(CheckerError::InvalidConfig(format!(
                "state threshold {} is not a percentage",
                self.state_threshold
            )));
        }
        Ok(())
    }
}

/// Aggregate part of a [`ClusterState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub name: String,
    pub healthy: bool,
    /// Targets that have produced at least one report.
    pub total: usize,
    pub failed: usize,
}

/// Health verdict of one active target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub healthy: bool,
}

/// Point-in-time snapshot of the whole fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterState {
    pub cluster: ClusterSummary,
    pub services: Vec<ServiceHealth>,
}

/// Everything known about one target, active or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDetails {
    pub name: String,
    pub url: String,
    /// Signed run counter: positive successes, negative failures.
    pub state: i64,
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

type Query = Box<dyn FnOnce(&Owner) + Send>;

enum Command {
    Add { name: String, url: String },
    Delete { name: String },
    Report(Report),
    Query(Query),
    Stop(oneshot::Sender<()>),
}

/// Handle to a running checker. Cheap to clone.
#[derive(Clone)]
pub struct Checker {
    tx: mpsc::Sender<Command>,
}

impl Checker {
    /// Validate the configuration and start the owner task.
    ///
    /// This is the only place where an error is returned synchronously;
    /// nothing is started when validation fails.
    pub fn run(config: CheckerConfig) -> Result<Self, CheckerError> {
        config.validate()?;

        let client = build_client(calc_timeout(config.interval))?;
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

        let owner = Owner {
            cluster_id: config.cluster_id,
            interval: config.interval,
            client,
            fleet: Fleet::new(
                Thresholds {
                    success: config.success_threshold,
                    failure: config.failure_threshold,
                },
                config.state_threshold,
            ),
            pollers: HashMap::new(),
            observer: config.observer,
            tx: tx.downgrade(),
            ready: false,
            healthy: true,
        };
        tokio::spawn(owner.run(rx));

        Ok(Self { tx })
    }

    /// Start monitoring `url` under `name`.
    ///
    /// Empty arguments and duplicate names are logged and ignored.
    pub async fn add(&self, name: &str, url: &str) {
        if name.is_empty() || url.is_empty() {
            tracing::warn!(
                name = %name,
                url = %url,
                "Attempt to add target with empty name or url"
            );
            return;
        }
        let cmd = Command::Add {
            name: name.to_string(),
            url: url.to_string(),
        };
        if self.tx.send(cmd).await.is_err() {
            tracing::warn!("Checker stopped, dropping add of {}", name);
        }
    }

    /// Stop monitoring `name`. Unknown names are logged and ignored.
    pub async fn delete(&self, name: &str) {
        if name.is_empty() {
            tracing::warn!("Attempt to delete target with empty name");
            return;
        }
        let cmd = Command::Delete {
            name: name.to_string(),
        };
        if self.tx.send(cmd).await.is_err() {
            tracing::warn!("Checker stopped, dropping delete of {}", name);
        }
    }

    /// Snapshot of the cluster as of the moment the owner serves the query.
    pub async fn state(&self) -> Result<ClusterState, CheckerError> {
        self.ask(|owner| owner.fleet.snapshot(&owner.cluster_id)).await
    }

    /// Details of a single target, `None` if it is not registered.
    pub async fn target(&self, name: &str) -> Result<Option<TargetDetails>, CheckerError> {
        let name = name.to_string();
        self.ask(move |owner| owner.fleet.details(&name)).await
    }

    /// Aggregate health verdict.
    pub async fn healthy(&self) -> Result<bool, CheckerError> {
        self.ask(|owner| owner.healthy).await
    }

    /// Whether the owner loop is up and accepting commands.
    pub async fn ready(&self) -> bool {
        self.ask(|owner| owner.ready).await.unwrap_or(false)
    }

    /// Stop every poller, wait for them to exit, then stop the owner.
    ///
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Stop(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    async fn ask<T, F>(&self, f: F) -> Result<T, CheckerError>
    where
        T: Send + 'static,
        F: FnOnce(&Owner) -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let query: Query = Box::new(move |owner| {
            let _ = reply_tx.send(f(owner));
        });
        self.tx
            .send(Command::Query(query))
            .await
            .map_err(|_| CheckerError::Stopped)?;
        reply_rx.await.map_err(|_| CheckerError::Stopped)
    }
}

/// Exclusive owner of all mutable health state.
struct Owner {
    cluster_id: String,
    interval: Duration,
    client: Client,
    fleet: Fleet,
    pollers: HashMap<String, Poller>,
    observer: Option<UpdateObserver>,
    /// Handed to new pollers. Weak everywhere except in `Checker`, so the
    /// inbox closes once the last handle is dropped.
    tx: mpsc::WeakSender<Command>,
    ready: bool,
    healthy: bool,
}

impl Owner {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        self.ready = true;
        tracing::info!(cluster = %self.cluster_id, "Checker started");

        // Ends when every `Checker` handle has been dropped
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Add { name, url } => self.add_target(name, url),
                Command::Delete { name } => self.delete_target(&name),
                Command::Report(report) => self.update(report),
                Command::Query(query) => query(&self),
                Command::Stop(ack) => {
                    self.shutdown().await;
                    let _ = ack.send(());
                    return;
                }
            }
        }

        tracing::info!(cluster = %self.cluster_id, "All checker handles dropped");
        self.shutdown().await;
    }

    fn add_target(&mut self, name: String, url: String) {
        // Every handle is already gone, the loop is about to end
        if self.tx.upgrade().is_none() {
            return;
        }
        if !self.fleet.insert(&name, &url) {
            tracing::warn!("Attempt to add already added target {}", name);
            return;
        }

        tracing::info!(service = %name, url = %url, "Adding target");
        let poller = Poller::spawn(
            name.clone(),
            url,
            self.interval,
            self.client.clone(),
            self.tx.clone(),
        );
        self.pollers.insert(name, poller);
    }

    fn delete_target(&mut self, name: &str) {
        if self.fleet.remove(name).is_none() {
            tracing::warn!("Attempt to delete unregistered target {}", name);
            return;
        }
        if let Some(poller) = self.pollers.remove(name) {
            poller.stop();
        }

        tracing::info!(service = %name, "Deleted target");
        self.refresh_health();
    }

    fn update(&mut self, report: Report) {
        let Some(update) = self.fleet.apply(&report) else {
            tracing::warn!("Received report from unregistered target {}", report.name);
            return;
        };

        match update.transition {
            Transition::BecameHealthy => tracing::info!(
                service = %update.name,
                state = update.state,
                "Target became healthy"
            ),
            Transition::BecameUnhealthy => tracing::info!(
                service = %update.name,
                state = update.state,
                error = report.error.as_deref().unwrap_or(""),
                "Target became unhealthy"
            ),
            Transition::Unchanged => tracing::debug!(
                service = %update.name,
                state = update.state,
                healthy = update.healthy,
                error = report.error.as_deref().unwrap_or(""),
                "Report applied"
            ),
        }
        self.refresh_health();

        if let Some(observer) = &self.observer {
            observer(&update);
        }
    }

    fn refresh_health(&mut self) {
        let healthy = self.fleet.is_healthy();
        if healthy != self.healthy {
            tracing::info!(
                cluster = %self.cluster_id,
                healthy,
                active = self.fleet.active_count(),
                healthy_targets = self.fleet.healthy_count(),
                "Cluster health changed"
            );
            self.healthy = healthy;
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Stopping {} target pollers", self.pollers.len());
        self.ready = false;
        for (_, poller) in self.pollers.drain() {
            poller.shutdown().await;
        }
    }
}

/// Probe timeout for a given interval, kept below the interval so probes
/// of one target never overlap.
pub fn calc_timeout(interval: Duration) -> Duration {
    interval.mul_f64(0.8)
}

/// Aggregate verdict: vacuously healthy with no active targets, otherwise
/// the truncated healthy percentage must reach `threshold`.
pub fn calc_health_status(active: usize, healthy: usize, threshold: u32) -> bool {
    if active == 0 {
        return true;
    }
    healthy * 100 / active >= threshold as usize
}

/// Check a cluster identifier against [`CLUSTER_ID_PATTERN`].
pub fn validate_cluster_id(id: &str) -> Result<(), CheckerError> {
    let re =
        Regex::new(CLUSTER_ID_PATTERN).map_err(|e| CheckerError::InvalidConfig(e.to_string()))?;
    if !re.is_match(id) {
        return Err(CheckerError::InvalidClusterId(id.to_string()));
    }
    Ok(())
}
