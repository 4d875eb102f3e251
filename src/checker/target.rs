//! Per-target hysteresis and fleet-wide counters.
//!
//! Nothing here is async: the owner loop in `checker/mod.rs` is the only
//! caller, so plain `&mut self` methods are enough.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::{calc_health_status, ClusterState, ClusterSummary, ServiceHealth, TargetDetails};

/// Outcome of one probe, sent by a poller and consumed once by the owner.
#[derive(Debug, Clone)]
pub struct Report {
    pub name: String,
    pub time: DateTime<Utc>,
    /// `None` on success.
    pub error: Option<String>,
}

impl Report {
    /// `time` is when the probe started, not when it finished.
    pub fn new(name: impl Into<String>, time: DateTime<Utc>, error: Option<String>) -> Self {
        Self {
            name: name.into(),
            time,
            error,
        }
    }

    #[cfg(test)]
    pub fn success(name: impl Into<String>) -> Self {
        Self::new(name, Utc::now(), None)
    }

    #[cfg(test)]
    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(name, Utc::now(), Some(error.into()))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Number of consecutive identical results needed to flip a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub success: u32,
    pub failure: u32,
}

/// Change of a target's verdict caused by a single report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    BecameHealthy,
    BecameUnhealthy,
}

/// Most recent probe outcome, kept for logging only.
#[derive(Debug, Clone)]
pub struct LastReport {
    pub time: DateTime<Utc>,
    pub error: Option<String>,
}

/// One monitored endpoint.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    /// Positive: consecutive successes. Negative: consecutive failures.
    /// Zero until the first report arrives.
    state: i64,
    healthy: bool,
    last_report: Option<LastReport>,
}

impl Target {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: 0,
            healthy: false,
            last_report: None,
        }
    }

    pub fn state(&self) -> i64 {
        self.state
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// A target counts as active once it has produced a report.
    pub fn is_active(&self) -> bool {
        self.state != 0
    }

    pub fn last_report(&self) -> Option<&LastReport> {
        self.last_report.as_ref()
    }

    /// Fold one probe outcome into the run counter.
    ///
    /// A run in the opposite direction restarts from one; the verdict only
    /// flips once the run reaches the threshold for its direction.
    pub fn apply(&mut self, success: bool, thresholds: Thresholds) -> Transition {
        if success {
            if self.state < 0 {
                self.state = 0;
            }
            self.state += 1;
            if self.state >= i64::from(thresholds.success) && !self.healthy {
                self.healthy = true;
                return Transition::BecameHealthy;
            }
        } else {
            if self.state > 0 {
                self.state = 0;
            }
            self.state -= 1;
            if self.state <= -i64::from(thresholds.failure) && self.healthy {
                self.healthy = false;
                return Transition::BecameUnhealthy;
            }
        }
        Transition::Unchanged
    }
}

/// What the owner observed after applying a report.
#[derive(Debug, Clone)]
pub struct TargetUpdate {
    pub name: String,
    pub state: i64,
    pub healthy: bool,
    pub transition: Transition,
}

/// All targets plus the aggregate counters derived from them.
///
/// Invariant: `healthy_count <= active_count <= targets.len()`.
#[derive(Debug)]
pub struct Fleet {
    targets: HashMap<String, Target>,
    active_count: usize,
    healthy_count: usize,
    thresholds: Thresholds,
    state_threshold: u32,
}

impl Fleet {
    pub fn new(thresholds: Thresholds, state_threshold: u32) -> Self {
        Self {
            targets: HashMap::new(),
            active_count: 0,
            healthy_count: 0,
            thresholds,
            state_threshold,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn healthy_count(&self) -> usize {
        self.healthy_count
    }

    /// Register a new target. Returns `false` if the name is already taken.
    pub fn insert(&mut self, name: &str, url: &str) -> bool {
        if self.targets.contains_key(name) {
            return false;
        }
        self.targets.insert(name.to_string(), Target::new(url));
        true
    }

    /// Drop a target and withdraw it from the counters it contributed to.
    pub fn remove(&mut self, name: &str) -> Option<Target> {
        let target = self.targets.remove(name)?;
        if target.is_active() {
            self.active_count -= 1;
            if target.is_healthy() {
                self.healthy_count -= 1;
            }
        }
        Some(target)
    }

    /// Apply a report. Returns `None` when the target is unknown.
    pub fn apply(&mut self, report: &Report) -> Option<TargetUpdate> {
        let thresholds = self.thresholds;
        let target = self.targets.get_mut(&report.name)?;

        if !target.is_active() {
            self.active_count += 1;
        }
        target.last_report = Some(LastReport {
            time: report.time,
            error: report.error.clone(),
        });

        let transition = target.apply(report.is_success(), thresholds);
        match transition {
            Transition::BecameHealthy => self.healthy_count += 1,
            Transition::BecameUnhealthy => self.healthy_count -= 1,
            Transition::Unchanged => {}
        }

        let (state, healthy) = (target.state(), target.is_healthy());
        Some(TargetUpdate {
            name: report.name.clone(),
            state,
            healthy,
            transition,
        })
    }

    pub fn is_healthy(&self) -> bool {
        calc_health_status(self.active_count, self.healthy_count, self.state_threshold)
    }

    pub fn details(&self, name: &str) -> Option<TargetDetails> {
        let target = self.targets.get(name)?;
        let last = target.last_report();
        Some(TargetDetails {
            name: name.to_string(),
            url: target.url.clone(),
            state: target.state(),
            healthy: target.is_healthy(),
            last_check: last.map(|r| r.time),
            last_error: last.and_then(|r| r.error.clone()),
        })
    }

    /// Consistent copy of the aggregate and of every active target.
    pub fn snapshot(&self, cluster: &str) -> ClusterState {
        let mut services: Vec<ServiceHealth> = self
            .targets
            .iter()
            .filter(|(_, t)| t.is_active())
            .map(|(name, t)| ServiceHealth {
                name: name.clone(),
                healthy: t.is_healthy(),
            })
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));

        ClusterState {
            cluster: ClusterSummary {
                name: cluster.to_string(),
                healthy: self.is_healthy(),
                total: self.active_count,
                failed: self.active_count - self.healthy_count,
            },
            services,
        }
    }
}
