//! ---
//! rover_section: "01-core-functionality"
//! rover_subsection: "module"
//! rover_type: "source"
//! rover_scope: "code"
//! rover_description: "Runtime helpers for the link tasks."
//! rover_version: "v0.0.0-prealpha"
//! rover_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

/// Fixed-cadence ticker. Ticks never overlap; late ticks coalesce into one.
#[derive(Debug)]
pub struct RateLimiter {
    interval: tokio::time::Interval,
}

impl RateLimiter {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

/// Single recurring retry timer.
///
/// At most one deadline exists at a time: arming an armed timer keeps the
/// existing deadline. After firing, the timer re-arms itself for the next
/// period until [`RetryTimer::cancel`] is called.
#[derive(Debug)]
pub struct RetryTimer {
    period: Duration,
    deadline: Option<Instant>,
}

impl RetryTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    /// Arm the timer if it is not already running. Returns `true` when a new
    /// deadline was scheduled.
    pub fn arm(&mut self) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + self.period);
        true
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve at the next deadline. Pends forever while disarmed, so it can
    /// sit in a `select!` arm unconditionally.
    pub async fn fired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.deadline = Some(deadline + self.period);
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Named background tasks that are joined together on shutdown.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl TaskSet {
    pub fn spawn<F>(&mut self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.tasks.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Await every task. All tasks are joined even when one fails; the first
    /// failure is returned.
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for (name, task) in self.tasks {
            let outcome = task
                .await
                .map_err(|err| anyhow::anyhow!("task {name} join failure: {err}"))
                .and_then(|result| result);
            if let Err(err) = outcome {
                warn!(task = name, error = %err, "background task failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
