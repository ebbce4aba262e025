//! Fan-out of one mailing across a pool of workers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::config::WorkerConfig;
use crate::queue::RecipientQueue;
use crate::randomize;
use crate::transport::Connector;
use crate::worker::{RecipientFailure, Worker, WorkerReport};

/// Number of workers actually started for a run.
///
/// No recipients means no workers. Otherwise a request of zero is raised to
/// one and the result never exceeds the recipient count.
pub fn effective_worker_count(requested: usize, recipients: usize) -> usize {
    if recipients == 0 {
        0
    } else {
        requested.max(1).min(recipients)
    }
}

/// Aggregate result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workers_spawned: usize,
    pub sessions_failed: usize,
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Addresses no worker ever popped.
    pub unserved: Vec<String>,
    pub failures: Vec<RecipientFailure>,
    pub outcomes: Vec<WorkerReport>,
}

impl DispatchSummary {
    fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            workers_spawned: 0,
            sessions_failed: 0,
            attempted: 0,
            delivered: 0,
            failed: 0,
            unserved: Vec::new(),
            failures: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    fn from_reports(
        started_at: DateTime<Utc>,
        reports: Vec<WorkerReport>,
        unserved: Vec<String>,
    ) -> Self {
        let delivered: usize = reports.iter().map(|r| r.delivered.len()).sum();
        let failures: Vec<RecipientFailure> = reports
            .iter()
            .flat_map(|r| r.failures.iter().cloned())
            .collect();
        Self {
            started_at,
            finished_at: Utc::now(),
            workers_spawned: reports.len(),
            sessions_failed: reports
                .iter()
                .filter(|r| r.outcome.is_session_failure())
                .count(),
            attempted: delivered + failures.len(),
            delivered,
            failed: failures.len(),
            unserved,
            failures,
            outcomes: reports,
        }
    }

    /// Every session opened, every send succeeded and nothing was left over.
    pub fn is_success(&self) -> bool {
        self.sessions_failed == 0 && self.failed == 0 && self.unserved.is_empty()
    }
}

pub struct Dispatcher<C: Connector> {
    connector: Arc<C>,
    config: Arc<WorkerConfig>,
    span: Span,
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(connector: C, config: WorkerConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            config: Arc::new(config),
            span: info_span!("dispatch"),
        }
    }

    /// Record pool and worker events under `span` instead of the default.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Queue every recipient in input order, start the workers and wait for
    /// all of them.
    pub async fn run<I>(&self, recipients: I, worker_count: usize) -> DispatchSummary
    where
        I: IntoIterator<Item = String>,
    {
        let started_at = Utc::now();
        let queue: RecipientQueue = recipients.into_iter().collect();
        let total = queue.len();
        let workers = effective_worker_count(worker_count, total);

        if workers == 0 {
            self.span.in_scope(|| info!("no recipients, nothing to send"));
            return DispatchSummary::empty(started_at);
        }

        self.run_pool(queue, total, workers, started_at)
            .instrument(self.span.clone())
            .await
    }

    async fn run_pool(
        &self,
        queue: RecipientQueue,
        total: usize,
        workers: usize,
        started_at: DateTime<Utc>,
    ) -> DispatchSummary {
        info!(
            workers,
            recipients = total,
            host = %self.config.smtp.address(),
            security = %self.config.smtp.security,
            "starting worker pool"
        );
        debug!(
            subject_variants = %randomize::variant_count(&self.config.subject_template),
            body_variants = %randomize::variant_count(&self.config.body_template),
            policy = %self.config.failure_policy,
            "templates loaded"
        );

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                Worker::new(
                    id,
                    queue.clone(),
                    self.connector.clone(),
                    self.config.clone(),
                    &self.span,
                )
                .spawn()
            })
            .collect();

        let mut reports = Vec::with_capacity(workers);
        for (id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(worker_id = id, error = %e, "worker task died");
                    reports.push(WorkerReport::crashed(id, e.to_string()));
                }
            }
        }

        let unserved = queue.drain_remaining();
        let summary = DispatchSummary::from_reports(started_at, reports, unserved);
        if !summary.unserved.is_empty() {
            warn!(
                unserved = summary.unserved.len(),
                "some recipients were never attempted"
            );
        }
        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            sessions_failed = summary.sessions_failed,
            "worker pool finished"
        );
        summary
    }
}
