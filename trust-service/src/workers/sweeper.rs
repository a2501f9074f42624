use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::mfa::MfaService;
use crate::services::session::SessionManager;
use crate::services::versioning::VersionService;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub challenges: usize,
    pub locks: usize,
}

/// Periodically expires stale sessions, pending MFA challenges and document
/// locks. Each pass re-checks expiry inside the store at removal time, so a
/// renewal that lands between passes is never undone.
pub struct ExpirySweeper {
    sessions: SessionManager,
    mfa: MfaService,
    versions: VersionService,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl ExpirySweeper {
    pub fn new(
        sessions: SessionManager,
        mfa: MfaService,
        versions: VersionService,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            mfa,
            versions,
            interval,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// One pass over every store. Failures are logged and the pass continues.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.sessions.sweep_expired().await {
            Ok(n) => report.sessions = n,
            Err(e) => tracing::error!(error = %e, "Session sweep failed"),
        }
        match self.mfa.sweep_challenges().await {
            Ok(n) => report.challenges = n,
            Err(e) => tracing::error!(error = %e, "Challenge sweep failed"),
        }
        match self.versions.sweep_locks().await {
            Ok(n) => report.locks = n,
            Err(e) => tracing::error!(error = %e, "Lock sweep failed"),
        }

        metrics::counter!("sweeper_expired_total", "kind" => "session")
            .increment(report.sessions as u64);
        metrics::counter!("sweeper_expired_total", "kind" => "challenge")
            .increment(report.challenges as u64);
        metrics::counter!("sweeper_expired_total", "kind" => "lock")
            .increment(report.locks as u64);

        if report != SweepReport::default() {
            tracing::info!(
                sessions = report.sessions,
                challenges = report.challenges,
                locks = report.locks,
                "Expiry sweep completed"
            );
        }
        report
    }

    pub fn start(self) -> JoinHandle<()> {
        let shutdown = self.shutdown_token.clone();
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting expiry sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Expiry sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }
}
