//! Stopping the service: cancel the shared token, give each background task
//! until a common deadline to finish, then abort whatever is left.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_GRACE: Duration = Duration::from_secs(30);

/// A background task of the service, named for shutdown logs.
pub struct ServiceTask {
    pub name: &'static str,
    handle: JoinHandle<()>,
}

impl ServiceTask {
    pub fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }
}

/// Which tasks stopped on their own and which had to be aborted.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub finished: Vec<&'static str>,
    pub aborted: Vec<&'static str>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty()
    }
}

pub struct ShutdownCoordinator {
    token: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            grace,
        }
    }

    /// Token handed to the HTTP server, the event bridge, the client message
    /// loop and the sweepers.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token and wait for `tasks` in order. All tasks share one
    /// deadline, so a slow task shortens the wait for the ones after it.
    pub async fn drain(&self, tasks: Vec<ServiceTask>) -> ShutdownReport {
        self.token.cancel();
        let deadline = Instant::now() + self.grace;
        info!(tasks = tasks.len(), grace_secs = self.grace.as_secs(), "draining service tasks");

        let mut report = ShutdownReport::default();
        for ServiceTask { name, mut handle } in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.finished.push(name),
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "task ended abnormally");
                    report.finished.push(name);
                }
                Err(_) => {
                    handle.abort();
                    warn!(task = name, "task still running at deadline, aborted");
                    report.aborted.push(name);
                }
            }
        }
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}
