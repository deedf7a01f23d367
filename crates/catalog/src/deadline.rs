use crate::errors::ProductError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Point in time by which a request, and every downstream call it makes,
/// must finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }

    /// Run `fut` unless the deadline passes first; `operation` names the call
    /// in the resulting `Timeout`
    pub async fn run<F>(&self, operation: &'static str, fut: F) -> Result<F::Output, ProductError>
    where
        F: Future,
    {
        tokio::time::timeout_at(self.0, fut)
            .await
            .map_err(|_| ProductError::Timeout(operation))
    }
}
