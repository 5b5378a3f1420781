/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/management_api/src/retry.rs
*
* Optimistic-concurrency retry. Writes that race another writer fail with
* `Conflict`; callers re-read the object, re-apply their change and try again
* under a short jittered backoff.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::client::ClientError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    pub steps: u32,
    pub duration: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for Backoff {
    /// Five attempts, 10ms apart, with up to 10% jitter.
    fn default() -> Self {
        Self {
            steps: 5,
            duration: Duration::from_millis(10),
            factor: 1.0,
            jitter: 0.1,
        }
    }
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.duration.as_secs_f64() * self.factor.powi(attempt as i32);
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter) * base
        } else {
            0.0
        };
        Duration::from_secs_f64(base + jitter)
    }
}

/// Runs `operation` until it succeeds, fails with anything other than a
/// conflict, or the backoff runs out of steps. The last error is returned.
pub async fn retry_on_conflict<T, F, Fut>(backoff: Backoff, mut operation: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(e) if e.is_conflict() && attempt + 1 < backoff.steps => {
                debug!(attempt, error = %e, "Write conflicted, retrying");
                tokio::time::sleep(backoff.delay(attempt)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> ClientError {
        ClientError::Conflict { kind: "RoleBinding".to_string(), name: "rb".to_string() }
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(Backoff::default(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_configured_steps() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(Backoff::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(Backoff::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::NotFound { kind: "Role".to_string(), name: "r".to_string() })
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
