//! Generic poll-until-desired-state loop used by every provider to wait for
//! an asynchronous cloud operation (volume creation, attach, ACL grant) to
//! converge.

use std::time::{Duration, Instant};

use crate::error::{FuxiError, FuxiResult};

/// Anything with a back-end lifecycle `status` field that a monitor can poll.
pub trait HasStatus {
    fn status(&self) -> &str;
}

pub struct StateMonitor {
    pub desired_state: String,
    pub transient_states: Vec<String>,
    pub time_limit: Duration,
    pub poll_delay: Duration,
}

impl StateMonitor {
    pub fn new(desired_state: impl Into<String>, transient_states: Vec<String>, time_limit: Duration) -> Self {
        Self {
            desired_state: desired_state.into(),
            transient_states,
            time_limit,
            poll_delay: Duration::from_secs(1),
        }
    }

    pub fn with_poll_delay(mut self, poll_delay: Duration) -> Self {
        self.poll_delay = poll_delay;
        self
    }

    /// Polls `fetch` until the returned object's status equals
    /// `desired_state`. Tolerates `transient_states`, dropping earlier
    /// transients from consideration once a later one is observed so that a
    /// regression backwards between them is still caught by the fallthrough
    /// `UnexpectedState` branch. Any other status is fatal.
    ///
    /// If `fetch` errors, the elapsed time is checked first: past the
    /// deadline it becomes `Timeout`, otherwise the fetcher's error is
    /// re-raised as-is so the caller can choose to retry.
    pub async fn wait_for<T, F, Fut>(&self, mut fetch: F) -> FuxiResult<T>
    where
        T: HasStatus,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = FuxiResult<T>>,
    {
        let start = Instant::now();
        let mut seen_transient_index: Option<usize> = None;

        loop {
            let current = match fetch().await {
                Ok(obj) => obj,
                Err(e) => {
                    if start.elapsed() > self.time_limit {
                        return Err(FuxiError::Timeout(self.time_limit));
                    }
                    return Err(e);
                }
            };

            let status = current.status();
            if status == self.desired_state {
                return Ok(current);
            }

            if let Some(idx) = self.transient_states.iter().position(|s| s == status) {
                // A later transient observed than previously seen is fine
                // (normal forward progress); an earlier one after a later
                // one has already been seen means the object regressed, and
                // is treated as the fallthrough unexpected-state case below.
                match seen_transient_index {
                    Some(prev) if idx < prev => {
                        return Err(FuxiError::UnexpectedState {
                            desired: self.desired_state.clone(),
                            actual: status.to_string(),
                        });
                    }
                    _ => seen_transient_index = Some(idx),
                }
            } else {
                return Err(FuxiError::UnexpectedState {
                    desired: self.desired_state.clone(),
                    actual: status.to_string(),
                });
            }

            if start.elapsed() > self.time_limit {
                return Err(FuxiError::Timeout(self.time_limit));
            }
            tokio::time::sleep(self.poll_delay).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Obj(String);
    impl HasStatus for Obj {
        fn status(&self) -> &str {
            &self.0
        }
    }

    #[tokio::test]
    async fn converges_through_transient_states() {
        let calls = AtomicUsize::new(0);
        let sequence = vec!["creating", "creating", "available"];
        let monitor = StateMonitor::new("available", vec!["creating".to_string()], Duration::from_secs(5))
            .with_poll_delay(Duration::from_millis(1));
        let result = monitor
            .wait_for(|| {
                let i = calls.fetch_add(1, Ordering::SeqCst);
                let status = sequence[i.min(sequence.len() - 1)].to_string();
                async move { Ok::<_, FuxiError>(Obj(status)) }
            })
            .await
            .unwrap();
        assert_eq!(result.0, "available");
    }

    #[tokio::test]
    async fn unexpected_status_is_fatal() {
        let monitor = StateMonitor::new("available", vec!["creating".to_string()], Duration::from_secs(5));
        let result = monitor
            .wait_for(|| async { Ok::<_, FuxiError>(Obj("error".to_string())) })
            .await;
        assert!(matches!(result, Err(FuxiError::UnexpectedState { .. })));
    }

    #[tokio::test]
    async fn regression_between_transients_is_fatal() {
        let calls = AtomicUsize::new(0);
        let sequence = vec!["attaching", "available", "attaching"];
        let monitor = StateMonitor::new(
            "in-use",
            vec!["available".to_string(), "attaching".to_string()],
            Duration::from_secs(5),
        )
        .with_poll_delay(Duration::from_millis(1));
        let result = monitor
            .wait_for(|| {
                let i = calls.fetch_add(1, Ordering::SeqCst);
                let status = sequence[i.min(sequence.len() - 1)].to_string();
                async move { Ok::<_, FuxiError>(Obj(status)) }
            })
            .await;
        assert!(matches!(result, Err(FuxiError::UnexpectedState { .. })));
    }

    #[tokio::test]
    async fn timeout_when_never_converging() {
        let monitor = StateMonitor::new("available", vec!["creating".to_string()], Duration::from_millis(5))
            .with_poll_delay(Duration::from_millis(2));
        let result = monitor
            .wait_for(|| async { Ok::<_, FuxiError>(Obj("creating".to_string())) })
            .await;
        assert!(matches!(result, Err(FuxiError::Timeout(_))));
    }
}
