//! Bounded retry as a pure decision over explicit state.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2, backoff: Duration::from_secs(1) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState<E> {
    /// Zero-based index of the attempt that just ran.
    pub attempt: u32,
    pub last_error: Option<E>,
}

impl<E> Default for RetryState<E> {
    fn default() -> Self {
        Self { attempt: 0, last_error: None }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision<T, E> {
    Done(T),
    Retry { next: RetryState<E>, delay: Duration },
    GiveUp(E),
}

impl RetryPolicy {
    /// What to do after `state.attempt` produced `outcome`.
    pub fn decide<T, E>(&self, state: &RetryState<E>, outcome: Result<T, E>) -> RetryDecision<T, E> {
        match outcome {
            Ok(value) => RetryDecision::Done(value),
            Err(e) if state.attempt + 1 >= self.max_attempts.max(1) => RetryDecision::GiveUp(e),
            Err(e) => RetryDecision::Retry {
                next: RetryState { attempt: state.attempt + 1, last_error: Some(e) },
                delay: self.backoff,
            },
        }
    }

    /// Drive `op` until `decide` says stop. `op` receives the attempt index.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = RetryState::default();
        loop {
            let outcome = op(state.attempt).await;
            match self.decide(&state, outcome) {
                RetryDecision::Done(value) => return Ok(value),
                RetryDecision::GiveUp(e) => return Err(e),
                RetryDecision::Retry { next, delay } => {
                    if let Some(e) = &next.last_error {
                        tracing::warn!(attempt = state.attempt + 1, "attempt failed, retrying in {:?}: {}", delay, e);
                    }
                    tokio::time::sleep(delay).await;
                    state = next;
                }
            }
        }
    }
}
