use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::extract::{clean_sql, extract_sql, unanswerable_reason};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Overload or throttling. Worth retrying after a pause.
    #[error("backend temporarily unavailable: {0}")]
    Transient(String),
    #[error("backend request failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("backend still unavailable after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("{0}")]
    Unanswerable(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation cancelled")]
    Cancelled,
}

/// A text-completion service that turns a prompt pair into a response.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn converse(&self, system: &str, user: &str) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    None,
    #[default]
    Full,
}

/// Bounded exponential backoff for transient backend failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            jitter: Jitter::Full,
        }
    }
}

impl RetryPolicy {
    /// Same attempt bound, no waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            jitter: Jitter::None,
            ..Self::default()
        }
    }

    /// Pause before the attempt following `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full => {
                let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::random_range(0..=millis))
            }
        }
    }
}

/// A cancellation token backed by an `AtomicBool`, with a `Notify` so
/// in-flight work can await it.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenState::default()),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a [`GenerationBackend`] with retry, timeout and cancellation, and
/// turns raw responses into SQL.
pub struct SqlGenerator {
    backend: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl SqlGenerator {
    pub fn new(backend: Arc<dyn GenerationBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Ask for a statement. A response starting with `ERROR:` is a refusal.
    pub async fn generate(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let response = self.call_with_retry(system, user).await?;

        if let Some(reason) = unanswerable_reason(&response) {
            log::warn!("Model declined to answer: {}", reason);
            return Err(GenerationError::Unanswerable(reason.to_string()));
        }

        let sql = clean_sql(&extract_sql(&response));
        if let Some(reason) = unanswerable_reason(&sql) {
            log::warn!("Model declined to answer: {}", reason);
            return Err(GenerationError::Unanswerable(reason.to_string()));
        }

        log::info!("Generated SQL: {}", sql);
        Ok(sql)
    }

    /// Free-form completion, no extraction.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        self.call_with_retry(system, user).await
    }

    /// One backend call, bounded by the per-call timeout if set.
    async fn call_once(
        &self,
        system: &str,
        user: &str,
    ) -> Result<Result<String, BackendError>, GenerationError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.converse(system, user))
                .await
                .map_err(|_| GenerationError::Timeout(limit)),
            None => Ok(self.backend.converse(system, user).await),
        }
    }

    async fn call_with_retry(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_message = String::new();

        for attempt in 0..attempts {
            if self.cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::warn!("Generation cancelled during backend call");
                    return Err(GenerationError::Cancelled);
                }
                result = self.call_once(system, user) => result?,
            };

            match result {
                Ok(text) => return Ok(text),
                Err(BackendError::Transient(message)) => {
                    last_message = message;
                    if attempt + 1 < attempts {
                        let delay = self.retry.delay_for(attempt);
                        log::warn!(
                            "Backend overloaded (attempt {}/{}), retrying in {:?}: {}",
                            attempt + 1,
                            attempts,
                            delay,
                            last_message
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Err(GenerationError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Err(err) => {
                    log::error!("Backend call failed: {}", err);
                    return Err(err.into());
                }
            }
        }

        Err(GenerationError::Exhausted {
            attempts,
            message: last_message,
        })
    }
}
