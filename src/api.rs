//! Model API interaction with exponential backoff retry logic.
//!
//! The model extractor talks to an OpenAI-compatible endpoint through
//! `awful_aj`. Requests go through a retry decorator so rate limits and
//! transient network errors do not fail a whole source.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait for a single prompt/response exchange
//! - [`AskFnWrapper`]: adapts `awful_aj::api::ask` to [`AskAsync`]
//! - [`RetryAsk`]: decorator that retries any [`AskAsync`] under a [`Backoff`]
//! - [`ask_with_backoff`]: one timed, retried request; what extractors call
//!
//! [`Backoff`] is also used by the detail fetcher in [`crate::enrich`].

use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use rand::{Rng, rng};
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Trait for async model interaction.
pub trait AskAsync {
    /// The type of response returned by the model.
    type Response;

    /// Send `text` to the model and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Exponential backoff schedule.
///
/// ```text
/// delay(attempt) = min(base_delay * 2^(attempt-1), max_delay) + jitter(0..=max_jitter_ms)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
    pub max_jitter_ms: u64,
}

impl Backoff {
    /// Schedule for model calls: 5 retries from 1 s, capped at 30 s.
    pub const fn model() -> Self {
        Self {
            max_retries: 5,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(30),
            max_jitter_ms: 250,
        }
    }

    /// No waiting at all. Used in tests.
    pub const fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay: StdDuration::ZERO,
            max_delay: StdDuration::ZERO,
            max_jitter_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn base_for(&self, attempt: usize) -> StdDuration {
        let exp = attempt.saturating_sub(1).min(31) as u32;
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }

    /// Delay before retry number `attempt` (1-based), jitter included.
    pub fn delay_for(&self, attempt: usize) -> StdDuration {
        let jitter_ms: u64 = rng().random_range(0..=self.max_jitter_ms);
        self.base_for(attempt) + StdDuration::from_millis(jitter_ms)
    }
}

impl<T: AskAsync> AskAsync for &T {
    type Response = T::Response;

    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        (**self).ask(text).await
    }
}

/// Wrapper that adds backoff retries to any [`AskAsync`] implementation.
pub struct RetryAsk<T> {
    inner: T,
    backoff: Backoff,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// ```ignore
    /// let client = AskFnWrapper { config, template };
    /// let retry_client = RetryAsk::new(client, Backoff::model());
    /// ```
    pub fn new(inner: T, backoff: Backoff) -> Self {
        Self { inner, backoff }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk").field("backoff", &self.backoff).finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync + fmt::Debug,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.backoff.max_retries {
                        error!(
                            attempt,
                            max = self.backoff.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                            elapsed_ms_total = total_dt.as_millis() as u128,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.backoff.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                        elapsed_ms_total = total_dt.as_millis() as u128,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Wrapper around `awful_aj::api::ask` that implements [`AskAsync`].
#[derive(Debug)]
pub struct AskFnWrapper<'a> {
    /// Endpoint, model and key settings.
    pub config: &'a AwfulJadeConfig,
    /// System prompt and conversation structure.
    pub template: &'a ChatTemplate,
}

impl<'a> AskAsync for AskFnWrapper<'a> {
    type Response = String;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = ask(self.config, text.to_string(), self.template, None, None).await;
        let dt = t0.elapsed();

        if let Err(e) = &res {
            warn!(elapsed_ms = dt.as_millis() as u128, error = %e, "API call failed");
        }
        res
    }
}

/// Send `prompt` through `client`, retrying under `backoff`.
#[instrument(level = "info", skip_all, fields(prompt_chars = prompt.chars().count()))]
pub async fn ask_with_backoff<A>(
    client: &A,
    prompt: &str,
    backoff: Backoff,
) -> Result<A::Response, Box<dyn Error>>
where
    A: AskAsync + fmt::Debug,
{
    let t0 = Instant::now();
    let api = RetryAsk::new(client, backoff);
    let res = api.ask(prompt).await;
    let dt = t0.elapsed();

    match &res {
        Ok(_) => info!(elapsed_ms_total = dt.as_millis() as u128, "ask_with_backoff succeeded"),
        Err(e) => {
            error!(elapsed_ms_total = dt.as_millis() as u128, error = %e, "ask_with_backoff failed")
        }
    }
    res
}
