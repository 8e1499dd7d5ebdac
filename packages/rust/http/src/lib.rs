//! Rate-limited, retrying HTTP gateway shared by every outbound call of a run.
//!
//! All provider searches, enrichment lookups, and downloads go through one
//! [`HttpGateway`]. It owns:
//! - a single semaphore that caps in-flight requests across all adapters,
//!   so third-party rate limits are respected collectively
//! - a per-call timeout covering connect, send, and body read
//! - bounded retries with exponential backoff plus jitter, for transient
//!   failures only (429/500/502/503/504, timeouts, connection errors)

mod error;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use paperscout_shared::{GatewayOptions, PaperScoutError, Result};

pub use error::{HttpError, is_transient_status};

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// Call description / response
// ---------------------------------------------------------------------------

/// Per-call settings.
#[derive(Debug, Clone)]
pub struct CallSpec {
    /// Short label for logs and error messages (e.g. `openalex search`).
    pub label: String,
    /// Overall deadline for one attempt.
    pub timeout: Duration,
    /// Reject bodies larger than this many bytes.
    pub max_bytes: Option<u64>,
}

impl CallSpec {
    pub fn new(label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            timeout,
            max_bytes: None,
        }
    }

    pub fn max_bytes(mut self, limit: u64) -> Self {
        self.max_bytes = Some(limit);
        self
    }
}

/// A fully-read successful response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self, label: &str) -> std::result::Result<T, HttpError> {
        serde_json::from_slice(&self.body).map_err(|e| HttpError::Decode {
            label: label.to_string(),
            message: e.to_string(),
        })
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Shared outbound HTTP client. Cheap to clone; clones share the limiter.
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    limiter: Arc<Semaphore>,
    options: Arc<GatewayOptions>,
}

impl HttpGateway {
    /// Build a gateway with its own connection pool and limiter.
    pub fn new(options: GatewayOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent(&options.contact_email))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| PaperScoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            limiter: Arc::new(Semaphore::new(options.concurrency.max(1))),
            options: Arc::new(options),
        })
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Contact address for services that ask for one.
    pub fn contact_email(&self) -> &str {
        &self.options.contact_email
    }

    /// Permits currently free in the shared limiter.
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Execute a request with limiting, timeout, and transient-failure retries.
    ///
    /// `build` is invoked once per attempt, so it must be repeatable.
    pub async fn execute<F>(
        &self,
        call: &CallSpec,
        build: F,
    ) -> std::result::Result<HttpResponse, HttpError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_attempts = self.options.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.attempt_once(call, &build).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(label = %call.label, attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay =
                        backoff_delay(attempt, self.options.backoff_base, self.options.backoff_max);
                    warn!(
                        label = %call.label,
                        attempt,
                        status = ?err.status(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    warn!(label = %call.label, attempt, status = ?err.status(), "retries exhausted");
                    return Err(HttpError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// GET `url` with query parameters and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        call: &CallSpec,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, HttpError> {
        let response = self
            .execute(call, |client| client.get(url).query(query))
            .await?;
        response.json(&call.label)
    }

    /// One attempt: wait for a permit, then send and read the body under the deadline.
    async fn attempt_once<F>(
        &self,
        call: &CallSpec,
        build: &F,
    ) -> std::result::Result<HttpResponse, HttpError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| HttpError::LimiterClosed)?;

        debug!(label = %call.label, "sending request");

        let request = build(&self.client).timeout(call.timeout);
        match tokio::time::timeout(call.timeout, send_and_read(request, call)).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::Timeout {
                label: call.label.clone(),
                after: call.timeout,
            }),
        }
    }
}

async fn send_and_read(
    request: RequestBuilder,
    call: &CallSpec,
) -> std::result::Result<HttpResponse, HttpError> {
    let response = request
        .send()
        .await
        .map_err(|e| HttpError::from_reqwest(&call.label, call.timeout, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HttpError::Status {
            label: call.label.clone(),
            status: status.as_u16(),
        });
    }

    if let (Some(limit), Some(len)) = (call.max_bytes, response.content_length()) {
        if len > limit {
            return Err(HttpError::TooLarge {
                label: call.label.clone(),
                limit,
            });
        }
    }

    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response
        .bytes()
        .await
        .map_err(|e| HttpError::from_reqwest(&call.label, call.timeout, e))?;

    if let Some(limit) = call.max_bytes {
        if body.len() as u64 > limit {
            return Err(HttpError::TooLarge {
                label: call.label.clone(),
                limit,
            });
        }
    }

    Ok(HttpResponse {
        status: status.as_u16(),
        final_url,
        content_type,
        body: body.to_vec(),
    })
}

/// Descriptive client identifier, with a contact address for polite pools.
fn user_agent(contact_email: &str) -> String {
    format!(
        "PaperScout/{} (literature discovery; mailto:{contact_email})",
        env!("CARGO_PKG_VERSION")
    )
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max`, plus up to 50% random jitter.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(max);
    let jitter_cap = capped.as_millis() as u64 / 2;
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_cap)
    };
    capped + Duration::from_millis(jitter)
}
