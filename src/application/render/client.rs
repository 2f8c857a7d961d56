//! HTTP client for the render server.
//!
//! Performs the actual fetch, classifies the response, and applies the
//! offline-cache fallback for transport-level failures. Caching of fresh
//! results is the scheduler's responsibility; the only cache access here is
//! the fallback read.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::RenderCache;
use crate::config::RenderSettings;
use crate::domain::{DiagramSource, ImageFormat};
use crate::infra::error::InfraError;

use super::codec::{self, CodecError};

const TARGET: &str = "application::render::client";

/// Fixed minimal diagram used for reachability probes.
pub const PROBE_DIAGRAM: &str = "@startuml\nA -> B\n@enduml";

/// Classified result of one render fetch.
///
/// An error-diagram is displayable content, not a failure: the server
/// understood the request, the diagram source was invalid, and the body is a
/// rendered graphic describing the error.
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    /// Fresh image from the server.
    Rendered { image: String },
    /// HTTP 400 whose body is a rendered error graphic.
    ErrorDiagram { image: String },
    /// Transport failure served from the offline cache.
    CachedFallback {
        image: String,
        reason: RenderFailure,
    },
    /// Nothing displayable could be produced.
    Failed { reason: RenderFailure },
}

impl RenderOutcome {
    /// Image to display, when the outcome carries one.
    pub fn image(&self) -> Option<&str> {
        match self {
            Self::Rendered { image }
            | Self::ErrorDiagram { image }
            | Self::CachedFallback { image, .. } => Some(image),
            Self::Failed { .. } => None,
        }
    }

    /// Whether the image is a fresh text-to-image mapping worth caching.
    /// Error-diagrams qualify: they are deterministic for that exact invalid
    /// text and caching them avoids re-fetching it.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Rendered { .. } | Self::ErrorDiagram { .. })
    }
}

#[derive(Debug, Error, Clone)]
pub enum RenderFailure {
    #[error("render request timed out")]
    Timeout,
    #[error("render server unreachable: {message}")]
    Unreachable { message: String },
    #[error("render server returned HTTP {status}")]
    ServerStatus { status: u16 },
    #[error("{cause}; no cached render available for offline fallback")]
    NoOfflineFallback { cause: Box<RenderFailure> },
}

impl RenderFailure {
    fn label(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unreachable { .. } => "unreachable",
            Self::ServerStatus { .. } => "server_status",
            Self::NoOfflineFallback { .. } => "no_offline_fallback",
        }
    }
}

/// Renders one diagram against a server base URL.
///
/// The seam the scheduler depends on; production uses [`RenderClient`],
/// tests substitute scripted implementations.
pub trait DiagramRenderer: Send + Sync + 'static {
    fn render(
        &self,
        source: DiagramSource,
        base: String,
        format: ImageFormat,
    ) -> impl Future<Output = Result<RenderOutcome, CodecError>> + Send;
}

/// Answers whether a server base URL is currently reachable.
pub trait ServerProbe: Send + Sync + 'static {
    fn probe(&self, base: String) -> impl Future<Output = bool> + Send;
}

pub struct RenderClient {
    http: reqwest::Client,
    render_timeout: Duration,
    probe_timeout: Duration,
    cache: Arc<RenderCache>,
}

impl RenderClient {
    pub fn new(settings: &RenderSettings, cache: Arc<RenderCache>) -> Result<Self, InfraError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("plantpad/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                InfraError::configuration(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            http,
            render_timeout: settings.request_timeout,
            probe_timeout: settings.probe_timeout,
            cache,
        })
    }

    /// Fetch a render for `source` from the server at `base`.
    ///
    /// Expected failures (timeout, unreachable, bad status) come back as
    /// [`RenderOutcome`] values; only configuration errors propagate as
    /// `Err`. On timeout or connectivity failure the most recent cached
    /// entry for this exact source is returned instead, if one exists.
    pub async fn fetch_render(
        &self,
        source: &DiagramSource,
        base: &str,
        format: ImageFormat,
    ) -> Result<RenderOutcome, CodecError> {
        let started_at = Instant::now();
        let url = codec::build_url(base, source, format)?;

        let response = self
            .http
            .get(url)
            .timeout(self.render_timeout)
            .send()
            .await;

        let outcome = match response {
            Ok(response) => {
                let status = response.status();
                match response.text().await {
                    Ok(body) if status.is_success() => RenderOutcome::Rendered { image: body },
                    Ok(body) if status.as_u16() == 400 && body.contains("<svg") => {
                        RenderOutcome::ErrorDiagram { image: body }
                    }
                    Ok(_) => RenderOutcome::Failed {
                        reason: RenderFailure::ServerStatus {
                            status: status.as_u16(),
                        },
                    },
                    Err(err) => self.fallback(source, classify_transport(err)),
                }
            }
            Err(err) => self.fallback(source, classify_transport(err)),
        };

        self.record(&outcome, started_at.elapsed());
        Ok(outcome)
    }

    /// Minimal fixed-content render request; reachable iff the server
    /// answers with a success status within the probe timeout.
    pub async fn probe_server(&self, base: &str) -> bool {
        let Ok(url) = codec::build_url(base, &DiagramSource::from(PROBE_DIAGRAM), ImageFormat::Svg)
        else {
            return false;
        };

        match self.http.get(url).timeout(self.probe_timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn fallback(&self, source: &DiagramSource, reason: RenderFailure) -> RenderOutcome {
        match self.cache.lookup(source.as_str()) {
            Some(entry) => RenderOutcome::CachedFallback {
                image: entry.image,
                reason,
            },
            None => RenderOutcome::Failed {
                reason: RenderFailure::NoOfflineFallback {
                    cause: Box::new(reason),
                },
            },
        }
    }

    fn record(&self, outcome: &RenderOutcome, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        histogram!("plantpad_render_ms").record(elapsed_ms as f64);
        match outcome {
            RenderOutcome::Rendered { image } => {
                counter!("plantpad_render_success_total").increment(1);
                info!(
                    target = TARGET,
                    op = "render::fetch",
                    result = "success",
                    elapsed_ms,
                    image_bytes = image.len(),
                    "Diagram rendered"
                );
            }
            RenderOutcome::ErrorDiagram { image } => {
                counter!("plantpad_render_error_diagram_total").increment(1);
                info!(
                    target = TARGET,
                    op = "render::fetch",
                    result = "error_diagram",
                    elapsed_ms,
                    image_bytes = image.len(),
                    "Server returned a rendered error graphic"
                );
            }
            RenderOutcome::CachedFallback { reason, .. } => {
                counter!("plantpad_render_fallback_total").increment(1);
                warn!(
                    target = TARGET,
                    op = "render::fetch",
                    result = "cached_fallback",
                    elapsed_ms,
                    reason = reason.label(),
                    error = %reason,
                    "Serving cached render, server unavailable"
                );
            }
            RenderOutcome::Failed { reason } => {
                counter!("plantpad_render_failure_total").increment(1);
                warn!(
                    target = TARGET,
                    op = "render::fetch",
                    result = "failure",
                    elapsed_ms,
                    reason = reason.label(),
                    error = %reason,
                    "Render failed"
                );
            }
        }
    }
}

impl DiagramRenderer for RenderClient {
    async fn render(
        &self,
        source: DiagramSource,
        base: String,
        format: ImageFormat,
    ) -> Result<RenderOutcome, CodecError> {
        self.fetch_render(&source, &base, format).await
    }
}

impl ServerProbe for RenderClient {
    async fn probe(&self, base: String) -> bool {
        self.probe_server(&base).await
    }
}

/// Timeouts and connection-level errors are transient and eligible for the
/// offline fallback; semantic server errors (handled above) are not.
fn classify_transport(err: reqwest::Error) -> RenderFailure {
    if err.is_timeout() {
        RenderFailure::Timeout
    } else {
        RenderFailure::Unreachable {
            message: err.without_url().to_string(),
        }
    }
}
