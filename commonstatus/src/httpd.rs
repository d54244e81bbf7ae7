//! The exporter's HTTP surface
//!
//! | Route | Answer |
//! |---|---|
//! | `GET /probe?target=<url>` | the probe's metrics, `400` on a malformed request, `502` if the target could not be fetched |
//! | `GET /metrics` | the exporter's lifetime counters |
//! | `GET /` | a landing page |
//!
//! Any other path is `404`, any other method `405`. A scraper may shorten a
//! probe's fetch timeout with the `X-Prometheus-Scrape-Timeout-Seconds`
//! header.

use std::{collections::BTreeSet, future::Future, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use commonstatus_convert::exposition::CONTENT_TYPE;
use http::HeaderMap;
use http_body_util::Full;
use hyper::{Method, Request, Response, StatusCode, body::Incoming, header, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use serde::Deserialize;
use tokio::{
    net::TcpListener,
    pin,
    sync::{Semaphore, TryAcquireError},
    task::JoinSet,
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, parse_timeout},
    probe::Probe,
    telemetry::Lifetime,
};

/// Header a scraper announces its own scrape timeout in
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

// In-flight connections get this long to finish once shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const LANDING_PAGE: &str = "<html>
<head><title>CommonStatus Exporter</title></head>
<body>
<h1>CommonStatus Exporter</h1>
<p><a href=\"/probe?target=http://localhost:8080/status\">Probe http://localhost:8080/status</a></p>
<p><a href=\"/metrics\">Metrics</a></p>
</body>
</html>
";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Server`]
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    #[error("Request should contain only one parameter: 'target'. Encode the URL if needed.")]
    TooManyParameters,
    #[error("Parameter 'target' is missing")]
    MissingTarget,
}

#[derive(Debug, Deserialize)]
struct ProbeParams {
    #[serde(default)]
    target: String,
}

#[derive(Debug)]
struct AppState {
    client: reqwest::Client,
    lifetime: Lifetime,
    connection_timeout: Duration,
}

/// The exporter's HTTP server
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
    concurrency_limit: usize,
}

impl Server {
    /// Bind a new [`Server`] to the configured address. Probe outcomes are
    /// counted in `lifetime`.
    ///
    /// # Errors
    ///
    /// Function will return an error if the address cannot be bound.
    pub async fn bind(config: &Config, lifetime: Lifetime) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.binding_addr).await?;
        let state = Arc::new(AppState {
            client: reqwest::Client::new(),
            lifetime,
            connection_timeout: config.connection_timeout,
        });
        Ok(Self {
            listener,
            state,
            concurrency_limit: config.concurrent_requests_max,
        })
    }

    /// The address actually bound, useful when binding port 0
    ///
    /// # Errors
    ///
    /// Function will return an error if the socket cannot report its address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Run this [`Server`] to completion
    ///
    /// Serves requests until `shutdown` resolves, then stops accepting and
    /// gives in-flight connections a short grace period.
    ///
    /// # Errors
    ///
    /// None are known; accept failures are logged and skipped.
    pub async fn run<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            state,
            concurrency_limit,
        } = self;
        info!("CommonStatus exporter listening on {:?}", listener.local_addr());

        let sem = Arc::new(Semaphore::new(concurrency_limit));
        let mut join_set = JoinSet::new();

        pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping accept loop.");
                    break;
                }

                incoming = listener.accept() => {
                    let (stream, addr) = match incoming {
                        Ok(sa) => sa,
                        Err(e) => {
                            error!("Error accepting connection: {e}");
                            continue;
                        }
                    };
                    debug!("Accepted connection from {addr}");
                    reap(&mut join_set);

                    let sem = Arc::clone(&sem);
                    let state = Arc::clone(&state);

                    join_set.spawn(async move {
                        let permit = match sem.try_acquire() {
                            Ok(p) => p,
                            Err(TryAcquireError::Closed) => {
                                error!("Semaphore closed");
                                return;
                            }
                            Err(TryAcquireError::NoPermits) => {
                                warn!("httpd over connection capacity, load shedding");
                                drop(stream);
                                return;
                            }
                        };

                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, req).await }
                        });
                        let builder = auto::Builder::new(TokioExecutor::new());
                        if let Err(e) = builder.serve_connection(TokioIo::new(stream), service).await {
                            error!("Error serving {addr}: {e}");
                        }
                        drop(permit);
                    });
                }
            }
        }

        drop(listener);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("Connections still open after {SHUTDOWN_GRACE:?}, aborting them.");
            join_set.shutdown().await;
        }
        Ok(())
    }
}

/// Collect connection tasks that have finished, returning how many.
fn reap(join_set: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(res) = join_set.try_join_next() {
        if let Err(e) = res {
            error!("Connection task failed: {e}");
        }
        reaped += 1;
    }
    reaped
}

async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, http::Error> {
    let started = Instant::now();

    if req.method() != Method::GET {
        warn!("Received other than GET method: {}", req.method());
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(header::ALLOW, "GET")
            .body(Full::new(Bytes::from_static(b"Method not allowed\n")));
    }

    let path = req.uri().path().to_owned();
    match path.as_str() {
        "/probe" => {
            let query = req.uri().query().unwrap_or_default().to_string();
            let timeout = fetch_timeout(req.headers(), state.connection_timeout);
            drop(req);
            probe(&state, &query, timeout, started).await
        }
        "/metrics" => respond(StatusCode::OK, CONTENT_TYPE, state.lifetime.render()),
        "/" => respond(StatusCode::OK, "text/html; charset=utf-8", LANDING_PAGE),
        _ => respond(
            StatusCode::NOT_FOUND,
            "text/plain; charset=utf-8",
            "Not found\n",
        ),
    }
}

async fn probe(
    state: &AppState,
    query: &str,
    timeout: Duration,
    started: Instant,
) -> Result<Response<Full<Bytes>>, http::Error> {
    let target = match probe_target(query) {
        Ok(target) => target,
        Err(rejection) => {
            if rejection == Rejection::TooManyParameters {
                warn!("More than one parameter found in the request query: {query}");
            }
            state.lifetime.record_failure(started.elapsed());
            return respond(
                StatusCode::BAD_REQUEST,
                "text/plain; charset=utf-8",
                format!("{rejection}\n"),
            );
        }
    };

    let report = Probe::new(target, timeout)
        .run(&state.client, &state.lifetime)
        .await;

    match report.error {
        None => respond(StatusCode::OK, CONTENT_TYPE, report.metrics.encode()),
        Some(error) => {
            let reason = error.to_string().replace('\n', " ");
            let body = format!("# {reason}\n{}", report.metrics.encode());
            respond(StatusCode::BAD_GATEWAY, CONTENT_TYPE, body)
        }
    }
}

/// The `target` of a probe query. The query may hold nothing else, so a
/// target URL with its own query string must be percent-encoded. A repeated
/// `target` takes its first value.
fn probe_target(query: &str) -> Result<String, Rejection> {
    let pairs: Vec<&str> = query.split('&').filter(|pair| !pair.is_empty()).collect();
    let keys: BTreeSet<&str> = pairs
        .iter()
        .map(|pair| pair.split_once('=').map_or(*pair, |(key, _)| key))
        .collect();
    if keys.len() > 1 {
        return Err(Rejection::TooManyParameters);
    }

    let first = pairs.first().copied().unwrap_or_default();
    let params: ProbeParams = serde_qs::from_str(first).map_err(|e| {
        debug!("Unreadable probe query {query:?}: {e}");
        Rejection::MissingTarget
    })?;
    if params.target.is_empty() {
        return Err(Rejection::MissingTarget);
    }
    Ok(params.target)
}

/// The fetch timeout requested by the scraper, else `default`.
fn fetch_timeout(headers: &HeaderMap, default: Duration) -> Duration {
    let Some(value) = headers.get(SCRAPE_TIMEOUT_HEADER) else {
        return default;
    };
    match value
        .to_str()
        .map_err(|_| "not visible ASCII")
        .and_then(parse_timeout)
    {
        Ok(timeout) => timeout,
        Err(reason) => {
            warn!("Ignoring {SCRAPE_TIMEOUT_HEADER} header {value:?}: {reason}");
            default
        }
    }
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Result<Response<Full<Bytes>>, http::Error> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .body(Full::new(body.into()))
}
