//! Harbor Smoke Harness
//!
//! Registers a background process against a live origin, routes a list of
//! paths through it, then replays them with the network cut off to check
//! that every path still gets an answer. Prints a JSON summary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use harbor_common::{init_logging, LogConfig, LogFormat};
use harbor_net::{Fetcher, HttpFetcher, LoaderConfig, NetError, Request, Response, Url};
use harbor_page::{ConnectivityMonitor, PageHost, UpdateController};
use harbor_sw::{channel, BackgroundProcess, WorkerConfig};
use serde_json::json;
use tracing::{error, info};

/// Timing collector for tracking operation durations.
#[derive(Default)]
struct PerfTiming {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn record(&mut self, operation: &'static str, duration: Duration) {
        self.timings.entry(operation).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();
        for (op, durations) in &self.timings {
            if durations.is_empty() {
                continue;
            }
            let ms: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
            let total: f64 = ms.iter().sum();
            let max = ms.iter().copied().fold(0.0, f64::max);
            summary.insert(
                op.to_string(),
                json!({
                    "count": ms.len(),
                    "avg_ms": (total / ms.len() as f64 * 100.0).round() / 100.0,
                    "max_ms": (max * 100.0).round() / 100.0,
                }),
            );
        }
        serde_json::Value::Object(summary)
    }
}

/// Fetcher wrapper that can simulate losing the network.
struct Switchable {
    inner: HttpFetcher,
    monitor: Arc<ConnectivityMonitor>,
}

#[async_trait]
impl Fetcher for Switchable {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if !self.monitor.is_online() {
            return Err(NetError::Offline(request.url.to_string()));
        }
        self.inner.fetch(request).await
    }
}

/// A headless page has nothing to reload.
struct NoopHost;

#[async_trait]
impl PageHost for NoopHost {
    async fn reload(&self) {
        info!("Reload requested");
    }
}

/// Parse command line arguments
struct Args {
    origin: String,
    config: Option<String>,
    paths: Vec<String>,
    json_logs: bool,
    perf_output: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut origin = "http://localhost:8080/".to_string();
        let mut config = None;
        let mut paths = Vec::new();
        let mut json_logs = false;
        let mut perf_output = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--origin" => {
                    if let Some(val) = args.next() {
                        origin = val;
                    }
                }
                "--config" => {
                    config = args.next();
                }
                "--path" => {
                    if let Some(val) = args.next() {
                        paths.push(val);
                    }
                }
                "--json-logs" => {
                    json_logs = true;
                }
                "--perf-output" => {
                    perf_output = args.next();
                }
                _ => {}
            }
        }

        if paths.is_empty() {
            paths = vec!["/".to_string(), "/manifest.json".to_string()];
        }

        Self {
            origin,
            config,
            paths,
            json_logs,
            perf_output,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_config = if args.json_logs {
        LogConfig::production().with_format(LogFormat::Json)
    } else {
        LogConfig::default()
    };
    init_logging(log_config);

    let origin = Url::parse(&args.origin).with_context(|| format!("bad origin {}", args.origin))?;
    let config = match args.config {
        Some(ref path) => WorkerConfig::load(path).with_context(|| format!("loading {path}"))?,
        None => WorkerConfig::default(),
    };

    let monitor = Arc::new(ConnectivityMonitor::new(true));
    let fetcher = Arc::new(Switchable {
        inner: HttpFetcher::new(LoaderConfig::default())?,
        monitor: monitor.clone(),
    });

    let start = Instant::now();
    let mut perf = PerfTiming::default();

    let (process, events) = BackgroundProcess::new(origin.clone(), config, fetcher)?;
    let (tx, rx) = channel();
    process.spawn_message_loop(rx);
    let controller = UpdateController::new(process.clone(), tx, Arc::new(NoopHost));
    controller.spawn_event_loop(events);

    let register_start = Instant::now();
    controller.register().await?;
    perf.record("register", register_start.elapsed());

    let mut results = Vec::new();
    for phase in ["online", "offline"] {
        monitor.set_online(phase == "online");
        for path in &args.paths {
            let url = origin.join(path).with_context(|| format!("bad path {path}"))?;
            let fetch_start = Instant::now();
            let outcome = process.handle_fetch(Request::navigate(url.clone())).await;
            let label = if phase == "online" {
                "fetch_online"
            } else {
                "fetch_offline"
            };
            perf.record(label, fetch_start.elapsed());

            match outcome {
                Some(response) => results.push(json!({
                    "phase": phase,
                    "url": url.as_str(),
                    "status": response.status.as_u16(),
                    "from_cache": response.from_cache,
                })),
                None => {
                    error!(url = %url, "Request was not intercepted");
                    results.push(json!({ "phase": phase, "url": url.as_str(), "status": null }));
                }
            }
        }
        process.router().settle().await;
    }

    let answered = results.iter().all(|r| !r["status"].is_null());
    let summary = json!({
        "status": if answered { "pass" } else { "fail" },
        "elapsed_ms": start.elapsed().as_millis(),
        "active_version": process.lifecycle().active().map(|w| w.version),
        "caches": process.store().keys().await,
        "cache_bytes": process.store().usage_bytes().await,
        "results": results,
        "perf": perf.summary(),
    });

    if let Some(ref path) = args.perf_output {
        std::fs::write(path, perf.summary().to_string()).with_context(|| format!("writing {path}"))?;
        info!(path = %path, "Perf summary written");
    }
    println!("{summary}");

    if answered {
        Ok(())
    } else {
        anyhow::bail!("some requests were not answered")
    }
}
