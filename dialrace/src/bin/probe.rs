use std::net::SocketAddr;
use std::process;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;

use dialrace::{DialError, DialOptions, LocalAllocator, RequestSummary, TcpDialer};

struct Args {
    candidates: Vec<String>,
    max_parallel: Option<usize>,
    timeout: Option<Duration>,
    capacity: usize,
    json: bool,
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    candidates: Vec<String>,
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    peer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
    summary: RequestSummary,
    elapsed_ms: u64,
}

#[tokio::main]
async fn main() {
    dialrace::logging::init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let args = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!(
                "Usage: dialrace-probe <host:port>... [--max-parallel N] [--timeout SECS] [--capacity N] [--json]"
            );
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --max-parallel <n>   Dial at most n candidates at once");
            eprintln!("  --timeout <secs>     Give up on a single candidate after secs");
            eprintln!(
                "  --capacity <n>       Permits available to the probe [default: {}]",
                LocalAllocator::DEFAULT_CAPACITY
            );
            eprintln!("  --json               Print a JSON report on stdout");
            process::exit(2);
        }
    };

    match run(&args).await {
        Ok(report) => {
            let connected = report.connected;
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("error: {e}");
                        process::exit(1);
                    }
                }
            } else {
                print_text(&report);
            }
            if !connected {
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut parsed = Args {
        candidates: Vec::new(),
        max_parallel: None,
        timeout: None,
        capacity: LocalAllocator::DEFAULT_CAPACITY,
        json: false,
    };

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        match args[i].as_str() {
            "--max-parallel" => {
                i += 1;
                let raw = args.get(i).ok_or("--max-parallel requires a value")?;
                let n = raw
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(format!("invalid --max-parallel: {raw}"))?;
                parsed.max_parallel = Some(n);
            }
            "--timeout" => {
                i += 1;
                let raw = args.get(i).ok_or("--timeout requires a value")?;
                let secs = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .ok_or(format!("invalid --timeout: {raw}"))?;
                parsed.timeout = Some(Duration::from_secs_f64(secs));
            }
            "--capacity" => {
                i += 1;
                let raw = args.get(i).ok_or("--capacity requires a value")?;
                parsed.capacity = raw
                    .parse::<usize>()
                    .map_err(|_| format!("invalid --capacity: {raw}"))?;
            }
            "--json" => parsed.json = true,
            "--help" | "-h" => return Err(String::new()),
            arg if arg.starts_with('-') => return Err(format!("unknown flag: {arg}")),
            arg => parsed.candidates.push(arg.to_string()),
        }
        i += 1;
    }

    if parsed.candidates.is_empty() {
        return Err("missing required argument: <host:port>".to_string());
    }
    Ok(parsed)
}

async fn resolve(candidates: &[String]) -> anyhow::Result<Vec<SocketAddr>> {
    let mut addresses = Vec::new();
    for candidate in candidates {
        let resolved = tokio::net::lookup_host(candidate.as_str())
            .await
            .with_context(|| format!("failed to resolve {candidate}"))?;
        addresses.extend(resolved);
    }
    Ok(addresses)
}

async fn run(args: &Args) -> anyhow::Result<ProbeReport> {
    let addresses = resolve(&args.candidates).await?;
    tracing::debug!(
        candidates = args.candidates.len(),
        addresses = addresses.len(),
        "Resolved candidates"
    );

    let mut options = DialOptions::default();
    if let Some(max) = args.max_parallel {
        options = options.with_max_parallel(max);
    }
    if let Some(timeout) = args.timeout {
        options = options.with_attempt_timeout(timeout);
    }

    let cancel = options.cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted - cancelling dials");
            cancel.cancel();
        }
    });

    let allocator = LocalAllocator::new(args.capacity).with_per_request_limit(args.capacity);
    let started = Instant::now();
    let (result, summary) =
        dialrace::run_with_summary(&addresses, &TcpDialer::new(), &allocator, options).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    interrupt.abort();

    let candidates = addresses.iter().map(ToString::to_string).collect();
    let report = match result {
        Ok(stream) => ProbeReport {
            candidates,
            connected: true,
            peer: Some(
                stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .context("connected socket has no peer address")?,
            ),
            error: None,
            causes: Vec::new(),
            summary,
            elapsed_ms,
        },
        Err(e) => ProbeReport {
            candidates,
            connected: false,
            peer: None,
            error: Some(e.to_string()),
            causes: causes(&e),
            summary,
            elapsed_ms,
        },
    };
    Ok(report)
}

fn causes(error: &DialError<std::io::Error>) -> Vec<String> {
    error.causes().iter().map(ToString::to_string).collect()
}

fn print_text(report: &ProbeReport) {
    match (&report.peer, &report.error) {
        (Some(peer), _) => println!("connected to {peer} in {}ms", report.elapsed_ms),
        (None, Some(error)) => {
            println!("failed after {}ms: {error}", report.elapsed_ms);
            for cause in &report.causes {
                println!("  {cause}");
            }
        }
        (None, None) => println!("failed after {}ms", report.elapsed_ms),
    }
}
