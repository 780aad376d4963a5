//! Mini HTTP/1.1 demo server backed by the worker pools.
//!
//! Endpoint: `GET /work?cpu1=<us>&io=<us>&cpu2=<us>`: CPU burn, simulated
//! I/O wait, CPU burn, then a JSON timing summary. The `classic`, `ws`,
//! `elastic`, and `advws` kinds run each connection as one blocking work
//! item; `coro` handles it as a detached suspendable that yields onto the
//! pool and sleeps cooperatively during the I/O phase.

use anyhow::{anyhow, Context as _, Result};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};
use threadmill::{
    sleep_for, ElasticPool, ElasticStealingPool, FixedPool, Pool, Scheduler, StealingPool,
};

const DEFAULT_CPU1_US: u64 = 200;
const DEFAULT_IO_US: u64 = 5000;
const DEFAULT_CPU2_US: u64 = 200;
const MAX_HEAD_BYTES: usize = 64 * 1024;

fn usage(prog: &str) {
    eprintln!(
        "Usage:\n\
         \x20 {prog} classic <port> <threads>\n\
         \x20 {prog} coro    <port> <threads>\n\
         \x20 {prog} ws      <port> <threads>\n\
         \x20 {prog} elastic <port> <min_threads> <max_threads>\n\
         \x20 {prog} advws   <port> <min_threads> <max_threads> <idle_ms>"
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        usage(&args[0]);
        return ExitCode::from(2);
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Fatal: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &[String]) -> Result<()> {
    let kind = args[1].as_str();
    let port: u16 = args[2].parse().context("invalid port")?;

    // The boxed handle owns the workers; it lives for the process, since the
    // accept loop below never returns.
    let (_pool, sched) = build_pool(kind, args)?;
    let remote = sched.remote();

    let listener = TcpListener::bind(("0.0.0.0", port))
        .with_context(|| format!("bind to port {port} failed (port in use?)"))?;
    println!("Listening on 0.0.0.0:{port} | endpoint: /work?cpu1=200&io=5000&cpu2=200 (us)");

    loop {
        let stream = match listener.accept() {
            Ok((stream, _peer)) => stream,
            // accept can be interrupted
            Err(_) => continue,
        };

        if kind == "coro" {
            let sched_inner = sched.clone();
            sched.spawn_detached(async move {
                handle_connection_coro(stream, sched_inner).await;
            });
        } else {
            let _ = remote.submit(move || handle_connection(stream));
        }
    }
}

fn build_pool(kind: &str, args: &[String]) -> Result<(Box<dyn Pool>, Scheduler)> {
    match kind {
        "classic" | "coro" => {
            let threads = args[3].parse().context("invalid thread count")?;
            let pool = FixedPool::new(threads)?;
            let sched = pool.scheduler();
            Ok((Box::new(pool), sched))
        }
        "ws" => {
            let threads = args[3].parse().context("invalid thread count")?;
            let pool = StealingPool::new(threads)?;
            let sched = pool.scheduler();
            Ok((Box::new(pool), sched))
        }
        "elastic" => {
            if args.len() < 5 {
                return Err(anyhow!("usage: elastic <port> <min_threads> <max_threads>"));
            }
            let min = args[3].parse().context("invalid min_threads")?;
            let max = args[4].parse().context("invalid max_threads")?;
            let pool = ElasticPool::new(min, max, Duration::from_millis(200))?;
            let sched = pool.scheduler();
            Ok((Box::new(pool), sched))
        }
        "advws" => {
            if args.len() < 6 {
                return Err(anyhow!(
                    "usage: advws <port> <min_threads> <max_threads> <idle_ms>"
                ));
            }
            let min = args[3].parse().context("invalid min_threads")?;
            let max = args[4].parse().context("invalid max_threads")?;
            let idle_ms: u64 = args[5].parse().context("invalid idle_ms")?;
            let pool = ElasticStealingPool::new(min, max, Duration::from_millis(idle_ms))?;
            let sched = pool.scheduler();
            Ok((Box::new(pool), sched))
        }
        other => Err(anyhow!(
            "unknown kind: {other} (use classic/ws/elastic/advws/coro)"
        )),
    }
}

struct WorkParams {
    cpu1_us: u64,
    io_us: u64,
    cpu2_us: u64,
}

enum Route {
    Work(WorkParams),
    BadRequest(&'static str),
    NotFound,
}

fn route_request(head: &str) -> Route {
    let line = head.split("\r\n").next().unwrap_or(head);
    let mut parts = line.split(' ');
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Route::BadRequest("Bad Request\n");
    };
    if parts.next().is_none() {
        return Route::BadRequest("Bad Request\n");
    }

    if method != "GET" {
        return Route::BadRequest("GET only\n");
    }
    if !target.starts_with("/work") {
        return Route::NotFound;
    }

    Route::Work(WorkParams {
        cpu1_us: query_int(target, "cpu1").unwrap_or(DEFAULT_CPU1_US),
        io_us: query_int(target, "io").unwrap_or(DEFAULT_IO_US),
        cpu2_us: query_int(target, "cpu2").unwrap_or(DEFAULT_CPU2_US),
    })
}

fn query_int(target: &str, key: &str) -> Option<u64> {
    let (_, query) = target.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == key {
            v.parse().ok()
        } else {
            None
        }
    })
}

fn read_request_head(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::with_capacity(2048);
    let mut buf = [0u8; 2048];
    loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return String::from_utf8(head).ok();
        }
        if head.len() > MAX_HEAD_BYTES {
            return None;
        }
    }
}

fn http_response(status: u16, content_type: &str, body: &str) -> String {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        _ => "HTTP/1.1 400 Bad Request",
    };
    format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn work_body(params: &WorkParams, total_us: u64) -> String {
    format!(
        "{{\"endpoint\":\"/work\",\"cpu1_us\":{},\"io_us\":{},\"cpu2_us\":{},\"total_us\":{}}}\n",
        params.cpu1_us, params.io_us, params.cpu2_us, total_us
    )
}

fn respond(stream: &mut TcpStream, response: &str) {
    let _ = stream.write_all(response.as_bytes());
}

fn handle_connection(mut stream: TcpStream) {
    let Some(head) = read_request_head(&mut stream) else {
        return;
    };

    let params = match route_request(&head) {
        Route::BadRequest(msg) => {
            respond(&mut stream, &http_response(400, "text/plain", msg));
            return;
        }
        Route::NotFound => {
            respond(
                &mut stream,
                &http_response(
                    404,
                    "text/plain",
                    "Try /work?cpu1=200&io=5000&cpu2=200 (microseconds)\n",
                ),
            );
            return;
        }
        Route::Work(params) => params,
    };

    let t0 = Instant::now();
    burn_cpu(Duration::from_micros(params.cpu1_us));
    if params.io_us > 0 {
        thread::sleep(Duration::from_micros(params.io_us));
    }
    burn_cpu(Duration::from_micros(params.cpu2_us));
    let total_us = t0.elapsed().as_micros() as u64;

    let body = work_body(&params, total_us);
    respond(&mut stream, &http_response(200, "application/json", &body));
}

async fn handle_connection_coro(mut stream: TcpStream, sched: Scheduler) {
    // Get off the accept thread before touching the socket.
    sched.schedule().await;

    let Some(head) = read_request_head(&mut stream) else {
        return;
    };

    let params = match route_request(&head) {
        Route::BadRequest(msg) => {
            respond(&mut stream, &http_response(400, "text/plain", msg));
            return;
        }
        Route::NotFound => {
            respond(
                &mut stream,
                &http_response(
                    404,
                    "text/plain",
                    "Try /work?cpu1=200&io=5000&cpu2=200 (microseconds)\n",
                ),
            );
            return;
        }
        Route::Work(params) => params,
    };

    let t0 = Instant::now();
    burn_cpu(Duration::from_micros(params.cpu1_us));
    sleep_for(Duration::from_micros(params.io_us)).await;
    burn_cpu(Duration::from_micros(params.cpu2_us));
    let total_us = t0.elapsed().as_micros() as u64;

    let body = work_body(&params, total_us);
    respond(&mut stream, &http_response(200, "application/json", &body));
}

fn burn_cpu(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    let deadline = Instant::now() + duration;
    let mut x: u64 = 0x1469_5981_0393_4665;
    while Instant::now() < deadline {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        x = x.wrapping_mul(1_099_511_628_211);
        std::hint::black_box(x);
    }
}
