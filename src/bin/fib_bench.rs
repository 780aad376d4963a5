//! Fibonacci benchmark: batches of CPU-bound recursive tasks.
//!
//! Each task computes `fib(n)` by recursive splitting down to an iterative
//! base case, so the work is pure CPU with a tunable grain. The `coro` kind
//! runs the batch as detached suspendables joined by a latch; every other
//! kind submits plain work items.

use anyhow::{Context as _, Result};
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use threadmill::{build_pool, DetachedLatch, FixedPool, Pool, PoolKind, Scheduler};

const DEFAULT_SPLIT_THRESHOLD: u32 = 32;
const ELASTIC_IDLE_TIMEOUT: Duration = Duration::from_millis(200);

fn fib_seq(n: u32) -> u64 {
    if n < 2 {
        return u64::from(n);
    }
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 2..=n {
        let c = a.wrapping_add(b);
        a = b;
        b = c;
    }
    b
}

fn fib_task(n: u32, split_threshold: u32) -> u64 {
    if n <= split_threshold {
        return fib_seq(n);
    }
    fib_task(n - 1, split_threshold).wrapping_add(fib_task(n - 2, split_threshold))
}

fn usage(prog: &str) {
    eprintln!(
        "Usage:\n\
         \x20 {prog} <pool: classic|elastic|ws|advws|coro> <fib_n> <threads> <warmup> <reps> [tasks] [split_threshold]\n\
         \n\
         Defaults:\n\
         \x20 tasks = threads\n\
         \x20 split_threshold = {DEFAULT_SPLIT_THRESHOLD} (switch to iterative fib)"
    );
}

struct Args {
    kind: String,
    fib_n: u32,
    threads: usize,
    warmup: usize,
    reps: usize,
    tasks: usize,
    split_threshold: u32,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let threads: usize = args[3].parse().context("invalid threads")?;
    let parsed = Args {
        kind: args[1].clone(),
        fib_n: args[2].parse().context("invalid fib_n")?,
        threads,
        warmup: args[4].parse().context("invalid warmup")?,
        reps: args[5].parse().context("invalid reps")?,
        tasks: match args.get(6) {
            Some(raw) => raw.parse().context("invalid tasks")?,
            None => threads,
        },
        split_threshold: match args.get(7) {
            Some(raw) => raw.parse().context("invalid split_threshold")?,
            None => DEFAULT_SPLIT_THRESHOLD,
        },
    };

    if parsed.threads == 0 || parsed.tasks == 0 || parsed.reps == 0 {
        anyhow::bail!("threads/tasks must be > 0, reps > 0");
    }
    Ok(parsed)
}

fn fib_parallel_batch(pool: &dyn Pool, args: &Args) -> Result<(f64, u64)> {
    let checksum = Arc::new(AtomicU64::new(0));
    let latch = Arc::new(DetachedLatch::new(args.tasks));

    let t0 = Instant::now();
    for _ in 0..args.tasks {
        let checksum = Arc::clone(&checksum);
        let latch = Arc::clone(&latch);
        let (n, threshold) = (args.fib_n, args.split_threshold);
        pool.submit_job(Box::new(move || {
            checksum.fetch_add(fib_task(n, threshold), Ordering::AcqRel);
            latch.count_down();
        }))?;
    }
    latch.wait();

    Ok((t0.elapsed().as_secs_f64(), checksum.load(Ordering::Acquire)))
}

fn fib_coroutine_batch(sched: &Scheduler, args: &Args) -> (f64, u64) {
    let checksum = Arc::new(AtomicU64::new(0));
    let latch = Arc::new(DetachedLatch::new(args.tasks));

    let t0 = Instant::now();
    for _ in 0..args.tasks {
        let sched_inner = sched.clone();
        let checksum = Arc::clone(&checksum);
        let latch = Arc::clone(&latch);
        let (n, threshold) = (args.fib_n, args.split_threshold);
        sched.spawn_detached(async move {
            sched_inner.schedule().await;
            checksum.fetch_add(fib_task(n, threshold), Ordering::AcqRel);
            latch.count_down();
        });
    }
    latch.wait();

    (t0.elapsed().as_secs_f64(), checksum.load(Ordering::Acquire))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let argv: Vec<String> = std::env::args().collect();
    if argv.len() < 6 {
        usage(&argv[0]);
        return ExitCode::from(2);
    }

    match run(&argv) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Fatal: {err:#}");
            usage(&argv[0]);
            ExitCode::from(1)
        }
    }
}

fn run(argv: &[String]) -> Result<()> {
    let args = parse_args(argv)?;
    let fib_value = fib_task(args.fib_n, args.split_threshold);

    println!(
        "Fibonacci benchmark (batched CPU-bound tasks)\n\
         pool={} fib_n={} fib_value={} threads={} warmup={} reps={} tasks={} split_threshold={}",
        args.kind,
        args.fib_n,
        fib_value,
        args.threads,
        args.warmup,
        args.reps,
        args.tasks,
        args.split_threshold,
    );

    let mut best = f64::INFINITY;
    let mut sum = 0.0;
    let mut last_checksum = 0;

    if args.kind == "coro" {
        let pool = FixedPool::new(args.threads)?;
        let sched = pool.scheduler();

        for _ in 0..args.warmup {
            let _ = fib_coroutine_batch(&sched, &args);
        }
        for rep in 0..args.reps {
            let (elapsed, checksum) = fib_coroutine_batch(&sched, &args);
            best = best.min(elapsed);
            sum += elapsed;
            last_checksum = checksum;
            println!("Run {rep}: {elapsed} s");
        }
    } else {
        let kind: PoolKind = args.kind.parse()?;
        let pool = build_pool(
            kind,
            args.threads,
            (args.threads * 2).max(1),
            ELASTIC_IDLE_TIMEOUT,
        )?;
        for _ in 0..args.warmup {
            let _ = fib_parallel_batch(pool.as_ref(), &args)?;
        }
        for rep in 0..args.reps {
            let (elapsed, checksum) = fib_parallel_batch(pool.as_ref(), &args)?;
            best = best.min(elapsed);
            sum += elapsed;
            last_checksum = checksum;
            println!("Run {rep}: {elapsed} s");
        }
    }

    println!("Best: {best} s");
    println!("Avg : {} s", sum / args.reps as f64);
    println!("Fib({}): {fib_value}", args.fib_n);
    println!("Checksum: {last_checksum}");
    println!(
        "Expected checksum: {}",
        fib_value.wrapping_mul(args.tasks as u64)
    );

    Ok(())
}
