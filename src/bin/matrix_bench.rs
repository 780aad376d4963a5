//! Blocked matrix-multiply benchmark.
//!
//! The product is split into `block`-sized tiles; each tile is one work item
//! that computes its region and folds the region's sum into a running
//! checksum, so the batch joins on a latch without sharing the output matrix.

use anyhow::{Context as _, Result};
use parking_lot::Mutex;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use threadmill::{build_pool, DetachedLatch, Pool, PoolKind};

const ELASTIC_IDLE_TIMEOUT: Duration = Duration::from_millis(200);

fn usage(prog: &str) {
    eprintln!(
        "Usage:\n\
         \x20 {prog} <pool: classic|elastic|ws|advws> <dim> <block> <threads> <warmup> <reps>\n\
         \n\
         Example:\n\
         \x20 {prog} ws 1024 64 8 1 3"
    );
}

struct Args {
    kind: PoolKind,
    dim: usize,
    block: usize,
    threads: usize,
    warmup: usize,
    reps: usize,
}

fn parse_args(argv: &[String]) -> Result<Args> {
    let args = Args {
        kind: argv[1].parse()?,
        dim: argv[2].parse().context("invalid dim")?,
        block: argv[3].parse().context("invalid block")?,
        threads: argv[4].parse().context("invalid threads")?,
        warmup: argv[5].parse().context("invalid warmup")?,
        reps: argv[6].parse().context("invalid reps")?,
    };

    if args.dim == 0 || args.block == 0 || args.threads == 0 || args.reps == 0 {
        anyhow::bail!("dim/block/threads must be > 0, reps > 0");
    }
    Ok(args)
}

fn fill_random(seed: u64, len: usize) -> Vec<f64> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..len).map(|_| rng.f64() * 2.0 - 1.0).collect()
}

/// Compute the tile `rows x cols` of A*B, returning the tile's element sum.
fn matmul_tile(
    dim: usize,
    block: usize,
    a: &[f64],
    b: &[f64],
    row0: usize,
    col0: usize,
) -> f64 {
    let row_max = (row0 + block).min(dim);
    let col_max = (col0 + block).min(dim);

    let mut tile = vec![0.0; (row_max - row0) * (col_max - col0)];
    let tile_cols = col_max - col0;

    for k0 in (0..dim).step_by(block) {
        let k_max = (k0 + block).min(dim);
        for row in row0..row_max {
            for k in k0..k_max {
                let aik = a[row * dim + k];
                let b_row = k * dim;
                let out_row = (row - row0) * tile_cols;
                for col in col0..col_max {
                    tile[out_row + (col - col0)] += aik * b[b_row + col];
                }
            }
        }
    }

    tile.iter().sum()
}

fn matmul_parallel(pool: &dyn Pool, args: &Args, a: &Arc<Vec<f64>>, b: &Arc<Vec<f64>>) -> Result<(f64, f64)> {
    let tiles_per_side = args.dim.div_ceil(args.block);
    let total_tiles = tiles_per_side * tiles_per_side;

    let checksum = Arc::new(Mutex::new(0.0f64));
    let latch = Arc::new(DetachedLatch::new(total_tiles));

    let t0 = Instant::now();
    for tile_row in 0..tiles_per_side {
        for tile_col in 0..tiles_per_side {
            let (dim, block) = (args.dim, args.block);
            let (row0, col0) = (tile_row * block, tile_col * block);
            let a = Arc::clone(a);
            let b = Arc::clone(b);
            let checksum = Arc::clone(&checksum);
            let latch = Arc::clone(&latch);
            pool.submit_job(Box::new(move || {
                let tile_sum = matmul_tile(dim, block, &a, &b, row0, col0);
                *checksum.lock() += tile_sum;
                latch.count_down();
            }))?;
        }
    }
    latch.wait();

    let elapsed = t0.elapsed().as_secs_f64();
    let checksum = *checksum.lock();
    Ok((elapsed, checksum))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let argv: Vec<String> = std::env::args().collect();
    if argv.len() < 7 {
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

    println!(
        "Matrix multiply benchmark (blocked tiles)\n\
         pool={} dim={} block={} threads={} warmup={} reps={}",
        argv[1], args.dim, args.block, args.threads, args.warmup, args.reps,
    );

    let a = Arc::new(fill_random(1, args.dim * args.dim));
    let b = Arc::new(fill_random(2, args.dim * args.dim));

    let pool = build_pool(
        args.kind,
        args.threads,
        (args.threads * 2).max(1),
        ELASTIC_IDLE_TIMEOUT,
    )?;

    let mut best = f64::INFINITY;
    let mut sum = 0.0;
    let mut last_checksum = 0.0;

    for _ in 0..args.warmup {
        let _ = matmul_parallel(pool.as_ref(), &args, &a, &b)?;
    }
    for rep in 0..args.reps {
        let (elapsed, checksum) = matmul_parallel(pool.as_ref(), &args, &a, &b)?;
        best = best.min(elapsed);
        sum += elapsed;
        last_checksum = checksum;
        println!("Run {rep}: {elapsed} s");
    }

    println!("Best: {best} s");
    println!("Avg : {} s", sum / args.reps as f64);
    println!("Checksum: {last_checksum}");

    Ok(())
}
