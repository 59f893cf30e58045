use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use safepool_config::SafepoolConfig;
use safepool_core::{PoolPtr, SharedPool};
use safepool_simulator::{check_digest, Simulator};
use safepool_telemetry::{EventLogger, MetricsRecorder};

use crate::error::StressError;

pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "safepool", version, about)]
pub struct Cli {
    /// YAML file loaded over the defaults instead of `config/safepool.yaml`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one deterministic alloc/free simulation and print its state hash
    Simulate(SimulateArgs),
    /// Rerun validated simulations on increasing seeds until one fails
    Fuzz(FuzzArgs),
    /// Allocate and free from one shared pool on several threads
    Stress(StressArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of operations (defaults to `simulator.operations`)
    #[arg(long)]
    pub ops: Option<usize>,
    /// Defaults to `simulator.seed`
    #[arg(long)]
    pub seed: Option<u64>,
    /// Fail unless the run produces this digest
    #[arg(long)]
    pub validate_hash: Option<String>,
    /// Check every pool invariant after each operation
    #[arg(long, default_value_t = false)]
    pub validate: bool,
    /// Print the Prometheus text exposition after the run
    #[arg(long, default_value_t = false)]
    pub print_metrics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FuzzArgs {
    /// Initial seed for fuzzing (will auto-increment)
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
    /// Number of fuzzing iterations (0 for unlimited)
    #[arg(long, default_value_t = 100)]
    pub iterations: usize,
    /// Operations per simulation
    #[arg(long, default_value_t = 1000)]
    pub max_ops: usize,
}

#[derive(Args, Debug, Clone)]
pub struct StressArgs {
    #[arg(long, default_value_t = 4)]
    pub threads: usize,
    /// Operations per thread
    #[arg(long, default_value_t = 10_000)]
    pub ops: usize,
}

pub fn run_command(cli: Cli) -> CliResult<()> {
    let config = match &cli.config {
        Some(path) => SafepoolConfig::load_from_path(path)?,
        None => SafepoolConfig::load()?,
    };
    EventLogger::init(&config.telemetry.log_level)?;

    let metrics = if config.telemetry.metrics {
        Some(MetricsRecorder::new()?)
    } else {
        None
    };

    match cli.command {
        Commands::Simulate(args) => {
            let digest = run_simulation(&config, &args, metrics)?;
            println!("{digest}");
            Ok(())
        }
        Commands::Fuzz(args) => {
            let runs = run_fuzz(&config, &args)?;
            println!("{runs} simulations passed");
            Ok(())
        }
        Commands::Stress(args) => {
            let allocations = run_stress(&config, &args)?;
            println!("{allocations} allocations across {} threads", args.threads);
            Ok(())
        }
    }
}

pub fn run_simulation(
    config: &SafepoolConfig,
    args: &SimulateArgs,
    metrics: Option<MetricsRecorder>,
) -> CliResult<String> {
    let seed = args.seed.unwrap_or(config.simulator.seed);
    let ops = args.ops.unwrap_or(config.simulator.operations);

    let mut simulator = Simulator::new(seed, config.pool.clone())?
        .with_workload(&config.simulator)?
        .with_validation(args.validate);
    if let Some(metrics) = metrics {
        simulator = simulator.with_metrics(metrics);
    }

    let digest = simulator.run(ops)?;
    EventLogger::log_event("simulate", &format!("seed={seed} ops={ops} digest={digest}"));

    if args.print_metrics {
        if let Some(metrics) = simulator.metrics() {
            print!("{}", metrics.gather_metrics()?);
        }
    }
    if let Some(expected) = &args.validate_hash {
        check_digest(expected, &digest)?;
        info!("state hash matches");
    }
    Ok(digest)
}

/// Returns the number of simulations that passed.
pub fn run_fuzz(config: &SafepoolConfig, args: &FuzzArgs) -> CliResult<usize> {
    let mut seed = args.seed;
    let mut count = 0;
    loop {
        if args.iterations > 0 && count >= args.iterations {
            break;
        }

        let result = Simulator::new(seed, config.pool.clone())?
            .with_workload(&config.simulator)?
            .with_validation(true)
            .run(args.max_ops);
        if let Err(err) = result {
            error!(seed, error = %err, "fuzz run failed");
            return Err(err.into());
        }

        seed = seed.wrapping_add(1);
        count += 1;
    }
    EventLogger::log_event("fuzz", &format!("first_seed={} runs={count}", args.seed));
    Ok(count)
}

/// Returns the number of successful allocations across all threads.
pub fn run_stress(config: &SafepoolConfig, args: &StressArgs) -> CliResult<usize> {
    let pool = SharedPool::new(config.pool.pool_size, config.pool.granularity)?;
    let max_alloc = config.simulator.max_alloc.max(1);
    let seed = config.simulator.seed;

    let results = crossbeam::scope(|s| {
        let handles: Vec<_> = (0..args.threads)
            .map(|thread| {
                let pool = &pool;
                s.spawn(move |_| stress_worker(pool, thread, args.ops, max_alloc, seed))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    })
    .map_err(|_| StressError::WorkerPanicked)?;

    for result in results {
        result.map_err(|_| StressError::WorkerPanicked)??;
    }

    let stats = pool.stats();
    if stats.outstanding() != 0 {
        return Err(StressError::Leak {
            outstanding: stats.outstanding(),
        }
        .into());
    }
    let report = pool.with_pool(|pool| pool.validate()).map_err(StressError::from)?;
    info!(
        allocations = stats.allocations,
        failed_allocations = stats.failed_allocations,
        free_bytes = report.free_bytes,
        lwm_free_bytes = pool.lwm_free_bytes(),
        "stress run complete"
    );
    EventLogger::log_event(
        "stress",
        &format!("threads={} allocations={}", args.threads, stats.allocations),
    );
    Ok(stats.allocations)
}

fn stress_worker(
    pool: &SharedPool,
    thread: usize,
    ops: usize,
    max_alloc: usize,
    seed: u64,
) -> Result<(), StressError> {
    let mut rng = StdRng::seed_from_u64(seed ^ (thread as u64).rotate_left(32));
    let fill = (thread % 255) as u8 + 1;
    let mut live: Vec<PoolPtr> = Vec::new();

    for _ in 0..ops {
        if !live.is_empty() && rng.random_bool(0.5) {
            let ptr = live.swap_remove(rng.random_range(0..live.len()));
            release(pool, thread, ptr, fill)?;
        } else if let Some(ptr) = pool.malloc(rng.random_range(1..=max_alloc)) {
            pool.with_pool(|pool| {
                if let Some(data) = pool.data_mut(ptr) {
                    data.fill(fill);
                }
            });
            live.push(ptr);
        }
    }
    for ptr in live {
        release(pool, thread, ptr, fill)?;
    }
    Ok(())
}

fn release(pool: &SharedPool, thread: usize, ptr: PoolPtr, fill: u8) -> Result<(), StressError> {
    let offset = ptr.offset();
    let intact = pool.with_pool(|pool| {
        pool.data(ptr)
            .is_some_and(|data| data.iter().all(|&byte| byte == fill))
    });
    if !intact {
        return Err(StressError::Corruption { thread, offset });
    }
    if !pool.free(Some(ptr)) {
        return Err(StressError::FreeDeclined { thread, offset });
    }
    Ok(())
}
