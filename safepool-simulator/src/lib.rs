/*!
# Safepool Simulator

Deterministic alloc/free workloads against a single [`MemoryPool`].

Every step is drawn from a seeded `StdRng`, applied to the pool and folded
into a BLAKE3 state hash, so two runs with the same seed and pool geometry
produce the same digest. Optionally the pool validator runs after every
step, live blocks are checked for overwrites before they are freed, and
foreign pointers are offered to `pool_free` to make sure they are declined.
*/

use blake3::Hasher;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use safepool_config::{PoolConfig, SafepoolConfig, SimulatorConfig};
use safepool_core::{MemoryPool, PoolPtr};
use safepool_telemetry::MetricsRecorder;

pub mod chaos;
mod error;

pub use chaos::ForeignPointer;
pub use error::SimulationError;

/// One simulated step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Alloc { size: usize },
    /// Frees the live block at `slot`.
    Free { slot: usize },
    ForeignFree(ForeignPointer),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulationSummary {
    pub operations: usize,
    pub allocations: usize,
    pub failed_allocations: usize,
    pub frees: usize,
    pub foreign_frees: usize,
    pub live_blocks: usize,
    pub final_lwm: usize,
}

struct LiveBlock {
    ptr: PoolPtr,
    fill: u8,
}

pub struct Simulator {
    pool: MemoryPool,
    rng: StdRng,
    max_alloc: usize,
    free_probability: f64,
    chaos_probability: f64,
    validate: bool,
    metrics: Option<MetricsRecorder>,
    live: Vec<LiveBlock>,
    state_hasher: Hasher,
    summary: SimulationSummary,
}

impl Simulator {
    /// Creates a simulator with the default workload shape.
    pub fn new(seed: u64, pool: PoolConfig) -> Result<Self, SimulationError> {
        let workload = SimulatorConfig::default();
        let memory_pool = MemoryPool::new(pool.pool_size, pool.granularity)?;
        debug!(
            seed,
            pool_size = memory_pool.size(),
            granularity = memory_pool.granularity(),
            "simulator created"
        );

        Ok(Self {
            pool: memory_pool,
            rng: StdRng::seed_from_u64(seed),
            max_alloc: workload.max_alloc,
            free_probability: workload.free_probability,
            chaos_probability: workload.chaos_probability,
            validate: false,
            metrics: None,
            live: Vec::new(),
            state_hasher: Hasher::new(),
            summary: SimulationSummary::default(),
        })
    }

    /// Builds a simulator from a loaded configuration, seed included.
    pub fn from_config(config: &SafepoolConfig) -> Result<Self, SimulationError> {
        Self::new(config.simulator.seed, config.pool.clone())?.with_workload(&config.simulator)
    }

    /// Applies the request-size and probability settings of `workload`.
    /// Its seed is ignored.
    pub fn with_workload(mut self, workload: &SimulatorConfig) -> Result<Self, SimulationError> {
        check_probability("free", workload.free_probability)?;
        check_probability("chaos", workload.chaos_probability)?;
        self.max_alloc = workload.max_alloc.max(1);
        self.free_probability = workload.free_probability;
        self.chaos_probability = workload.chaos_probability;
        Ok(self)
    }

    /// Runs the pool validator after every operation.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    pub fn metrics(&self) -> Option<&MetricsRecorder> {
        self.metrics.as_ref()
    }

    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            live_blocks: self.live.len(),
            final_lwm: self.pool.lwm_free_bytes(),
            ..self.summary
        }
    }

    /// Draws the next operation without applying it.
    pub fn next_operation(&mut self) -> Operation {
        if self.chaos_probability > 0.0 && self.rng.random_bool(self.chaos_probability) {
            return Operation::ForeignFree(ForeignPointer::pick(&mut self.rng));
        }
        if !self.live.is_empty() && self.rng.random_bool(self.free_probability) {
            return Operation::Free {
                slot: self.rng.random_range(0..self.live.len()),
            };
        }
        Operation::Alloc {
            size: self.rng.random_range(1..=self.max_alloc),
        }
    }

    /// Draws and applies one operation.
    pub fn step(&mut self) -> Result<Operation, SimulationError> {
        let op = self.next_operation();
        self.apply(op)?;
        Ok(op)
    }

    /// Runs `operations` steps and returns the hex state digest.
    pub fn run(&mut self, operations: usize) -> Result<String, SimulationError> {
        for _ in 0..operations {
            self.step()?;
        }
        let digest = self.digest();
        let summary = self.summary();
        info!(
            operations = summary.operations,
            allocations = summary.allocations,
            failed_allocations = summary.failed_allocations,
            frees = summary.frees,
            foreign_frees = summary.foreign_frees,
            lwm_free_bytes = summary.final_lwm,
            digest = %digest,
            "simulation complete"
        );
        Ok(digest)
    }

    /// Hash of every outcome so far plus the current low-water mark.
    pub fn digest(&self) -> String {
        let mut hasher = self.state_hasher.clone();
        hasher.update(&encode(self.pool.lwm_free_bytes()));
        hex::encode(hasher.finalize().as_bytes())
    }

    fn apply(&mut self, op: Operation) -> Result<(), SimulationError> {
        let index = self.summary.operations;
        match op {
            Operation::Alloc { size } => self.alloc(index, size),
            Operation::Free { slot } => self.free(index, slot)?,
            Operation::ForeignFree(kind) => self.foreign_free(index, kind)?,
        }
        self.summary.operations += 1;

        if let Some(metrics) = &self.metrics {
            metrics.observe_pool(self.pool.lwm_free_bytes(), self.pool.largest_free_size());
        }
        if self.validate {
            self.pool
                .validate()
                .map_err(|source| SimulationError::Invariant { op: index, source })?;
        }
        Ok(())
    }

    fn alloc(&mut self, index: usize, size: usize) {
        let ptr = self.pool.pool_alloc(size);
        self.state_hasher.update(b"A");
        self.state_hasher.update(&encode(size));
        self.state_hasher.update(&encode_ptr(ptr));

        match ptr {
            Some(ptr) => {
                let fill = fill_byte(index);
                if let Some(data) = self.pool.data_mut(ptr) {
                    data.fill(fill);
                }
                self.live.push(LiveBlock { ptr, fill });
                self.summary.allocations += 1;
            }
            None => self.summary.failed_allocations += 1,
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_alloc(size, ptr.is_some());
        }
    }

    fn free(&mut self, index: usize, slot: usize) -> Result<(), SimulationError> {
        if slot >= self.live.len() {
            return Ok(());
        }
        let block = self.live.swap_remove(slot);
        let offset = block.ptr.offset();

        let intact = self
            .pool
            .data(block.ptr)
            .is_some_and(|data| data.iter().all(|&byte| byte == block.fill));
        if !intact {
            return Err(SimulationError::Corruption { op: index, offset });
        }

        let accepted = self.pool.pool_free(Some(block.ptr));
        if let Some(metrics) = &self.metrics {
            metrics.record_free(accepted);
        }
        if !accepted {
            return Err(SimulationError::FreeDeclined { op: index, offset });
        }
        self.state_hasher.update(b"F");
        self.state_hasher.update(&encode(offset));
        self.summary.frees += 1;
        Ok(())
    }

    fn foreign_free(&mut self, index: usize, kind: ForeignPointer) -> Result<(), SimulationError> {
        let ptr = kind.generate(&mut self.rng, &self.pool);
        let accepted = self.pool.pool_free(ptr);
        if let Some(metrics) = &self.metrics {
            metrics.record_free(accepted);
        }
        if accepted {
            return Err(SimulationError::ForeignFreeAccepted {
                op: index,
                offset: ptr.map(PoolPtr::offset),
            });
        }
        self.state_hasher.update(b"X");
        self.state_hasher.update(&encode_ptr(ptr));
        self.summary.foreign_frees += 1;
        Ok(())
    }
}

/// Compares a run digest against an expected one, ignoring case.
pub fn check_digest(expected: &str, actual: &str) -> Result<(), SimulationError> {
    if expected.eq_ignore_ascii_case(actual) {
        Ok(())
    } else {
        Err(SimulationError::HashMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), SimulationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimulationError::InvalidProbability { name, value })
    }
}

fn encode(value: usize) -> [u8; 8] {
    (value as u64).to_le_bytes()
}

fn encode_ptr(ptr: Option<PoolPtr>) -> [u8; 8] {
    ptr.map_or(u64::MAX.to_le_bytes(), |ptr| encode(ptr.offset()))
}

/// Never zero, so a freshly zeroed block never passes as intact.
fn fill_byte(index: usize) -> u8 {
    (index % 255) as u8 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    fn pool_config(pool_size: usize) -> PoolConfig {
        PoolConfig {
            pool_size,
            granularity: 8,
        }
    }

    fn workload(chaos_probability: f64) -> SimulatorConfig {
        SimulatorConfig {
            max_alloc: 512,
            chaos_probability,
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn test_simulator_runs() {
        let mut simulator = Simulator::new(42, pool_config(64 * 1024)).unwrap();
        let hash = simulator.run(50).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(simulator.summary().operations, 50);
    }

    #[test]
    fn test_same_seed_same_digest() {
        let run = |seed| {
            Simulator::new(seed, pool_config(16 * 1024))
                .unwrap()
                .with_workload(&workload(0.1))
                .unwrap()
                .run(2_000)
                .unwrap()
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn test_granularity_changes_digest() {
        let run = |granularity| {
            let pool = PoolConfig {
                pool_size: 16 * 1024,
                granularity,
            };
            Simulator::new(1, pool).unwrap().run(500).unwrap()
        };
        assert_ne!(run(8), run(64));
    }

    #[test]
    fn test_validated_run_under_pressure() {
        let mut simulator = Simulator::new(3, pool_config(4096))
            .unwrap()
            .with_workload(&workload(0.0))
            .unwrap()
            .with_validation(true);
        simulator.run(3_000).unwrap();

        let summary = simulator.summary();
        assert!(summary.failed_allocations > 0);
        assert!(summary.frees > 0);
        assert_eq!(summary.allocations - summary.frees, summary.live_blocks);
        assert!(summary.final_lwm <= simulator.pool().largest_free_size());
    }

    #[test]
    fn test_chaos_frees_are_declined() {
        let mut simulator = Simulator::new(11, pool_config(8192))
            .unwrap()
            .with_workload(&workload(0.3))
            .unwrap()
            .with_validation(true);
        simulator.run(1_000).unwrap();
        let summary = simulator.summary();
        assert!(summary.foreign_frees > 0);
        assert_eq!(
            summary.allocations + summary.failed_allocations + summary.frees + summary.foreign_frees,
            summary.operations
        );
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let bad = SimulatorConfig {
            free_probability: 1.5,
            ..SimulatorConfig::default()
        };
        let result = Simulator::new(1, pool_config(4096)).unwrap().with_workload(&bad);
        assert!(matches!(
            result,
            Err(SimulationError::InvalidProbability { name: "free", .. })
        ));
    }

    #[test]
    fn test_pool_too_small_rejected() {
        assert!(matches!(
            Simulator::new(1, pool_config(8)),
            Err(SimulationError::Pool(_))
        ));
    }

    #[test]
    fn test_check_digest() {
        assert!(check_digest("ABCDEF", "abcdef").is_ok());
        assert!(matches!(
            check_digest("00", "01"),
            Err(SimulationError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_metrics_follow_summary() {
        let metrics = MetricsRecorder::new().unwrap();
        let mut simulator = Simulator::new(5, pool_config(4096))
            .unwrap()
            .with_workload(&workload(0.2))
            .unwrap()
            .with_metrics(metrics);
        simulator.run(500).unwrap();

        let summary = simulator.summary();
        let metrics = simulator.metrics().unwrap();
        assert_eq!(metrics.allocations.get() as usize, summary.allocations);
        assert_eq!(metrics.failed_allocations.get() as usize, summary.failed_allocations);
        assert_eq!(metrics.frees.get() as usize, summary.frees);
        assert_eq!(metrics.rejected_frees.get() as usize, summary.foreign_frees);
        assert_eq!(metrics.lwm_free_bytes.get() as usize, summary.final_lwm);
    }

    #[test]
    fn test_from_config_uses_seed() {
        let mut config = SafepoolConfig::default();
        config.pool.pool_size = 8192;
        config.simulator.seed = 99;
        let from_config = Simulator::from_config(&config).unwrap().run(200).unwrap();
        let direct = Simulator::new(99, config.pool.clone())
            .unwrap()
            .with_workload(&config.simulator)
            .unwrap()
            .run(200)
            .unwrap();
        assert_eq!(from_config, direct);
    }

    #[traced_test]
    #[test]
    fn test_run_logs_summary() {
        Simulator::new(2, pool_config(4096)).unwrap().run(10).unwrap();
        assert!(logs_contain("simulation complete"));
    }

    proptest! {
        #[test]
        fn validated_runs_never_fail(seed in any::<u64>(), pool_size in 64usize..8192, chaos in 0.0f64..0.5) {
            let mut simulator = Simulator::new(seed, pool_config(pool_size))
                .unwrap()
                .with_workload(&workload(chaos))
                .unwrap()
                .with_validation(true);
            prop_assert!(simulator.run(300).is_ok());
        }
    }
}
