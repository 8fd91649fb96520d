//! Fleet fitness state shared between the refresh worker and the request
//! loop.
//!
//! One atomic cell per host, holding the bit pattern of the latest f64
//! fitness. The worker stores, the request loop loads; a load may observe
//! a value up to one refresh period old. Placement only needs a recent
//! ranking, not a coherent snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::info;

use swarm_common::ssh::Session;

/// Per-host fitness cells, index-aligned with the fleet host list.
pub struct FitnessBoard {
    cells: Vec<AtomicU64>,
}

impl FitnessBoard {
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicU64::new(0f64.to_bits())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn store(&self, index: usize, fitness: f64) {
        self.cells[index].store(fitness.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<f64> {
        self.cells
            .iter()
            .map(|cell| f64::from_bits(cell.load(Ordering::Relaxed)))
            .collect()
    }
}

/// The placement decision: index of the maximum fitness, strictly-greater
/// comparison, so ties and an all-zero board resolve to the lowest index.
pub fn best_index(fitness: &[f64]) -> usize {
    let mut best_index = 0;
    let mut best_fitness = 0.0;
    for (index, &fitness) in fitness.iter().enumerate() {
        if fitness > best_fitness {
            best_fitness = fitness;
            best_index = index;
        }
    }
    best_index
}

/// One refresh pass: probe every session and publish the scores.
pub fn refresh_pass(sessions: &[Session], board: &FitnessBoard, window_s: f64) {
    for (index, session) in sessions.iter().enumerate() {
        let sample = session.fitness(window_s);
        board.store(index, sample.fitness);
        info!(
            host = session.hostname(),
            cpu = sample.cpu_percent.map(i32::from).unwrap_or(-1),
            latency_ms = sample.latency_ms,
            fitness = sample.fitness,
            "fleet probe"
        );
    }
}

/// Sleep out the remainder of a refresh interval; never negative, and a
/// zero interval free-runs.
pub fn pace(started: Instant, interval: Duration) {
    if interval.is_zero() {
        return;
    }
    let elapsed = started.elapsed();
    if elapsed < interval {
        std::thread::sleep(interval - elapsed);
    }
}
