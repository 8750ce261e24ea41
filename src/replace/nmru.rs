use std::collections::TryReserveError;

use crate::cache::Line;

use super::Replace;

/// Evicts a random way other than the most recently used one.
pub struct Nmru {
    rng: fastrand::Rng,
    mru_way: Vec<usize>,
}

impl Nmru {
    /// Same seed, same victims: replays stay reproducible.
    pub fn new(n_sets: usize, seed: u64) -> Result<Self, TryReserveError> {
        let mut mru_way = Vec::new();
        mru_way.try_reserve_exact(n_sets)?;
        mru_way.resize(n_sets, 0);
        Ok(Nmru {
            rng: fastrand::Rng::with_seed(seed),
            mru_way,
        })
    }
}

impl Replace for Nmru {
    fn hit(&mut self, set: usize, way: usize) {
        self.mru_way[set] = way;
    }

    fn install(&mut self, set: usize, way: usize) {
        self.mru_way[set] = way;
    }

    fn victim(&mut self, set: usize, lines: &[Line]) -> usize {
        if lines.len() < 2 {
            return 0;
        }
        let mru_way = self.mru_way[set];
        let mut victim_way = self.rng.usize(0..(lines.len() - 1));
        if victim_way >= mru_way {
            victim_way += 1;
        }
        victim_way
    }
}
