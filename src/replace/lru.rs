use std::collections::{TryReserveError, VecDeque};

use crate::cache::Line;

use super::Replace;

/// Textbook LRU: hits move a way to the front of its set's recency queue.
pub struct Lru {
    ru_order: Vec<VecDeque<usize>>,
}

impl Lru {
    /// Queues start empty and grow as ways are installed.
    pub fn new(n_sets: usize) -> Result<Self, TryReserveError> {
        let mut ru_order = Vec::new();
        ru_order.try_reserve_exact(n_sets)?;
        ru_order.resize_with(n_sets, VecDeque::new);
        Ok(Lru { ru_order })
    }

    fn move_to_front(&mut self, set: usize, way: usize) {
        let queue = &mut self.ru_order[set];
        if let Some(idx) = queue.iter().position(|&w| w == way) {
            queue.remove(idx);
        }
        queue.push_front(way);
    }
}

impl Replace for Lru {
    fn hit(&mut self, set: usize, way: usize) {
        self.move_to_front(set, way);
    }

    fn install(&mut self, set: usize, way: usize) {
        self.move_to_front(set, way);
    }

    fn victim(&mut self, set: usize, _lines: &[Line]) -> usize {
        self.ru_order[set].back().copied().unwrap_or(0)
    }
}
