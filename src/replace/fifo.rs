use crate::cache::Line;

use super::Replace;

/// Evicts the line installed longest ago. Hits leave install order alone,
/// so a frequently hit line still ages out.
#[derive(Debug, Default)]
pub struct Fifo {}

impl Fifo {
    pub fn new() -> Self {
        Fifo {}
    }
}

impl Replace for Fifo {
    fn victim(&mut self, _set: usize, lines: &[Line]) -> usize {
        // min_by_key keeps the first of equal timestamps
        lines
            .iter()
            .enumerate()
            .min_by_key(|(_way, line)| line.timestamp)
            .map(|(way, _line)| way)
            .unwrap_or(0)
    }
}
