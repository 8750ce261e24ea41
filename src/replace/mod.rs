pub mod fifo;
pub mod lru;
pub mod nmru;

use crate::cache::Line;

/// Victim selection for a set that has no invalid line left.
///
/// The cache fills invalid lines on its own; a policy only sees hits and
/// installs, and is asked for a victim once every line of the set is valid.
pub trait Replace {
    fn hit(&mut self, _set: usize, _way: usize) {}

    fn install(&mut self, _set: usize, _way: usize) {}

    /// Way to evict from `lines`, all of which are valid.
    fn victim(&mut self, set: usize, lines: &[Line]) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResult {
    Hit,
    Miss,
    MissWithEviction,
}
