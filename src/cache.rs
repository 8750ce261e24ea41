use std::{mem, ops::Range};

use serde::Serialize;

use crate::{
    error::ConfigError,
    replace::{AccessResult, Replace},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub offset: u64,
    pub set: usize,
    pub tag: u64,
}

#[derive(Debug)]
pub struct BitSection {
    shift: u32,
    mask: u64,
}

impl BitSection {
    fn apply(&self, num: u64) -> u64 {
        (num >> self.shift) & self.mask
    }
}

/// Upper bound on `S * E`; far beyond any real cache.
const MAX_LINES: u64 = 1 << 32;

/// Shape of a cache: `2^s` sets of `E` lines with `2^b` byte blocks.
///
/// Construction is the only place the configuration is validated, so a
/// `Geometry` in hand always decodes addresses without shift overflow.
#[derive(Debug)]
pub struct Geometry {
    set_bits: u32,
    pub block_bits: u32,
    pub n_sets: usize,
    pub n_ways: usize,
    offset_sec: BitSection,
    set_sec: BitSection,
    tag_sec: BitSection,
}

impl Geometry {
    pub fn new(set_bits: u32, block_bits: u32, n_ways: usize) -> Result<Self, ConfigError> {
        if n_ways == 0 {
            return Err(ConfigError::ZeroAssociativity);
        }
        let tag_shift = set_bits.saturating_add(block_bits);
        if tag_shift >= u64::BITS {
            return Err(ConfigError::AddressBitsOverflow {
                set_bits,
                block_bits,
            });
        }

        let too_large = ConfigError::TooLarge {
            set_bits,
            lines_per_set: n_ways,
        };
        let line_bytes = mem::size_of::<Line>() as u64;
        let fits = (1u64 << set_bits)
            .checked_mul(n_ways as u64)
            .filter(|&n_lines| n_lines <= MAX_LINES)
            .and_then(|n_lines| n_lines.checked_mul(line_bytes))
            .is_some_and(|bytes| bytes <= isize::MAX as u64);
        if !fits {
            return Err(too_large);
        }
        let n_sets = usize::try_from(1u64 << set_bits).map_err(|_| too_large)?;

        Ok(Geometry {
            set_bits,
            block_bits,
            n_sets,
            n_ways,
            offset_sec: BitSection {
                shift: 0,
                mask: (1u64 << block_bits) - 1,
            },
            set_sec: BitSection {
                shift: block_bits,
                mask: (1u64 << set_bits) - 1,
            },
            tag_sec: BitSection {
                shift: tag_shift,
                mask: !0,
            },
        })
    }

    pub fn split_addr(&self, addr: u64) -> Addr {
        Addr {
            offset: self.offset_sec.apply(addr),
            // bounded by n_sets, which fits in usize
            set: self.set_sec.apply(addr) as usize,
            tag: self.tag_sec.apply(addr),
        }
    }

    pub fn block_size(&self) -> u64 {
        1 << self.block_bits
    }

    /// Error for a shape that passed validation but could not be allocated.
    pub fn too_large(&self) -> ConfigError {
        ConfigError::TooLarge {
            set_bits: self.set_bits,
            lines_per_set: self.n_ways,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessCounters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl AccessCounters {
    /// Counter increase since an `earlier` snapshot of the same run.
    pub fn since(&self, earlier: &AccessCounters) -> AccessCounters {
        AccessCounters {
            hits: self.hits - earlier.hits,
            misses: self.misses - earlier.misses,
            evictions: self.evictions - earlier.evictions,
        }
    }

    pub fn accesses(&self) -> u64 {
        self.hits + self.misses
    }
}

#[derive(Serialize)]
pub struct CacheStats {
    name: String,
    hits: u64,
    misses: u64,
    evictions: u64,
    miss_rate: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Line {
    pub valid: bool,
    pub tag: u64,
    pub timestamp: u64,
}

impl Line {
    fn install(&mut self, tag: u64, timestamp: u64) {
        self.valid = true;
        self.tag = tag;
        self.timestamp = timestamp;
    }
}

#[derive(Debug)]
pub struct Cache<R: Replace> {
    name: String,
    lines: Vec<Line>,
    geometry: Geometry,
    /// Logical clock, advanced once per install and never on a hit.
    clock: u64,
    counters: AccessCounters,
    pub repl: R,
}

impl<R: Replace> Cache<R> {
    pub fn new(name: String, geometry: Geometry, repl: R) -> Result<Self, ConfigError> {
        let n_lines = geometry.n_sets * geometry.n_ways;
        let mut lines = Vec::new();
        lines
            .try_reserve_exact(n_lines)
            .map_err(|_| geometry.too_large())?;
        lines.resize(n_lines, Line::default());

        Ok(Cache {
            name,
            lines,
            geometry,
            clock: 0,
            counters: AccessCounters::default(),
            repl,
        })
    }

    fn get_set(&self, set: usize) -> Range<usize> {
        set * self.geometry.n_ways..(set + 1) * self.geometry.n_ways
    }

    #[cfg(test)]
    pub fn set_lines(&self, set: usize) -> &[Line] {
        &self.lines[self.get_set(set)]
    }
}

pub trait IsCache {
    /// Look `addr` up, installing it on a miss and evicting if its set is full.
    fn access(&mut self, addr: u64) -> AccessResult;
    fn counters(&self) -> AccessCounters;
    fn geometry(&self) -> &Geometry;
    /// Number of valid lines over all sets.
    fn occupancy(&self) -> usize;
    fn make_stats(&self) -> CacheStats;
}

impl<R: Replace> IsCache for Cache<R> {
    fn access(&mut self, addr: u64) -> AccessResult {
        let addr = self.geometry.split_addr(addr);
        log::trace!(
            "access set {} tag {:#x} offset {:#x}",
            addr.set,
            addr.tag,
            addr.offset
        );
        let set_range = self.get_set(addr.set);
        let set_slice = &mut self.lines[set_range];

        if let Some(way) = set_slice
            .iter()
            .position(|line| line.valid && line.tag == addr.tag)
        {
            self.counters.hits += 1;
            self.repl.hit(addr.set, way);
            log::trace!("hit in way {way}");
            return AccessResult::Hit;
        }

        self.counters.misses += 1;
        let (way, result) = match set_slice.iter().position(|line| !line.valid) {
            Some(way) => (way, AccessResult::Miss),
            None => {
                self.counters.evictions += 1;
                let way = self.repl.victim(addr.set, set_slice);
                (way, AccessResult::MissWithEviction)
            }
        };
        set_slice[way].install(addr.tag, self.clock);
        self.clock += 1;
        self.repl.install(addr.set, way);
        log::trace!("{result:?}, installed in way {way}");
        result
    }

    fn counters(&self) -> AccessCounters {
        self.counters
    }

    fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn occupancy(&self) -> usize {
        self.lines.iter().filter(|line| line.valid).count()
    }

    fn make_stats(&self) -> CacheStats {
        let total_access = self.counters.accesses();
        let miss_rate = if total_access == 0 {
            0.0
        } else {
            self.counters.misses as f64 / total_access as f64
        };

        CacheStats {
            name: self.name.clone(),
            hits: self.counters.hits,
            misses: self.counters.misses,
            evictions: self.counters.evictions,
            miss_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessCounters, Cache, Geometry, IsCache};
    use crate::{
        error::ConfigError,
        replace::{fifo::Fifo, lru::Lru, AccessResult},
    };
    use pretty_assertions::assert_eq;

    fn fifo_cache(set_bits: u32, block_bits: u32, n_ways: usize) -> Cache<Fifo> {
        let geometry = Geometry::new(set_bits, block_bits, n_ways).unwrap();
        Cache::new("test".to_string(), geometry, Fifo::new()).unwrap()
    }

    fn counters(hits: u64, misses: u64, evictions: u64) -> AccessCounters {
        AccessCounters {
            hits,
            misses,
            evictions,
        }
    }

    #[test]
    fn split_addr_reassembles() {
        let geometry = Geometry::new(4, 5, 1).unwrap();
        for addr in [0, 1, 0x1f, 0x20, 0x7ff0_0012_3456, u64::MAX] {
            let split = geometry.split_addr(addr);
            assert!(split.offset < geometry.block_size());
            assert!(split.set < geometry.n_sets);
            assert_eq!(
                (split.tag << 9) | ((split.set as u64) << 5) | split.offset,
                addr
            );
        }
    }

    #[test]
    fn split_addr_middle_bits_select_the_set() {
        let geometry = Geometry::new(2, 4, 1).unwrap();
        let split = geometry.split_addr(0b1011_10_0110);
        assert_eq!(split.offset, 0b0110);
        assert_eq!(split.set, 0b10);
        assert_eq!(split.tag, 0b1011);
    }

    #[test]
    fn zero_widths_use_whole_address_as_tag() {
        let geometry = Geometry::new(0, 0, 1).unwrap();
        let split = geometry.split_addr(0xdead_beef);
        assert_eq!((split.tag, split.set, split.offset), (0xdead_beef, 0, 0));
    }

    #[test]
    fn rejects_address_bits_overflow() {
        assert!(matches!(
            Geometry::new(40, 24, 1),
            Err(ConfigError::AddressBitsOverflow {
                set_bits: 40,
                block_bits: 24
            })
        ));
        assert!(matches!(
            Geometry::new(u32::MAX, 1, 1),
            Err(ConfigError::AddressBitsOverflow { .. })
        ));
        let geometry = Geometry::new(0, 63, 1).unwrap();
        assert_eq!(geometry.split_addr(u64::MAX).tag, 1);
    }

    #[test]
    fn rejects_shapes_too_large_to_allocate() {
        // each passes the s + b < 64 check
        for (set_bits, block_bits, n_ways) in [(62, 1, 1), (40, 1, 1), (20, 4, 1 << 13)] {
            assert!(
                matches!(
                    Geometry::new(set_bits, block_bits, n_ways),
                    Err(ConfigError::TooLarge { .. })
                ),
                "s={set_bits} b={block_bits} E={n_ways}"
            );
        }
        assert!(matches!(
            Geometry::new(0, 0, usize::MAX),
            Err(ConfigError::TooLarge { .. })
        ));
        let geometry = Geometry::new(16, 4, 1 << 16).unwrap();
        assert_eq!(geometry.n_sets, 1 << 16);
    }

    #[test]
    fn rejects_zero_associativity() {
        assert!(matches!(
            Geometry::new(1, 1, 0),
            Err(ConfigError::ZeroAssociativity)
        ));
    }

    #[test]
    fn independent_sets_keep_their_lines() {
        // 2 and 0 differ in bit 1, the only set-index bit
        let mut cache = fifo_cache(1, 1, 1);
        assert_eq!(cache.access(0), AccessResult::Miss);
        assert_eq!(cache.access(2), AccessResult::Miss);
        assert_eq!(cache.access(0), AccessResult::Hit);
        assert_eq!(cache.counters(), counters(1, 2, 0));
    }

    #[test]
    fn same_set_conflicts_in_direct_mapped_cache() {
        // 0 and 8 share set 0 with s=1, b=1 (tags 0 and 2)
        let mut cache = fifo_cache(1, 1, 1);
        assert_eq!(cache.access(0), AccessResult::Miss);
        assert_eq!(cache.access(8), AccessResult::MissWithEviction);
        assert_eq!(cache.access(0), AccessResult::MissWithEviction);
        assert_eq!(cache.counters(), counters(0, 3, 2));
    }

    #[test]
    fn single_line_cache_evicts_every_new_address() {
        let mut cache = fifo_cache(0, 0, 1);
        assert_eq!(cache.access(0x10), AccessResult::Miss);
        assert_eq!(cache.access(0x20), AccessResult::MissWithEviction);
        assert_eq!(cache.access(0x30), AccessResult::MissWithEviction);
        assert_eq!(cache.counters(), counters(0, 3, 2));
    }

    #[test]
    fn fills_invalid_lines_before_evicting() {
        let mut cache = fifo_cache(0, 4, 4);
        for addr in [0x00, 0x10, 0x20, 0x30] {
            assert_eq!(cache.access(addr), AccessResult::Miss);
        }
        assert_eq!(cache.access(0x40), AccessResult::MissWithEviction);
        assert_eq!(cache.occupancy(), 4);
    }

    #[test]
    fn hits_within_block_share_a_line() {
        let mut cache = fifo_cache(2, 4, 1);
        assert_eq!(cache.access(0x100), AccessResult::Miss);
        assert_eq!(cache.access(0x10f), AccessResult::Hit);
        assert_eq!(cache.access(0x110), AccessResult::Miss);
        assert_eq!(cache.counters(), counters(1, 2, 0));
    }

    // Hits never refresh recency under the default policy: A is still the
    // oldest install when C arrives, even though it was just hit.
    #[test]
    fn hit_does_not_refresh_install_order() {
        let (a, b, c) = (0x100, 0x200, 0x300);
        let mut cache = fifo_cache(0, 0, 2);
        assert_eq!(cache.access(a), AccessResult::Miss);
        assert_eq!(cache.access(b), AccessResult::Miss);
        assert_eq!(cache.access(a), AccessResult::Hit);
        assert_eq!(cache.access(c), AccessResult::MissWithEviction);

        let tags: Vec<u64> = cache.set_lines(0).iter().map(|line| line.tag).collect();
        assert_eq!(tags, vec![c, b]);
        assert_eq!(cache.access(b), AccessResult::Hit);
        assert_eq!(cache.access(a), AccessResult::MissWithEviction);
    }

    #[test]
    fn lru_policy_refreshes_on_hit() {
        let (a, b, c) = (0x100, 0x200, 0x300);
        let geometry = Geometry::new(0, 0, 2).unwrap();
        let mut cache = Cache::new("lru".to_string(), geometry, Lru::new(1).unwrap()).unwrap();
        cache.access(a);
        cache.access(b);
        cache.access(a);
        assert_eq!(cache.access(c), AccessResult::MissWithEviction);

        let tags: Vec<u64> = cache.set_lines(0).iter().map(|line| line.tag).collect();
        assert_eq!(tags, vec![a, c]);
    }

    #[test]
    fn clock_advances_per_install_only() {
        let mut cache = fifo_cache(0, 0, 2);
        cache.access(1);
        cache.access(1);
        cache.access(1);
        cache.access(2);
        let stamps: Vec<u64> = cache
            .set_lines(0)
            .iter()
            .map(|line| line.timestamp)
            .collect();
        assert_eq!(stamps, vec![0, 1]);
    }

    #[test]
    fn random_trace_invariants() {
        let mut rng = fastrand::Rng::with_seed(7);
        let addrs: Vec<u64> = (0..5_000).map(|_| rng.u64(0..0x4000)).collect();

        let run = |addrs: &[u64]| {
            let mut cache = fifo_cache(3, 4, 4);
            for &addr in addrs {
                cache.access(addr);
                for set in 0..cache.geometry().n_sets {
                    let valid = cache.set_lines(set).iter().filter(|l| l.valid).count();
                    assert!(valid <= 4);
                }
            }
            cache.counters()
        };

        let first = run(&addrs);
        assert_eq!(first.accesses(), addrs.len() as u64);
        assert!(first.evictions <= first.misses);
        assert_eq!(run(&addrs), first);
    }

    #[test]
    fn stats_report_miss_rate() {
        let mut cache = fifo_cache(0, 0, 1);
        cache.access(1);
        cache.access(1);
        let stats = serde_json::to_value(cache.make_stats()).unwrap();
        assert_eq!(stats["name"], "test");
        assert_eq!(stats["hits"], 1);
        assert_eq!(stats["misses"], 1);
        assert_eq!(stats["evictions"], 0);
        assert_eq!(stats["miss_rate"], 0.5);
    }
}
