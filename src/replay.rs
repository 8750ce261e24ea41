use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::{
    cache::{AccessCounters, IsCache},
    error::TraceError,
    trace::{Entry, Record},
};

/// What to do with an `L`/`S`/`M` record whose address or size does not parse.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Fail the run.
    #[default]
    Reject,
    /// Drop the record without touching the cache.
    Skip,
}

/// Tokens describing how one record changed the counters.
///
/// An `M` record can produce both a miss-class token and a hit token.
pub fn outcome_tokens(delta: &AccessCounters) -> Vec<&'static str> {
    let mut tokens = Vec::with_capacity(2);
    if delta.misses > 0 && delta.evictions > 0 {
        tokens.push("miss eviction");
    } else if delta.misses > 0 {
        tokens.push("miss");
    }
    if delta.hits == 2 {
        tokens.push("hit hit");
    } else if delta.hits > 0 {
        tokens.push("hit");
    }
    tokens
}

pub struct Replayer<'a> {
    malformed: MalformedPolicy,
    diagnostics: Option<&'a mut dyn Write>,
    pub records: u64,
    pub skipped: u64,
}

impl<'a> Replayer<'a> {
    pub fn new(malformed: MalformedPolicy) -> Self {
        Replayer {
            malformed,
            diagnostics: None,
            records: 0,
            skipped: 0,
        }
    }

    /// Write one diagnostic line per replayed record to `out`.
    pub fn with_diagnostics(mut self, out: &'a mut dyn Write) -> Self {
        self.diagnostics = Some(out);
        self
    }

    pub fn replay<I>(
        &mut self,
        cache: &mut dyn IsCache,
        entries: I,
    ) -> Result<AccessCounters, TraceError>
    where
        I: IntoIterator<Item = Entry>,
    {
        for entry in entries {
            match entry {
                Ok(record) => self.step(cache, &record)?,
                Err(TraceError::Malformed { line, text })
                    if self.malformed == MalformedPolicy::Skip =>
                {
                    log::warn!("skipping malformed record on line {line}: {text:?}");
                    self.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }
        if let Some(out) = self.diagnostics.as_mut() {
            out.flush()?;
        }
        Ok(cache.counters())
    }

    /// Apply one record: one access for loads and stores, two for modifies.
    pub fn step(&mut self, cache: &mut dyn IsCache, record: &Record) -> Result<(), TraceError> {
        let before = cache.counters();
        for _ in 0..record.op.accesses() {
            cache.access(record.addr);
        }
        self.records += 1;

        if let Some(out) = self.diagnostics.as_mut() {
            let delta = cache.counters().since(&before);
            write!(out, "{record}")?;
            for token in outcome_tokens(&delta) {
                write!(out, " {token}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
