use crate::model::config::StreamConfig;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// An inclusive range of measures that are all dense enough to be stream.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamInterval {
    pub start: usize,
    pub end: usize,
}

impl StreamInterval {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn single(measure: usize) -> Self {
        Self::new(measure, measure)
    }

    /// Length in measures.
    pub fn length(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, measure: usize) -> bool {
        self.start <= measure && measure <= self.end
    }

    /// Overlapping or adjacent.
    pub fn touches(&self, other: &StreamInterval) -> bool {
        self.start <= other.end.saturating_add(1) && other.start <= self.end.saturating_add(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Batch {
    #[default]
    Idle,
    Adding,
    Deleting,
}

/// The set of streams in a chart, kept up to date one measure at a time.
///
/// Stored intervals never overlap and never touch: two streams separated by no break are always
/// a single interval. The add and remove paths rely on this, which is why a point query can
/// return at most one interval. If an upstream bug ever stored two adjacent intervals on the same
/// side of a measure, `add_stream_measure` would merge with only one of them.
#[derive(Debug, Clone, Default)]
pub struct StreamIntervalIndex {
    // start -> end
    intervals: BTreeMap<usize, usize>,
    batch: Batch,
}

impl StreamIntervalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
        self.batch = Batch::Idle;
    }

    /// Intervals in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = StreamInterval> + '_ {
        self.intervals
            .iter()
            .map(|(&start, &end)| StreamInterval { start, end })
    }

    pub fn intervals(&self) -> Vec<StreamInterval> {
        self.iter().collect()
    }

    pub fn find_overlapping(&self, measure: usize) -> Option<StreamInterval> {
        self.intervals
            .range(..=measure)
            .next_back()
            .filter(|(_, end)| **end >= measure)
            .map(|(&start, &end)| StreamInterval { start, end })
    }

    /// Stores `interval`, refusing it if it would touch a stored one.
    pub fn insert(&mut self, interval: StreamInterval) -> bool {
        let before = self
            .intervals
            .range(..=interval.end.saturating_add(1))
            .next_back()
            .map(|(&start, &end)| StreamInterval { start, end });

        if let Some(existing) = before
            && existing.touches(&interval)
        {
            invariant_violation(format_args!(
                "stream {:?} touches stored stream {:?}",
                interval, existing
            ));
            return false;
        }

        self.intervals.insert(interval.start, interval.end);
        true
    }

    pub fn delete(&mut self, interval: StreamInterval) -> bool {
        match self.intervals.get(&interval.start) {
            Some(&end) if end == interval.end => {
                self.intervals.remove(&interval.start);
                true
            }
            _ => {
                invariant_violation(format_args!("no stored stream {:?} to delete", interval));
                false
            }
        }
    }

    pub fn begin_add(&mut self) {
        debug_assert_eq!(self.batch, Batch::Idle, "unbalanced stream batch");
        self.batch = Batch::Adding;
    }

    pub fn end_add(&mut self) {
        debug_assert_eq!(self.batch, Batch::Adding, "unbalanced stream batch");
        self.batch = Batch::Idle;
    }

    pub fn begin_delete(&mut self) {
        debug_assert_eq!(self.batch, Batch::Idle, "unbalanced stream batch");
        self.batch = Batch::Deleting;
    }

    pub fn end_delete(&mut self) {
        debug_assert_eq!(self.batch, Batch::Deleting, "unbalanced stream batch");
        self.batch = Batch::Idle;
    }

    /// `measure` just became dense enough to be stream.
    pub fn add_stream_measure(&mut self, measure: usize) {
        debug_assert_ne!(self.batch, Batch::Deleting);

        if let Some(existing) = self.find_overlapping(measure) {
            invariant_violation(format_args!(
                "measure {} is already part of stream {:?}",
                measure, existing
            ));
            return;
        }

        let preceding = measure
            .checked_sub(1)
            .and_then(|m| self.find_overlapping(m));
        let following = measure
            .checked_add(1)
            .and_then(|m| self.find_overlapping(m));

        let merged = match (preceding, following) {
            (Some(p), Some(f)) => {
                self.intervals.remove(&p.start);
                self.intervals.remove(&f.start);
                StreamInterval::new(p.start, f.end)
            }
            (Some(p), None) => {
                self.intervals.remove(&p.start);
                StreamInterval::new(p.start, measure)
            }
            (None, Some(f)) => {
                self.intervals.remove(&f.start);
                StreamInterval::new(measure, f.end)
            }
            (None, None) => StreamInterval::single(measure),
        };

        self.intervals.insert(merged.start, merged.end);
    }

    /// `measure` just dropped below the stream threshold, breaking the stream it was part of.
    pub fn remove_stream_measure(&mut self, measure: usize) {
        debug_assert_ne!(self.batch, Batch::Adding);

        let Some(existing) = self.find_overlapping(measure) else {
            invariant_violation(format_args!("measure {} is not part of any stream", measure));
            return;
        };

        self.intervals.remove(&existing.start);

        if existing.start < measure {
            self.intervals.insert(existing.start, measure - 1);
        }
        if measure < existing.end {
            self.intervals.insert(measure + 1, existing.end);
        }
    }

    /// Formats the streams as e.g. `16-8|32`: stream lengths in measures, separated by break marks.
    ///
    /// Streams shorter than the configured minimum are skipped and do not split breaks.
    pub fn breakdown(&self, config: &StreamConfig) -> String {
        let mut breakdown = String::new();
        let mut previous_end: Option<usize> = None;

        for interval in self.iter() {
            let length = interval.length();
            if (length as i64) < config.minimum_length_measures as i64 {
                continue;
            }

            if let Some(previous_end) = previous_end {
                let break_length = interval.start - (previous_end + 1);
                if break_length as i64 <= config.short_break_cutoff as i64 {
                    breakdown.push(config.short_break_character);
                } else if config.show_break_lengths {
                    let _ = write!(breakdown, "({})", break_length);
                } else {
                    breakdown.push(config.long_break_character);
                }
            }

            let _ = write!(breakdown, "{}", length);
            previous_end = Some(interval.end);
        }

        breakdown
    }

    /// Whether every stored pair of intervals is separated by at least one measure.
    pub fn is_well_formed(&self) -> bool {
        let intervals = self.intervals();
        intervals.iter().all(|i| i.start <= i.end)
            && intervals.windows(2).all(|pair| pair[0].end + 1 < pair[1].start)
    }
}

fn invariant_violation(args: std::fmt::Arguments<'_>) {
    debug_assert!(false, "stream index invariant violated: {}", args);
    warn!("Stream index invariant violated, skipping update: {}..!", args);
}
