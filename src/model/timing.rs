use crate::model::chart::ROWS_PER_BEAT;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

const SECONDS_PER_MINUTE: f64 = 60.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// Maps chart rows to absolute time in seconds.
pub trait TimingOracle {
    fn row_to_time(&self, row: i64) -> f64;
}

impl<T: TimingOracle + ?Sized> TimingOracle for &T {
    fn row_to_time(&self, row: i64) -> f64 {
        (**self).row_to_time(row)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TempoChange {
    pub row: i64,
    pub bpm: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Stop {
    pub row: i64,
    pub seconds: f64,
}

#[derive(Debug, Clone, Copy)]
struct TimingSegment {
    row: i64,
    /// Time at `row` before any stop on that row.
    time: f64,
    seconds_per_row: f64,
    stop_seconds: f64,
}

/// Tempo changes and stops, resolved into segments so each lookup is a binary search.
///
/// Events on a stop's own row happen before the stop, later rows after it.
#[derive(Debug, Clone)]
pub struct TempoMap {
    offset_seconds: f64,
    tempo_changes: Vec<TempoChange>,
    stops: Vec<Stop>,
    segments: Vec<TimingSegment>,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::constant(DEFAULT_BPM)
    }
}

impl TempoMap {
    pub fn constant(bpm: f64) -> Self {
        Self::new(0.0, vec![TempoChange { row: 0, bpm }], Vec::new())
            .unwrap_or_else(|_| Self::empty())
    }

    fn empty() -> Self {
        let seconds_per_row = SECONDS_PER_MINUTE / DEFAULT_BPM / ROWS_PER_BEAT as f64;
        Self {
            offset_seconds: 0.0,
            tempo_changes: Vec::new(),
            stops: Vec::new(),
            segments: vec![TimingSegment {
                row: 0,
                time: 0.0,
                seconds_per_row,
                stop_seconds: 0.0,
            }],
        }
    }

    /// `offset_seconds` is the time of row 0.
    pub fn new(
        offset_seconds: f64,
        mut tempo_changes: Vec<TempoChange>,
        mut stops: Vec<Stop>,
    ) -> Result<Self> {
        if tempo_changes.is_empty() {
            bail!("A tempo map needs at least one tempo change..!");
        }
        if let Some(bad) = tempo_changes
            .iter()
            .find(|tc| !(tc.bpm.is_finite() && tc.bpm > 0.0))
        {
            bail!("Invalid BPM {} at row {}..!", bad.bpm, bad.row);
        }
        if let Some(bad) = stops
            .iter()
            .find(|s| !(s.seconds.is_finite() && s.seconds >= 0.0))
        {
            bail!("Invalid stop of {}s at row {}..!", bad.seconds, bad.row);
        }

        tempo_changes.sort_by_key(|tc| tc.row);
        stops.sort_by_key(|s| s.row);

        let mut map = Self {
            offset_seconds,
            tempo_changes,
            stops,
            segments: Vec::new(),
        };
        map.rebuild_segments();
        Ok(map)
    }

    fn rebuild_segments(&mut self) {
        let spr = |bpm: f64| SECONDS_PER_MINUTE / bpm / ROWS_PER_BEAT as f64;

        let mut rows: Vec<i64> = self
            .tempo_changes
            .iter()
            .map(|tc| tc.row)
            .chain(self.stops.iter().map(|s| s.row))
            .collect();
        rows.sort_unstable();
        rows.dedup();

        // the first tempo governs everything before it as well
        let first_rate = spr(self.tempo_changes[0].bpm);
        let first_row = rows.first().copied().unwrap_or(0).min(0);

        let mut segments = Vec::with_capacity(rows.len() + 1);
        let mut time = self.offset_seconds + first_row as f64 * first_rate;
        let mut last_row = first_row;
        let mut rate = first_rate;
        let mut pending_stop = 0.0;
        let mut tempo_iter = self.tempo_changes.iter().peekable();
        let mut stop_iter = self.stops.iter().peekable();

        if rows.first() != Some(&first_row) {
            segments.push(TimingSegment {
                row: first_row,
                time,
                seconds_per_row: rate,
                stop_seconds: 0.0,
            });
        }

        for row in rows {
            time += pending_stop + (row - last_row) as f64 * rate;

            while let Some(tc) = tempo_iter.next_if(|tc| tc.row == row) {
                rate = spr(tc.bpm);
            }
            let mut stop_seconds = 0.0;
            while let Some(stop) = stop_iter.next_if(|s| s.row == row) {
                stop_seconds += stop.seconds;
            }

            segments.push(TimingSegment {
                row,
                time,
                seconds_per_row: rate,
                stop_seconds,
            });

            last_row = row;
            pending_stop = stop_seconds;
        }

        self.segments = segments;
    }
}

impl TimingOracle for TempoMap {
    fn row_to_time(&self, row: i64) -> f64 {
        let index = self.segments.partition_point(|seg| seg.row <= row);
        let Some(segment) = self.segments.get(index.saturating_sub(1)) else {
            return self.offset_seconds;
        };

        let stop = if row > segment.row {
            segment.stop_seconds
        } else {
            0.0
        };
        segment.time + stop + (row - segment.row) as f64 * segment.seconds_per_row
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn constant_tempo() {
        let map = TempoMap::constant(120.0);
        // 120 bpm: one beat is half a second
        assert!(approx(map.row_to_time(0), 0.0));
        assert!(approx(map.row_to_time(48), 0.5));
        assert!(approx(map.row_to_time(192), 2.0));
        assert!(approx(map.row_to_time(-48), -0.5));
    }

    #[test]
    fn tempo_change_and_stop() {
        let map = TempoMap::new(
            1.0,
            vec![
                TempoChange { row: 0, bpm: 120.0 },
                TempoChange { row: 192, bpm: 240.0 },
            ],
            vec![Stop { row: 96, seconds: 0.75 }],
        )
        .unwrap();

        assert!(approx(map.row_to_time(0), 1.0));
        // the stop row itself is before the stop
        assert!(approx(map.row_to_time(96), 2.0));
        assert!(approx(map.row_to_time(144), 2.0 + 0.75 + 0.5));
        assert!(approx(map.row_to_time(192), 3.75));
        assert!(approx(map.row_to_time(240), 3.75 + 0.25));
    }

    #[test]
    fn rejects_bad_tempo() {
        assert!(TempoMap::new(0.0, vec![], vec![]).is_err());
        assert!(TempoMap::new(0.0, vec![TempoChange { row: 0, bpm: 0.0 }], vec![]).is_err());
        assert!(
            TempoMap::new(
                0.0,
                vec![TempoChange { row: 0, bpm: 100.0 }],
                vec![Stop { row: 4, seconds: -1.0 }]
            )
            .is_err()
        );
    }
}
