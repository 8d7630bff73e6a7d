use crate::model::chart::{measure_number_for_row, row_for_measure};
use crate::model::config::AccumulationMode;
use crate::model::timing::TimingOracle;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Measure {
    pub start_time: f64,
    pub end_time: f64,
    /// Non-fake steps in the measure. A jump counts twice.
    pub step_count: i32,
    /// Rows in the measure holding at least one step.
    pub row_count: i32,
}

impl Measure {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn count(&self, mode: AccumulationMode) -> i32 {
        match mode {
            AccumulationMode::Steps => self.step_count,
            AccumulationMode::Rows => self.row_count,
        }
    }

    /// Counted events per second, or `None` for a measure that takes no time.
    pub fn rate(&self, mode: AccumulationMode) -> Option<f64> {
        let duration = self.duration();
        if duration > 0.0 && duration.is_finite() {
            Some(self.count(mode) as f64 / duration)
        } else {
            None
        }
    }
}

/// Highest per-measure rate, skipping measures that take no time.
pub fn peak_rate(measures: &[Measure], mode: AccumulationMode) -> f64 {
    measures
        .iter()
        .filter_map(|m| m.rate(mode))
        .fold(0.0, f64::max)
}

/// One record per measure, from measure 0 through the measure holding the chart's end row.
#[derive(Debug, Clone, Default)]
pub struct MeasureTimeline {
    measures: Vec<Measure>,
}

impl MeasureTimeline {
    pub fn new<T: TimingOracle>(chart_end_row: i64, timing: &T) -> Self {
        let mut timeline = Self::default();
        timeline.resize(chart_end_row, timing);
        timeline
    }

    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    pub fn get_mut(&mut self, measure: usize) -> Option<&mut Measure> {
        self.measures.get_mut(measure)
    }

    /// Returns whether the number of measures changed.
    pub fn resize<T: TimingOracle>(&mut self, chart_end_row: i64, timing: &T) -> bool {
        let wanted = measure_number_for_row(chart_end_row) + 1;
        let current = self.measures.len();
        if wanted == current {
            return false;
        }

        if wanted < current {
            self.measures.truncate(wanted);
        } else {
            self.measures.reserve(wanted - current);
            for measure in current..wanted {
                self.measures.push(Measure {
                    start_time: timing.row_to_time(row_for_measure(measure)),
                    end_time: timing.row_to_time(row_for_measure(measure + 1)),
                    step_count: 0,
                    row_count: 0,
                });
            }
        }
        true
    }

    /// Grows the timeline so that `row` has a measure. Never shrinks.
    pub fn ensure_row<T: TimingOracle>(&mut self, row: i64, timing: &T) -> bool {
        if measure_number_for_row(row) < self.measures.len() {
            return false;
        }
        self.resize(row, timing)
    }

    pub fn recompute_timing<T: TimingOracle>(&mut self, timing: &T) {
        let mut start = timing.row_to_time(0);
        for (number, measure) in self.measures.iter_mut().enumerate() {
            let end = timing.row_to_time(row_for_measure(number + 1));
            measure.start_time = start;
            measure.end_time = end;
            start = end;
        }
    }

    pub fn clear_counts(&mut self) {
        for measure in self.measures.iter_mut() {
            measure.step_count = 0;
            measure.row_count = 0;
        }
    }

    /// Time the last measure ends.
    pub fn final_time(&self) -> f64 {
        self.measures.last().map(|m| m.end_time).unwrap_or(0.0)
    }
}
