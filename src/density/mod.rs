pub mod measures;
pub mod streams;

use crate::model::chart::{DensityEvent, measure_number_for_row};
use crate::model::config::{AccumulationMode, NoteType, StreamConfig};
use crate::model::timing::TimingOracle;
use log::{debug, warn};
use measures::{Measure, MeasureTimeline, peak_rate};
use std::collections::BTreeMap;
use std::mem;
use streams::{StreamInterval, StreamIntervalIndex};

/// One add or delete that has reached the measure counts but not yet the stream index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDensityStep {
    pub is_add: bool,
    pub row: i64,
    /// Steps on `row` right after this add or delete.
    pub step_count_at_row: i32,
}

/// Step counts, streams and peak density of a chart, kept current while it is edited.
///
/// Adds and deletes update the measure counts right away but only reach the stream index on
/// [`StepDensity::commit_adds_and_deletes`], so call that once a batch of edits is done.
#[derive(Debug, Clone)]
pub struct StepDensity<T: TimingOracle> {
    config: StreamConfig,
    timing: T,
    timeline: MeasureTimeline,
    streams: StreamIntervalIndex,
    row_steps: BTreeMap<i64, i32>,
    /// Per measure row counts as the stream index last saw them.
    committed_rows: Vec<i32>,
    pending: Vec<PendingDensityStep>,
    measures_dirty: bool,
}

impl<T: TimingOracle> StepDensity<T> {
    pub fn new<E, I>(config: StreamConfig, timing: T, events: I, chart_end_row: i64) -> Self
    where
        E: DensityEvent,
        I: IntoIterator<Item = E>,
    {
        let timeline = MeasureTimeline::new(chart_end_row, &timing);
        let mut density = Self {
            config,
            timing,
            timeline,
            streams: StreamIntervalIndex::new(),
            row_steps: BTreeMap::new(),
            committed_rows: Vec::new(),
            pending: Vec::new(),
            measures_dirty: true,
        };
        density.rebuild(events);
        density
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn timing(&self) -> &T {
        &self.timing
    }

    pub fn measures(&self) -> &[Measure] {
        self.timeline.measures()
    }

    pub fn final_time(&self) -> f64 {
        self.timeline.final_time()
    }

    pub fn stream_intervals(&self) -> Vec<StreamInterval> {
        self.streams.intervals()
    }

    pub fn pending_steps(&self) -> &[PendingDensityStep] {
        &self.pending
    }

    /// Replaces all counts and streams with those of `events`.
    pub fn rebuild<E, I>(&mut self, events: I)
    where
        E: DensityEvent,
        I: IntoIterator<Item = E>,
    {
        self.timeline.clear_counts();
        self.row_steps.clear();

        for event in events {
            if !event.counts_as_step() {
                continue;
            }
            let row = event.row();
            self.timeline.ensure_row(row, &self.timing);
            let steps = self.row_steps.entry(row).or_insert(0);
            *steps += 1;
            let first_on_row = *steps == 1;
            if let Some(measure) = self.timeline.get_mut(measure_number_for_row(row)) {
                measure.step_count += 1;
                if first_on_row {
                    measure.row_count += 1;
                }
            }
        }

        self.measures_dirty = true;
        self.recompute_streams();
    }

    /// Rebuilds the stream index with one pass over the rows that hold steps.
    ///
    /// Needed when the stream threshold changes. Any pending steps are folded in since the
    /// measure counts already include them.
    pub fn recompute_streams(&mut self) {
        self.pending.clear();
        self.streams.clear();
        self.committed_rows.clear();
        self.committed_rows
            .extend(self.timeline.measures().iter().map(|m| m.row_count));

        let threshold = self.config.threshold();
        let mut open: Option<StreamInterval> = None;
        let mut current: Option<(usize, i32)> = None;

        for (&row, &steps) in self.row_steps.iter() {
            if steps <= 0 {
                continue;
            }
            let measure = measure_number_for_row(row);
            match current {
                Some((m, rows)) if m == measure => current = Some((m, rows + 1)),
                Some((m, rows)) => {
                    close_measure(&mut self.streams, &mut open, m, rows, threshold);
                    current = Some((measure, 1));
                }
                None => current = Some((measure, 1)),
            }
        }
        if let Some((m, rows)) = current {
            close_measure(&mut self.streams, &mut open, m, rows, threshold);
        }
        if let Some(interval) = open {
            self.streams.insert(interval);
        }

        debug!(
            "Recomputed streams: {} intervals at {} steps per measure",
            self.streams.len(),
            threshold
        );
    }

    pub fn recompute_measure_timing(&mut self) {
        self.timeline.recompute_timing(&self.timing);
        self.measures_dirty = true;
    }

    /// Swaps in new chart timing. Counts and streams are unaffected.
    pub fn set_timing(&mut self, timing: T) {
        self.timing = timing;
        self.recompute_measure_timing();
    }

    /// Resizes the measure timeline to end at `chart_end_row`.
    pub fn resize(&mut self, chart_end_row: i64) {
        self.commit_adds_and_deletes();
        if !self.timeline.resize(chart_end_row, &self.timing) {
            return;
        }
        self.measures_dirty = true;

        let len = self.timeline.measures().len();
        if self.committed_rows.len() > len {
            self.committed_rows.truncate(len);
            self.row_steps
                .retain(|&row, _| measure_number_for_row(row) < len);
            // streams past the new end refer to measures that are gone
            if self.streams.iter().any(|s| s.end >= len) {
                self.recompute_streams();
            }
        } else {
            self.committed_rows.resize(len, 0);
        }
    }

    pub fn set_stream_config(&mut self, config: StreamConfig) {
        let threshold_changed = config.threshold() != self.config.threshold();
        self.config = config;
        if threshold_changed {
            self.recompute_streams();
        }
    }

    pub fn set_note_type(&mut self, note_type: NoteType) {
        let config = StreamConfig {
            note_type,
            ..self.config.clone()
        };
        self.set_stream_config(config);
    }

    pub fn on_event_added<E: DensityEvent>(&mut self, event: E) {
        if !event.counts_as_step() {
            return;
        }

        let row = event.row();
        if self.timeline.ensure_row(row, &self.timing) {
            self.committed_rows.resize(self.timeline.measures().len(), 0);
        }

        let steps = self.row_steps.entry(row).or_insert(0);
        *steps += 1;
        let step_count_at_row = *steps;

        if let Some(measure) = self.timeline.get_mut(measure_number_for_row(row)) {
            measure.step_count += 1;
            if step_count_at_row == 1 {
                measure.row_count += 1;
            }
        }

        self.pending.push(PendingDensityStep {
            is_add: true,
            row,
            step_count_at_row,
        });
        self.measures_dirty = true;
    }

    pub fn on_event_deleted<E: DensityEvent>(&mut self, event: E) {
        if !event.counts_as_step() {
            return;
        }

        let row = event.row();
        let Some(steps) = self.row_steps.get_mut(&row) else {
            debug_assert!(false, "deleted a step on row {} that holds none", row);
            warn!("Deleted a step on row {} that holds none, ignoring..!", row);
            return;
        };
        *steps -= 1;
        let step_count_at_row = *steps;
        if step_count_at_row <= 0 {
            self.row_steps.remove(&row);
        }

        if let Some(measure) = self.timeline.get_mut(measure_number_for_row(row)) {
            measure.step_count -= 1;
            if step_count_at_row == 0 {
                measure.row_count -= 1;
            }
        }

        self.pending.push(PendingDensityStep {
            is_add: false,
            row,
            step_count_at_row,
        });
        self.measures_dirty = true;
    }

    /// A step changed between fake and real. `before` and `after` are the same event under its
    /// old and new classification.
    pub fn on_event_fake_toggled<E: DensityEvent>(&mut self, before: E, after: E) {
        self.on_event_deleted(before);
        self.on_event_added(after);
    }

    pub fn begin_add_events(&mut self) {
        self.streams.begin_add();
    }

    pub fn end_add_events(&mut self) {
        self.streams.end_add();
    }

    pub fn begin_delete_events(&mut self) {
        self.streams.begin_delete();
    }

    pub fn end_delete_events(&mut self) {
        self.streams.end_delete();
    }

    /// Applies every pending add and delete to the stream index, in the order they happened.
    pub fn commit_adds_and_deletes(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let pending = mem::take(&mut self.pending);
        let threshold = self.config.threshold();

        for run in pending.chunk_by(|a, b| a.is_add == b.is_add) {
            if run[0].is_add {
                self.begin_add_events();
                for step in run.iter().filter(|s| s.step_count_at_row == 1) {
                    self.commit_row_added(measure_number_for_row(step.row), threshold);
                }
                self.end_add_events();
            } else {
                self.begin_delete_events();
                for step in run.iter().filter(|s| s.step_count_at_row == 0) {
                    self.commit_row_removed(measure_number_for_row(step.row), threshold);
                }
                self.end_delete_events();
            }
        }

        debug!(
            "Committed {} density steps, {} streams",
            pending.len(),
            self.streams.len()
        );

        // hand the buffer back so the next batch reuses its capacity
        self.pending = pending;
        self.pending.clear();
    }

    fn commit_row_added(&mut self, measure: usize, threshold: i32) {
        let Some(rows) = self.committed_rows.get_mut(measure) else {
            return;
        };
        *rows += 1;
        if *rows == threshold {
            self.streams.add_stream_measure(measure);
        }
    }

    fn commit_row_removed(&mut self, measure: usize, threshold: i32) {
        let Some(rows) = self.committed_rows.get_mut(measure) else {
            return;
        };
        if *rows == threshold {
            self.streams.remove_stream_measure(measure);
        }
        *rows -= 1;
    }

    pub fn get_stream_breakdown(&self) -> String {
        self.streams.breakdown(&self.config)
    }

    pub fn get_peak_notes_per_second(&self) -> f64 {
        peak_rate(self.timeline.measures(), AccumulationMode::Steps)
    }

    pub fn get_peak_rows_per_second(&self) -> f64 {
        peak_rate(self.timeline.measures(), AccumulationMode::Rows)
    }

    /// Whether the measures changed since the last call.
    pub fn measures_dirty(&self) -> bool {
        self.measures_dirty
    }

    pub fn take_measures_dirty(&mut self) -> bool {
        mem::replace(&mut self.measures_dirty, false)
    }
}

fn close_measure(
    streams: &mut StreamIntervalIndex,
    open: &mut Option<StreamInterval>,
    measure: usize,
    rows: i32,
    threshold: i32,
) {
    if rows >= threshold {
        if let Some(interval) = open.as_mut().filter(|i| i.end + 1 == measure) {
            interval.end = measure;
            return;
        }
        if let Some(interval) = open.take() {
            streams.insert(interval);
        }
        *open = Some(StreamInterval::single(measure));
    } else if let Some(interval) = open.take() {
        streams.insert(interval);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::chart::{ChartEvent, EventKind, ROWS_PER_MEASURE};
    use crate::model::timing::TempoMap;

    const SIXTEENTH: i64 = ROWS_PER_MEASURE / 16;

    fn stream_measure(measure: i64) -> Vec<ChartEvent> {
        (0..16)
            .map(|i| ChartEvent::tap(measure * ROWS_PER_MEASURE + i * SIXTEENTH, (i % 4) as u8))
            .collect()
    }

    fn chart(stream_measures: impl IntoIterator<Item = i64>) -> Vec<ChartEvent> {
        stream_measures.into_iter().flat_map(stream_measure).collect()
    }

    fn density(events: &[ChartEvent], measures: i64) -> StepDensity<TempoMap> {
        StepDensity::new(
            StreamConfig::default(),
            TempoMap::constant(120.0),
            events,
            measures * ROWS_PER_MEASURE - 1,
        )
    }

    fn pairs(density: &StepDensity<TempoMap>) -> Vec<(usize, usize)> {
        density
            .stream_intervals()
            .iter()
            .map(|i| (i.start, i.end))
            .collect()
    }

    #[test]
    fn single_stream() {
        let density = density(&chart(0..10), 20);
        assert_eq!(density.measures().len(), 20);
        assert_eq!(pairs(&density), vec![(0, 9)]);
        assert_eq!(density.get_stream_breakdown(), "10");
    }

    #[test]
    fn break_then_resume() {
        let density = density(&chart((0..5).chain(7..12)), 12);
        assert_eq!(pairs(&density), vec![(0, 4), (7, 11)]);
        assert_eq!(density.get_stream_breakdown(), "5-5");
    }

    #[test]
    fn deleting_breaks_singleton_stream() {
        let events = stream_measure(3);
        let mut density = density(&events, 8);
        assert_eq!(pairs(&density), vec![(3, 3)]);

        density.on_event_deleted(&events[5]);
        density.commit_adds_and_deletes();
        assert!(density.stream_intervals().is_empty());
        assert_eq!(density.get_stream_breakdown(), "");
    }

    #[test]
    fn jumps_count_rows_once() {
        let events = stream_measure(0);
        let mut density = density(&events, 2);
        let jump = ChartEvent::tap(events[2].row, 3);

        density.on_event_added(jump);
        density.commit_adds_and_deletes();
        assert_eq!(density.measures()[0].step_count, 17);
        assert_eq!(density.measures()[0].row_count, 16);

        // the row still holds a step, so the stream survives
        density.on_event_deleted(&events[2]);
        density.commit_adds_and_deletes();
        assert_eq!(pairs(&density), vec![(0, 0)]);

        density.on_event_deleted(jump);
        density.commit_adds_and_deletes();
        assert!(density.stream_intervals().is_empty());
    }

    #[test]
    fn edits_wait_for_commit() {
        let mut density = density(&[], 4);
        for event in stream_measure(1) {
            density.on_event_added(event);
        }
        assert_eq!(density.measures()[1].row_count, 16);
        assert_eq!(density.pending_steps().len(), 16);
        assert!(density.stream_intervals().is_empty());

        density.commit_adds_and_deletes();
        assert!(density.pending_steps().is_empty());
        assert_eq!(pairs(&density), vec![(1, 1)]);
    }

    #[test]
    fn add_then_delete_restores_state() {
        let events = chart([0, 1, 3]);
        let mut density = density(&events, 6);
        let intervals = density.stream_intervals();
        let measures = density.measures().to_vec();

        let extra = ChartEvent::tap(2 * ROWS_PER_MEASURE + 6, 1);
        density.on_event_added(extra);
        density.on_event_deleted(extra);
        density.commit_adds_and_deletes();
        assert_eq!(density.stream_intervals(), intervals);
        assert_eq!(density.measures(), measures.as_slice());

        // same again with a commit in between
        density.on_event_deleted(&events[0]);
        density.commit_adds_and_deletes();
        assert_eq!(pairs(&density), vec![(1, 1), (3, 3)]);
        density.on_event_added(&events[0]);
        density.commit_adds_and_deletes();
        assert_eq!(density.stream_intervals(), intervals);
        assert_eq!(density.measures(), measures.as_slice());
    }

    #[test]
    fn filling_a_gap_merges_streams() {
        let mut density = density(&chart([0, 1, 3, 4]), 6);
        assert_eq!(density.get_stream_breakdown(), "2-2");

        for event in stream_measure(2) {
            density.on_event_added(event);
        }
        density.commit_adds_and_deletes();
        assert_eq!(pairs(&density), vec![(0, 4)]);
        assert_eq!(density.get_stream_breakdown(), "5");
    }

    #[test]
    fn fake_steps_never_count() {
        let mut density = density(&chart([0]), 2);
        let fake = ChartEvent::new(ROWS_PER_MEASURE + 12, 0, EventKind::Fake);
        density.on_event_added(fake);
        assert!(density.pending_steps().is_empty());
        assert_eq!(density.measures()[1].step_count, 0);

        let events = stream_measure(0);
        let target = events[7];
        density.on_event_fake_toggled(target, target.with_kind(EventKind::Fake));
        density.commit_adds_and_deletes();
        assert_eq!(density.measures()[0].step_count, 15);
        assert!(density.stream_intervals().is_empty());

        density.on_event_fake_toggled(target.with_kind(EventKind::Fake), target);
        density.commit_adds_and_deletes();
        assert_eq!(pairs(&density), vec![(0, 0)]);
    }

    #[test]
    fn note_type_change_recomputes() {
        let eighths: Vec<ChartEvent> = (0..8)
            .map(|i| ChartEvent::tap(i * ROWS_PER_MEASURE / 8, 0))
            .collect();
        let mut density = density(&eighths, 2);
        assert!(density.stream_intervals().is_empty());

        density.set_note_type(NoteType::Eighth);
        assert_eq!(pairs(&density), vec![(0, 0)]);

        // formatting only, no recompute needed
        density.set_stream_config(StreamConfig {
            show_break_lengths: true,
            ..density.config().clone()
        });
        assert_eq!(pairs(&density), vec![(0, 0)]);
    }

    #[test]
    fn timing_change_keeps_counts_and_streams() {
        let mut density = density(&chart([1]), 3);
        assert!((density.get_peak_notes_per_second() - 8.0).abs() < 1e-9);

        density.set_timing(TempoMap::constant(240.0));
        assert!((density.get_peak_notes_per_second() - 16.0).abs() < 1e-9);
        assert!((density.get_peak_rows_per_second() - 16.0).abs() < 1e-9);
        assert_eq!(pairs(&density), vec![(1, 1)]);
        assert!((density.final_time() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn adds_past_the_end_grow_the_timeline() {
        let mut density = density(&[], 1);
        for event in stream_measure(5) {
            density.on_event_added(event);
        }
        density.commit_adds_and_deletes();
        assert_eq!(density.measures().len(), 6);
        assert_eq!(pairs(&density), vec![(5, 5)]);

        for event in stream_measure(5) {
            density.on_event_deleted(event);
        }
        density.resize(0);
        assert_eq!(density.measures().len(), 1);
        assert!(density.stream_intervals().is_empty());
    }

    #[test]
    fn dirty_flag() {
        let mut density = density(&[], 2);
        assert!(density.take_measures_dirty());
        assert!(!density.take_measures_dirty());
        density.on_event_added(ChartEvent::tap(0, 0));
        assert!(density.take_measures_dirty());
    }

    /// xorshift, so the edit sequence is the same on every run
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }
    }

    #[test]
    fn incremental_matches_full_recompute() {
        env_logger::try_init().unwrap_or(());

        const MEASURES: i64 = 24;
        let config = StreamConfig {
            note_type: NoteType::Eighth,
            ..StreamConfig::default()
        };
        let mut density = StepDensity::new(
            config.clone(),
            TempoMap::constant(150.0),
            Vec::<ChartEvent>::new(),
            MEASURES * ROWS_PER_MEASURE - 1,
        );
        let mut live: Vec<ChartEvent> = Vec::new();
        let mut rng = Rng(0x9E37_79B9_7F4A_7C15);

        for op in 0..4000 {
            let remove = !live.is_empty() && rng.below(100) < 45;
            if remove {
                let index = rng.below(live.len() as u64) as usize;
                let event = live.swap_remove(index);
                density.on_event_deleted(event);
            } else {
                let row = rng.below((MEASURES * 16) as u64) as i64 * SIXTEENTH;
                let event = ChartEvent::tap(row, rng.below(4) as u8);
                live.push(event);
                density.on_event_added(event);
            }

            if op % 7 == 0 || rng.below(10) == 0 {
                density.commit_adds_and_deletes();

                let mut recomputed = density.clone();
                recomputed.recompute_streams();
                assert_eq!(density.stream_intervals(), recomputed.stream_intervals());

                let rebuilt = StepDensity::new(
                    config.clone(),
                    TempoMap::constant(150.0),
                    &live,
                    MEASURES * ROWS_PER_MEASURE - 1,
                );
                assert_eq!(density.stream_intervals(), rebuilt.stream_intervals());
                assert_eq!(density.measures(), rebuilt.measures());

                let intervals = density.stream_intervals();
                for pair in intervals.windows(2) {
                    assert!(pair[0].end + 1 < pair[1].start);
                }
            }
        }
    }
}
