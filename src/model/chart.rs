use serde::{Deserialize, Serialize};

/// Rows per beat in the chart's row-position space.
pub const ROWS_PER_BEAT: i64 = 48;

/// Rows per 4/4 measure.
pub const ROWS_PER_MEASURE: i64 = ROWS_PER_BEAT * 4;

pub fn measure_number_for_row(row: i64) -> usize {
    (row.max(0) / ROWS_PER_MEASURE) as usize
}

pub fn row_for_measure(measure: usize) -> i64 {
    measure as i64 * ROWS_PER_MEASURE
}

/// What the density tracking needs to know about a chart event.
pub trait DensityEvent {
    fn row(&self) -> i64;

    /// Whether the event asks the player to step on an arrow.
    fn is_step(&self) -> bool;

    /// Fake (non-judged) steps never count toward density or streams.
    fn is_fake(&self) -> bool;

    fn counts_as_step(&self) -> bool {
        self.is_step() && !self.is_fake()
    }
}

impl<E: DensityEvent + ?Sized> DensityEvent for &E {
    fn row(&self) -> i64 {
        (**self).row()
    }

    fn is_step(&self) -> bool {
        (**self).is_step()
    }

    fn is_fake(&self) -> bool {
        (**self).is_fake()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Tap,
    HoldStart,
    RollStart,
    Lift,
    Mine,
    Fake,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChartEvent {
    pub row: i64,
    pub lane: u8,
    pub kind: EventKind,
}

impl ChartEvent {
    pub fn new(row: i64, lane: u8, kind: EventKind) -> Self {
        Self { row, lane, kind }
    }

    pub fn tap(row: i64, lane: u8) -> Self {
        Self::new(row, lane, EventKind::Tap)
    }

    pub fn with_kind(self, kind: EventKind) -> Self {
        Self { kind, ..self }
    }
}

impl DensityEvent for ChartEvent {
    fn row(&self) -> i64 {
        self.row
    }

    fn is_step(&self) -> bool {
        !matches!(self.kind, EventKind::Mine)
    }

    fn is_fake(&self) -> bool {
        matches!(self.kind, EventKind::Fake)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChartMetadata {
    pub title: Option<String>,
    pub initial_bpm: Option<f64>,
}

/// Chart events, ordered by row once `sort_events` has run.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Chart {
    pub metadata: ChartMetadata,
    pub events: Vec<ChartEvent>,
}

impl Chart {
    pub fn sort_events(&mut self) {
        self.events.sort_by_key(|e| (e.row, e.lane));
    }

    /// The row of the last event, or 0 for an empty chart.
    pub fn end_row(&self) -> i64 {
        self.events.iter().map(|e| e.row).max().unwrap_or(0)
    }
}
