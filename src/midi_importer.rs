use crate::model::chart::{Chart, ChartEvent, ChartMetadata, EventKind, ROWS_PER_BEAT};
use crate::model::timing::{TempoChange, TempoMap};
use anyhow::{Result, anyhow};
use log::{debug, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const DEFAULT_MPQN: u32 = 500_000;
const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
const LANES: u8 = 4;

/// Notes held at least this many rows become hold starts.
const HOLD_MIN_ROWS: i64 = ROWS_PER_BEAT;

#[derive(Debug, Clone)]
pub struct ImportedChart {
    pub chart: Chart,
    pub timing: TempoMap,
}

struct NoteSpan {
    midi: u8,
    start_tick: u64,
    end_tick: u64,
}

/// Reads a Standard MIDI File as a step chart: every note-on becomes a step on lane
/// `pitch % 4`, at a row derived from its tick position.
pub fn import_midi_file<P: AsRef<Path>>(path: P) -> Result<ImportedChart> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to read MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    midi_bytes_to_chart(&bytes, path.as_ref())
}

pub fn midi_bytes_to_chart(bytes: &[u8], source_path: &Path) -> Result<ImportedChart> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Failed to parse MIDI: {:?}", e))?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u64,
        Timing::Timecode(_fps, _subframe) => {
            return Err(anyhow!(
                "SMPTE timecode midi timing is not currently supported..!"
            ));
        }
    };
    if ticks_per_quarter == 0 {
        return Err(anyhow!("MIDI header has zero ticks per quarter note..!"));
    }

    debug!("Ticks per quarter note: {}", ticks_per_quarter);
    debug!(
        "MIDI format: {:?}, tracks: {}",
        smf.header.format,
        smf.tracks.len()
    );

    let tick_to_row = |tick: u64| -> i64 {
        ((tick as u128 * ROWS_PER_BEAT as u128 + ticks_per_quarter as u128 / 2)
            / ticks_per_quarter as u128) as i64
    };

    let mut tempo_changes: Vec<(u64, u32)> = vec![(0, DEFAULT_MPQN)];
    let mut spans: Vec<NoteSpan> = Vec::new();
    let mut open_notes: HashMap<(u8, u8), Vec<u64>> = HashMap::new();
    let mut track_name = String::new();

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut abs_tick: u64 = 0;
        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);

            match &event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(micro)) => {
                    tempo_changes.push((abs_tick, micro.as_int()));
                    debug!(
                        "Tempo change at tick {} -> {} us/qn (track {})",
                        abs_tick,
                        micro.as_int(),
                        track_idx
                    );
                }
                TrackEventKind::Meta(MetaMessage::TrackName(name)) if track_name.is_empty() => {
                    track_name = String::from_utf8_lossy(name).into_owned();
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open_notes
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push(abs_tick);
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            close_note(&mut open_notes, &mut spans, ch, key.as_int(), abs_tick);
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    for ((ch, key), stack) in open_notes.into_iter() {
        for start_tick in stack {
            warn!(
                "Unclosed NoteOn for {}, channel: {} at tick: {}, reading it as a tap..!",
                key, ch, start_tick
            );
            spans.push(NoteSpan {
                midi: key,
                start_tick,
                end_tick: start_tick,
            });
        }
    }

    // a later tempo on the same tick wins
    tempo_changes.sort_by_key(|(tick, _)| *tick);
    let mut tempo_by_row: Vec<TempoChange> = Vec::with_capacity(tempo_changes.len());
    for (tick, mpqn) in tempo_changes {
        if mpqn == 0 {
            warn!("Ignoring a zero tempo at tick {}..!", tick);
            continue;
        }
        let change = TempoChange {
            row: tick_to_row(tick),
            bpm: MICROSECONDS_PER_MINUTE / mpqn as f64,
        };
        match tempo_by_row.last_mut() {
            Some(last) if last.row == change.row => *last = change,
            _ => tempo_by_row.push(change),
        }
    }
    let initial_bpm = tempo_by_row.first().map(|tc| tc.bpm);
    let timing = TempoMap::new(0.0, tempo_by_row, Vec::new())?;

    let mut events: Vec<ChartEvent> = spans
        .into_iter()
        .map(|span| {
            let row = tick_to_row(span.start_tick);
            let held_rows = tick_to_row(span.end_tick) - row;
            let kind = if held_rows >= HOLD_MIN_ROWS {
                EventKind::HoldStart
            } else {
                EventKind::Tap
            };
            ChartEvent::new(row, span.midi % LANES, kind)
        })
        .collect();

    // one step per lane and row
    events.sort_by_key(|e| (e.row, e.lane, e.kind == EventKind::Tap));
    events.dedup_by_key(|e| (e.row, e.lane));

    let title = if track_name.is_empty() {
        source_path
            .file_name()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
    } else {
        Some(track_name)
    };

    let mut chart = Chart {
        metadata: ChartMetadata { title, initial_bpm },
        events,
    };
    chart.sort_events();

    Ok(ImportedChart { chart, timing })
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), Vec<u64>>,
    spans: &mut Vec<NoteSpan>,
    ch: u8,
    midi_num: u8,
    abs_tick: u64,
) {
    match open_notes
        .get_mut(&(ch, midi_num))
        .and_then(|stack| stack.pop())
    {
        Some(start_tick) => spans.push(NoteSpan {
            midi: midi_num,
            start_tick,
            end_tick: abs_tick,
        }),
        None => debug!(
            "Orphaned NoteOff for {} ch{} at tick {}..!",
            midi_num, ch, abs_tick
        ),
    }
}
