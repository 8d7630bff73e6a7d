use crate::model::color::Color;
use crate::util::{parse_accumulation, parse_color_mode, parse_note_type};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "step_density",
    about = "Print the stream breakdown and peak density of a MIDI file read as a step chart!"
)]
pub struct Args {
    /// Path to the source MIDI file.
    pub midi: PathBuf,

    /// Note type a measure must be full of to count as stream: 4th|8th|12th|16th|24th|32nd|48th|64th.
    #[arg(short, long, default_value = "16th")]
    pub note_type: String,

    /// Streams shorter than this many measures are left out of the breakdown.
    #[arg(long = "min-length", default_value_t = 1)]
    pub minimum_length_measures: i32,

    /// Breaks of at most this many measures are shown as the short break character.
    #[arg(long = "short-break", default_value_t = 4)]
    pub short_break_cutoff: i32,

    #[arg(long, default_value_t = '-')]
    pub short_break_character: char,

    #[arg(long, default_value_t = '|')]
    pub long_break_character: char,

    /// Show long breaks as "(N)" instead of the long break character.
    #[arg(long, default_value_t = false)]
    pub show_break_lengths: bool,

    /// What the density graph counts: steps|rows.
    #[arg(short, long, default_value = "steps")]
    pub accumulation: String,

    /// How the density graph is colored: density|uniform.
    #[arg(short, long, default_value = "density")]
    pub color_mode: String,

    /// Generate one density graph mesh on the worker thread and report its size.
    #[arg(short, long, default_value_t = false)]
    pub generate_mesh: bool,

    #[arg(long, default_value_t = 800.0)]
    pub width: f32,

    #[arg(long, default_value_t = 120.0)]
    pub height: f32,

    /// Prints extra information to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}

/// The note granularity that defines a stream measure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoteType {
    Quarter,
    Eighth,
    Twelfth,
    #[default]
    Sixteenth,
    TwentyFourth,
    ThirtySecond,
    FortyEighth,
    SixtyFourth,
}

impl NoteType {
    /// Steps a measure needs to count as stream.
    pub fn notes_per_measure(self) -> i32 {
        match self {
            NoteType::Quarter => 4,
            NoteType::Eighth => 8,
            NoteType::Twelfth => 12,
            NoteType::Sixteenth => 16,
            NoteType::TwentyFourth => 24,
            NoteType::ThirtySecond => 32,
            NoteType::FortyEighth => 48,
            NoteType::SixtyFourth => 64,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub note_type: NoteType,
    pub minimum_length_measures: i32,
    pub short_break_cutoff: i32,
    pub short_break_character: char,
    pub long_break_character: char,
    pub show_break_lengths: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            note_type: NoteType::Sixteenth,
            minimum_length_measures: 1,
            short_break_cutoff: 4,
            short_break_character: '-',
            long_break_character: '|',
            show_break_lengths: false,
        }
    }
}

impl StreamConfig {
    pub fn threshold(&self) -> i32 {
        self.note_type.notes_per_measure()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DensityColorMode {
    /// Blend from the low to the high color by relative density.
    #[default]
    ByDensity,
    /// Everything in the low color.
    Uniform,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulationMode {
    /// Every step counts, so a jump counts twice.
    #[default]
    Steps,
    /// Every row holding at least one step counts once.
    Rows,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GraphConfig {
    pub low_color: Color,
    pub high_color: Color,
    pub background_color: Color,
    pub rim_color: Color,
    pub rim_width: f32,
    pub color_mode: DensityColorMode,
    pub accumulation_mode: AccumulationMode,
    pub poll_interval_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            low_color: Color::from_rgba8(40, 110, 190, 255),
            high_color: Color::from_rgba8(230, 60, 70, 255),
            background_color: Color::from_rgba8(20, 20, 24, 230),
            rim_color: Color::from_rgba8(90, 90, 100, 255),
            rim_width: 1.0,
            color_mode: DensityColorMode::ByDensity,
            accumulation_mode: AccumulationMode::Steps,
            poll_interval_ms: 2,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DensityConfig {
    pub stream: StreamConfig,
    pub graph: GraphConfig,
}

/// Both halves of the command line setup: the stream half goes to [`crate::StepDensity`], the
/// graph half to [`crate::DensityGraph`].
impl From<&Args> for DensityConfig {
    fn from(args: &Args) -> Self {
        Self {
            stream: StreamConfig {
                note_type: parse_note_type(&args.note_type),
                minimum_length_measures: args.minimum_length_measures,
                short_break_cutoff: args.short_break_cutoff,
                short_break_character: args.short_break_character,
                long_break_character: args.long_break_character,
                show_break_lengths: args.show_break_lengths,
            },
            graph: GraphConfig {
                color_mode: parse_color_mode(&args.color_mode),
                accumulation_mode: parse_accumulation(&args.accumulation),
                ..GraphConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn args_fill_both_halves() {
        let args = Args::try_parse_from([
            "step_density",
            "song.mid",
            "--note-type",
            "8th",
            "--short-break",
            "2",
            "--show-break-lengths",
            "-a",
            "rows",
            "-c",
            "uniform",
        ])
        .unwrap();
        let config = DensityConfig::from(&args);

        assert_eq!(config.stream.note_type, NoteType::Eighth);
        assert_eq!(config.stream.threshold(), 8);
        assert_eq!(config.stream.short_break_cutoff, 2);
        assert_eq!(config.stream.minimum_length_measures, 1);
        assert!(config.stream.show_break_lengths);
        assert_eq!(config.graph.accumulation_mode, AccumulationMode::Rows);
        assert_eq!(config.graph.color_mode, DensityColorMode::Uniform);
        assert_eq!(config.graph.rim_width, GraphConfig::default().rim_width);
    }

    #[test]
    fn defaults_match_an_empty_command_line() {
        let args = Args::try_parse_from(["step_density", "song.mid"]).unwrap();
        assert_eq!(DensityConfig::from(&args), DensityConfig::default());
    }
}
