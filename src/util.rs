use crate::model::config::{AccumulationMode, DensityColorMode, NoteType};
use log::info;

pub fn parse_note_type(input: &str) -> NoteType {
    match input.to_lowercase().trim_end_matches("s") {
        "4" | "4th" | "quarter" => NoteType::Quarter,
        "8" | "8th" | "eighth" => NoteType::Eighth,
        "12" | "12th" | "twelfth" => NoteType::Twelfth,
        "16" | "16th" | "sixteenth" => NoteType::Sixteenth,
        "24" | "24th" | "twentyfourth" => NoteType::TwentyFourth,
        "32" | "32nd" | "thirtysecond" => NoteType::ThirtySecond,
        "48" | "48th" | "fortyeighth" => NoteType::FortyEighth,
        "64" | "64th" | "sixtyfourth" => NoteType::SixtyFourth,
        other => {
            info!("Unknown note type '{}', defaulting to 16th notes..!", other);
            NoteType::Sixteenth
        }
    }
}

pub fn parse_accumulation(input: &str) -> AccumulationMode {
    match input.to_lowercase().as_str() {
        "s" | "step" | "steps" | "notes" => AccumulationMode::Steps,
        "r" | "row" | "rows" => AccumulationMode::Rows,
        other => {
            info!("Unknown accumulation mode '{}', defaulting to `steps`..!", other);
            AccumulationMode::Steps
        }
    }
}

pub fn parse_color_mode(input: &str) -> DensityColorMode {
    match input.to_lowercase().as_str() {
        "d" | "density" => DensityColorMode::ByDensity,
        "u" | "uniform" => DensityColorMode::Uniform,
        other => {
            info!("Unknown color mode '{}', defaulting to `density`..!", other);
            DensityColorMode::ByDensity
        }
    }
}
