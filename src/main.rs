use anyhow::{Result, bail};
use clap::Parser;
use log::{debug, info};
use std::thread;
use std::time::{Duration, Instant};
use step_density::{Args, DensityConfig, DensityGraph, StepDensity, import_midi_file};

const MESH_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = DensityConfig::from(&args);

    info!("Importing MIDI file: '{}'...", args.midi.display());
    let imported = import_midi_file(&args.midi)?;
    let chart = imported.chart;

    debug!(
        "Imported chart '{}' with {} events..!",
        chart
            .metadata
            .title
            .clone()
            .unwrap_or_else(|| "<unknown>".into()),
        chart.events.len()
    );

    let mut density = StepDensity::new(
        config.stream,
        imported.timing,
        &chart.events,
        chart.end_row(),
    );

    if args.verbose {
        if let Some(bpm) = chart.metadata.initial_bpm {
            info!("Initial BPM: {:.2}", bpm);
        }
        for (number, measure) in density.measures().iter().enumerate() {
            info!(
                "Measure {:>4} | {:>9.3}s - {:>9.3}s | steps: {:>3} | rows: {:>3}",
                number,
                measure.start_time,
                measure.end_time,
                measure.step_count,
                measure.row_count
            );
        }
    }

    let breakdown = density.get_stream_breakdown();
    println!(
        "Stream breakdown: {}",
        if breakdown.is_empty() { "<none>" } else { breakdown.as_str() }
    );
    println!("Peak notes per second: {:.2}", density.get_peak_notes_per_second());
    println!("Peak rows per second: {:.2}", density.get_peak_rows_per_second());

    if args.generate_mesh {
        let mut graph = DensityGraph::new(config.graph, args.width, args.height)?;
        graph.sync(&mut density)?;

        let start = Instant::now();
        let mesh = loop {
            if let Some(mesh) = graph.try_read_generated_mesh() {
                break mesh;
            }
            if start.elapsed() > MESH_TIMEOUT {
                bail!("Timed out waiting for the density graph mesh..!");
            }
            thread::sleep(Duration::from_millis(1));
        };

        println!(
            "Density graph mesh: {} vertices, {} triangles",
            mesh.vertices.len(),
            mesh.primitive_count
        );
        graph.shutdown()?;
    }

    Ok(())
}
