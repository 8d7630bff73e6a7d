pub mod mailbox;
pub mod mesh;
pub mod worker;

use crate::density::StepDensity;
use crate::density::measures::Measure;
use crate::model::color::Color;
use crate::model::config::GraphConfig;
use crate::model::timing::TimingOracle;
use log::warn;
use mailbox::{DensityRenderRequest, GeometryMailbox, MeshBuffer};
use mesh::{GeneratedMesh, ScrollIndicator, ScrollIndicatorParams, build_scroll_indicator};
use std::sync::Arc;
use std::time::Duration;
use worker::{GeometryWorker, WorkerState};

/// A density graph view: owns one worker thread and the buffers shared with it.
///
/// Dropping the graph stops and joins the worker.
#[derive(Debug)]
pub struct DensityGraph {
    config: GraphConfig,
    width: f32,
    height: f32,
    needs_request: bool,
    mailbox: Arc<GeometryMailbox>,
    results: Arc<MeshBuffer>,
    worker: GeometryWorker,
}

impl DensityGraph {
    pub fn new(config: GraphConfig, width: f32, height: f32) -> anyhow::Result<Self> {
        let mailbox = Arc::new(GeometryMailbox::new());
        let results = Arc::new(MeshBuffer::new());
        let worker = GeometryWorker::new(
            Arc::clone(&mailbox),
            Arc::clone(&results),
            Duration::from_millis(config.poll_interval_ms),
        );
        worker.start()?;

        Ok(Self {
            config,
            width,
            height,
            needs_request: true,
            mailbox,
            results,
            worker,
        })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: GraphConfig) {
        if config != self.config {
            self.config = config;
            self.needs_request = true;
        }
    }

    pub fn set_size(&mut self, width: f32, height: f32) {
        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.needs_request = true;
        }
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Hands a snapshot of `measures` to the worker, replacing any request it has not started.
    pub fn set_render_request(
        &self,
        measures: &[Measure],
        final_time: f64,
        width: f32,
        height: f32,
        config: &GraphConfig,
    ) -> anyhow::Result<()> {
        self.mailbox
            .enqueue(DensityRenderRequest::new(measures, final_time, width, height, config))
    }

    /// Sends a new request if the measures, the size or the colors changed since the last one.
    /// Returns whether a request was sent.
    /// A failed send leaves the dirty state in place so the next call retries it.
    pub fn sync<T: TimingOracle>(
        &mut self,
        density: &mut StepDensity<T>,
    ) -> anyhow::Result<bool> {
        if !density.measures_dirty() && !self.needs_request {
            return Ok(false);
        }

        self.set_render_request(
            density.measures(),
            density.final_time(),
            self.width,
            self.height,
            &self.config,
        )?;
        density.take_measures_dirty();
        self.needs_request = false;
        Ok(true)
    }

    /// Copy of the newest finished mesh. Never waits on a pass in progress.
    pub fn try_read_generated_mesh(&self) -> Option<GeneratedMesh> {
        self.results.try_read()
    }

    pub fn mesh_generation(&self) -> u64 {
        self.results.generation()
    }

    /// Rebuilt every frame on the caller's thread so it follows the cursor without lag.
    pub fn scroll_indicator(
        &self,
        final_time: f64,
        visible_start_time: f64,
        visible_end_time: f64,
        cursor_time: f64,
    ) -> ScrollIndicator {
        build_scroll_indicator(&ScrollIndicatorParams {
            width: self.width,
            height: self.height,
            rim_width: self.config.rim_width,
            final_time,
            visible_start_time,
            visible_end_time,
            cursor_time,
            cursor_width: 2.0,
            viewport_color: Color {
                a: 0.25,
                ..self.config.high_color
            },
            cursor_color: self.config.rim_color,
        })
    }

    /// Lets the worker free its buffers, e.g. once a song is unloaded.
    pub fn reset_capacities(&self) -> anyhow::Result<()> {
        self.mailbox.request_capacity_reset()
    }

    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.worker.stop()
    }
}

impl Drop for DensityGraph {
    fn drop(&mut self) {
        if let Err(why) = self.worker.stop() {
            warn!("Failed to stop the density graph worker: {:?}", why);
        }
    }
}
