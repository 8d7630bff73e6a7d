use crate::density::measures::Measure;
use crate::graph::mesh::{DensityPeaks, GeneratedMesh, MeshBuilder};
use crate::model::color::Color;
use crate::model::config::{AccumulationMode, DensityColorMode, GraphConfig};
use anyhow::bail;
use log::warn;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything the worker needs to draw one density graph. Owned outright so the worker never
/// touches the live measures.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityRenderRequest {
    pub measures: Vec<Measure>,
    pub final_time: f64,
    pub width: f32,
    pub height: f32,
    pub low_color: Color,
    pub high_color: Color,
    pub background_color: Color,
    pub rim_color: Color,
    pub rim_width: f32,
    pub color_mode: DensityColorMode,
    pub accumulation_mode: AccumulationMode,
}

impl DensityRenderRequest {
    pub fn new(
        measures: &[Measure],
        final_time: f64,
        width: f32,
        height: f32,
        config: &GraphConfig,
    ) -> Self {
        Self {
            measures: measures.to_vec(),
            final_time,
            width,
            height,
            low_color: config.low_color,
            high_color: config.high_color,
            background_color: config.background_color,
            rim_color: config.rim_color,
            rim_width: config.rim_width,
            color_mode: config.color_mode,
            accumulation_mode: config.accumulation_mode,
        }
    }
}

#[derive(Debug, Default)]
struct MailboxSlot {
    pending: Option<DensityRenderRequest>,
    reset_capacities: bool,
}

/// Single slot handoff from the edit thread to the worker. A new request replaces any the
/// worker has not picked up yet.
#[derive(Debug, Default)]
pub struct GeometryMailbox {
    slot: Mutex<MailboxSlot>,
    shutdown: AtomicBool,
}

impl GeometryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, request: DensityRenderRequest) -> anyhow::Result<()> {
        if self.should_shutdown() {
            bail!("Geometry mailbox is shut down..!");
        }
        let Ok(mut slot) = self.slot.lock() else {
            bail!("Failed to lock the geometry mailbox..!");
        };
        slot.pending = Some(request);
        Ok(())
    }

    /// Asks the worker to drop its buffer allocations the next time it picks up a request.
    pub fn request_capacity_reset(&self) -> anyhow::Result<()> {
        let Ok(mut slot) = self.slot.lock() else {
            bail!("Failed to lock the geometry mailbox..!");
        };
        slot.reset_capacities = true;
        Ok(())
    }

    pub fn has_new_data(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.pending.is_some())
            .unwrap_or(false)
    }

    pub fn try_dequeue(&self) -> Option<DensityRenderRequest> {
        let Ok(mut slot) = self.slot.lock() else {
            warn!("Failed to lock the geometry mailbox..!");
            return None;
        };
        slot.pending.take()
    }

    pub fn take_capacity_reset(&self) -> bool {
        let Ok(mut slot) = self.slot.lock() else {
            return false;
        };
        std::mem::replace(&mut slot.reset_capacities, false)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct PublishedMesh {
    mesh: Option<GeneratedMesh>,
    generation: u64,
}

/// The last mesh the worker finished. Readers only ever see whole meshes.
#[derive(Debug, Default)]
pub struct MeshBuffer {
    latest: Mutex<PublishedMesh>,
}

impl MeshBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, builder: &MeshBuilder, peaks: DensityPeaks) {
        let Ok(mut latest) = self.latest.lock() else {
            warn!("Failed to lock the density mesh buffer..!");
            return;
        };
        let mesh = latest.mesh.get_or_insert_with(GeneratedMesh::default);
        builder.write_into(mesh, peaks);
        latest.generation += 1;
    }

    /// Copy of the last published mesh, if any.
    pub fn try_read(&self) -> Option<GeneratedMesh> {
        let Ok(latest) = self.latest.lock() else {
            return None;
        };
        latest.mesh.clone()
    }

    /// Number of meshes published so far.
    pub fn generation(&self) -> u64 {
        self.latest.lock().map(|l| l.generation).unwrap_or(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(width: f32) -> DensityRenderRequest {
        DensityRenderRequest::new(&[], 0.0, width, 10.0, &GraphConfig::default())
    }

    #[test]
    fn latest_request_wins() {
        let mailbox = GeometryMailbox::new();
        assert!(mailbox.try_dequeue().is_none());

        mailbox.enqueue(request(1.0)).unwrap();
        mailbox.enqueue(request(2.0)).unwrap();
        assert!(mailbox.has_new_data());

        let seen = mailbox.try_dequeue().unwrap();
        assert_eq!(seen.width, 2.0);
        assert!(mailbox.try_dequeue().is_none());
        assert!(!mailbox.has_new_data());
    }

    #[test]
    fn capacity_reset_is_taken_once() {
        let mailbox = GeometryMailbox::new();
        assert!(!mailbox.take_capacity_reset());
        mailbox.request_capacity_reset().unwrap();
        assert!(mailbox.take_capacity_reset());
        assert!(!mailbox.take_capacity_reset());
    }

    #[test]
    fn shutdown_flag() {
        let mailbox = GeometryMailbox::new();
        assert!(!mailbox.should_shutdown());
        mailbox.request_shutdown();
        assert!(mailbox.should_shutdown());
        assert!(mailbox.enqueue(request(1.0)).is_err());
        assert!(!mailbox.has_new_data());
    }

    #[test]
    fn publish_replaces_whole_mesh() {
        let buffer = MeshBuffer::new();
        assert!(buffer.try_read().is_none());
        assert_eq!(buffer.generation(), 0);

        let mut builder = MeshBuilder::default();
        let a = builder.push_vertex(0.0, 0.0, Color::default());
        let b = builder.push_vertex(1.0, 0.0, Color::default());
        let c = builder.push_vertex(0.0, 1.0, Color::default());
        builder.push_triangle(a, b, c);
        buffer.publish(
            &builder,
            DensityPeaks {
                notes_per_second: 4.0,
                rows_per_second: 3.0,
            },
        );

        let mesh = buffer.try_read().unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.primitive_count, 1);
        assert_eq!(mesh.peak_notes_per_second, 4.0);
        assert_eq!(buffer.generation(), 1);

        builder.clear();
        buffer.publish(&builder, DensityPeaks::default());
        let mesh = buffer.try_read().unwrap();
        assert!(mesh.vertices.is_empty());
        assert_eq!(mesh.primitive_count, 0);
        assert_eq!(buffer.generation(), 2);
    }
}
