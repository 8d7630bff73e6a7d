use crate::density::measures::peak_rate;
use crate::graph::mailbox::DensityRenderRequest;
use crate::model::color::Color;
use crate::model::config::{AccumulationMode, DensityColorMode};
use anyhow::bail;
use bytemuck::{Pod, Zeroable};

/// Rates closer than this (in events per second) draw as one flat run.
const RATE_EPSILON: f64 = 1e-4;

const BACKGROUND_VERTICES: usize = 4;
const RIM_VERTICES: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DensityPeaks {
    pub notes_per_second: f64,
    pub rows_per_second: f64,
}

/// A triangle list ready for upload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratedMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub primitive_count: i32,
    pub peak_notes_per_second: f64,
    pub peak_rows_per_second: f64,
}

impl GeneratedMesh {
    /// Whole triangles only, all indexing existing vertices.
    pub fn is_consistent(&self) -> bool {
        self.indices.len() % 3 == 0
            && self.primitive_count as usize * 3 == self.indices.len()
            && self
                .indices
                .iter()
                .all(|&i| (i as usize) < self.vertices.len())
    }
}

/// Scratch buffers the worker reuses between passes.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl MeshBuilder {
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }

    pub fn ensure_capacity(&mut self, vertices: usize, indices: usize) {
        self.vertices
            .reserve(vertices.saturating_sub(self.vertices.len()));
        self.indices
            .reserve(indices.saturating_sub(self.indices.len()));
    }

    /// Frees the buffers, e.g. after a long chart is unloaded.
    pub fn reset_capacities(&mut self) {
        self.vertices = Vec::new();
        self.indices = Vec::new();
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn primitive_count(&self) -> i32 {
        (self.indices.len() / 3) as i32
    }

    pub fn push_vertex(&mut self, x: f32, y: f32, color: Color) -> u32 {
        self.vertices.push(Vertex {
            pos: [x, y],
            color: color.to_array(),
        });
        (self.vertices.len() - 1) as u32
    }

    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        self.indices.extend_from_slice(&[a, b, c]);
    }

    fn set_x(&mut self, vertex: u32, x: f32) {
        if let Some(v) = self.vertices.get_mut(vertex as usize) {
            v.pos[0] = x;
        }
    }

    pub fn write_into(&self, mesh: &mut GeneratedMesh, peaks: DensityPeaks) {
        mesh.vertices.clone_from(&self.vertices);
        mesh.indices.clone_from(&self.indices);
        mesh.primitive_count = self.primitive_count();
        mesh.peak_notes_per_second = peaks.notes_per_second;
        mesh.peak_rows_per_second = peaks.rows_per_second;
    }
}

/// The drawable area inside the rim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphArea {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl GraphArea {
    pub fn new(width: f32, height: f32, rim_width: f32) -> Self {
        let rim = rim_width.max(0.0).min(width.min(height) * 0.5);
        Self {
            left: rim,
            top: rim,
            right: (width - rim).max(rim),
            bottom: (height - rim).max(rim),
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn time_to_x(&self, time: f64, final_time: f64) -> f32 {
        if final_time <= 0.0 {
            return self.left;
        }
        let fraction = (time / final_time).clamp(0.0, 1.0) as f32;
        self.left + fraction * self.width()
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    count: i32,
    rate: f64,
}

/// Builds the density graph for `request` into `builder`: background, density curve, then rim.
///
/// A zero final time or a chart with no steps draws no curve.
pub fn generate_density_mesh(
    request: &DensityRenderRequest,
    builder: &mut MeshBuilder,
) -> anyhow::Result<DensityPeaks> {
    builder.clear();

    if !(request.width.is_finite() && request.height.is_finite())
        || request.width < 0.0
        || request.height < 0.0
    {
        bail!("Invalid density graph size {}x{}..!", request.width, request.height);
    }
    if !request.final_time.is_finite() {
        bail!("Invalid density graph final time {}..!", request.final_time);
    }
    if let Some(pair) = request
        .measures
        .windows(2)
        .find(|pair| !(pair[0].start_time <= pair[1].start_time))
    {
        bail!(
            "Measures out of order: {} then {}..!",
            pair[0].start_time,
            pair[1].start_time
        );
    }

    let peaks = DensityPeaks {
        notes_per_second: peak_rate(&request.measures, AccumulationMode::Steps),
        rows_per_second: peak_rate(&request.measures, AccumulationMode::Rows),
    };

    builder.ensure_capacity(
        BACKGROUND_VERTICES + RIM_VERTICES + request.measures.len() * 2 + 1,
        (2 + 8) * 3 + request.measures.len() * 6 + 3,
    );

    let area = GraphArea::new(request.width, request.height, request.rim_width);
    push_background(builder, request.width, request.height, request.background_color);

    let peak = match request.accumulation_mode {
        AccumulationMode::Steps => peaks.notes_per_second,
        AccumulationMode::Rows => peaks.rows_per_second,
    };
    if request.final_time > 0.0 && peak > 0.0 {
        push_density_curve(builder, request, &area, peak);
    }

    push_rim(builder, request.width, request.height, &area, request.rim_color);
    Ok(peaks)
}

fn push_density_curve(
    builder: &mut MeshBuilder,
    request: &DensityRenderRequest,
    area: &GraphArea,
    peak: f64,
) {
    let color_for = |y_percent: f32| match request.color_mode {
        DensityColorMode::ByDensity => request.low_color.lerp(request.high_color, y_percent),
        DensityColorMode::Uniform => request.low_color,
    };
    let baseline = area.bottom;

    // low and high vertex of the last emitted column while a segment is open
    let mut open: Option<(u32, u32)> = None;
    let mut previous: Option<Sample> = None;
    let mut before_previous: Option<Sample> = None;
    let mut last_end_time = 0.0;

    for measure in request.measures.iter() {
        let Some(rate) = measure.rate(request.accumulation_mode) else {
            continue;
        };
        let count = measure.count(request.accumulation_mode);
        let x = area.time_to_x(measure.start_time, request.final_time);
        let y_percent = (rate / peak).clamp(0.0, 1.0) as f32;
        last_end_time = measure.end_time;

        let flat_run = match (previous, before_previous) {
            (Some(p), Some(bp)) => {
                p.count > 0
                    && bp.count > 0
                    && (rate - p.rate).abs() <= RATE_EPSILON
                    && (rate - bp.rate).abs() <= RATE_EPSILON
            }
            _ => false,
        };

        if count == 0 {
            if let Some((low, high)) = open.take() {
                let base = builder.push_vertex(x, baseline, color_for(0.0));
                builder.push_triangle(low, high, base);
            }
        } else if let Some((low, high)) = open.filter(|_| count > 0 && flat_run) {
            builder.set_x(low, x);
            builder.set_x(high, x);
        } else {
            let color = color_for(y_percent);
            let low = builder.push_vertex(x, baseline, color);
            let high = builder.push_vertex(x, baseline - y_percent * area.height(), color);
            if let Some((previous_low, previous_high)) = open {
                builder.push_triangle(previous_low, previous_high, high);
                builder.push_triangle(previous_low, high, low);
            }
            open = Some((low, high));
        }

        before_previous = previous;
        previous = Some(Sample { count, rate });
    }

    if let Some((low, high)) = open {
        let x = area.time_to_x(last_end_time, request.final_time);
        let base = builder.push_vertex(x, baseline, color_for(0.0));
        builder.push_triangle(low, high, base);
    }
}

fn push_quad(
    builder: &mut MeshBuilder,
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    color: Color,
) {
    let a = builder.push_vertex(left, top, color);
    let b = builder.push_vertex(right, top, color);
    let c = builder.push_vertex(right, bottom, color);
    let d = builder.push_vertex(left, bottom, color);
    builder.push_triangle(a, b, c);
    builder.push_triangle(a, c, d);
}

fn push_background(builder: &mut MeshBuilder, width: f32, height: f32, color: Color) {
    push_quad(builder, 0.0, 0.0, width, height, color);
}

/// A frame between the outer edge and `area`: 8 vertices, 8 triangles.
fn push_rim(builder: &mut MeshBuilder, width: f32, height: f32, area: &GraphArea, color: Color) {
    let outer = [
        builder.push_vertex(0.0, 0.0, color),
        builder.push_vertex(width, 0.0, color),
        builder.push_vertex(width, height, color),
        builder.push_vertex(0.0, height, color),
    ];
    let inner = [
        builder.push_vertex(area.left, area.top, color),
        builder.push_vertex(area.right, area.top, color),
        builder.push_vertex(area.right, area.bottom, color),
        builder.push_vertex(area.left, area.bottom, color),
    ];
    for side in 0..4 {
        let next = (side + 1) % 4;
        builder.push_triangle(outer[side], outer[next], inner[next]);
        builder.push_triangle(outer[side], inner[next], inner[side]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollIndicatorParams {
    pub width: f32,
    pub height: f32,
    pub rim_width: f32,
    pub final_time: f64,
    pub visible_start_time: f64,
    pub visible_end_time: f64,
    pub cursor_time: f64,
    pub cursor_width: f32,
    pub viewport_color: Color,
    pub cursor_color: Color,
}

/// Viewport box and cursor bar drawn over the graph. Always 8 vertices and 4 triangles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollIndicator {
    pub vertices: [Vertex; 8],
    pub indices: [u32; 12],
}

impl ScrollIndicator {
    pub const PRIMITIVE_COUNT: i32 = 4;
}

pub fn build_scroll_indicator(params: &ScrollIndicatorParams) -> ScrollIndicator {
    let area = GraphArea::new(params.width, params.height, params.rim_width);
    let (start, end) = if params.visible_start_time <= params.visible_end_time {
        (params.visible_start_time, params.visible_end_time)
    } else {
        (params.visible_end_time, params.visible_start_time)
    };

    let left = area.time_to_x(start, params.final_time);
    let right = area.time_to_x(end, params.final_time);
    let cursor = area.time_to_x(params.cursor_time, params.final_time);
    let half = params.cursor_width.max(0.0) * 0.5;

    let corner = |x: f32, y: f32, color: Color| Vertex {
        pos: [x, y],
        color: color.to_array(),
    };
    let vertices = [
        corner(left, area.top, params.viewport_color),
        corner(right, area.top, params.viewport_color),
        corner(right, area.bottom, params.viewport_color),
        corner(left, area.bottom, params.viewport_color),
        corner(cursor - half, area.top, params.cursor_color),
        corner(cursor + half, area.top, params.cursor_color),
        corner(cursor + half, area.bottom, params.cursor_color),
        corner(cursor - half, area.bottom, params.cursor_color),
    ];

    ScrollIndicator {
        vertices,
        indices: [0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7],
    }
}
