use std::io::Cursor;

use base64::Engine as _;
use image::{ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::configuration::{parse_color, SurfaceConfiguration};
use crate::error::{ContextError, ErrorKind};
use crate::input::{action_for, PointerEvent, SurfaceAction};

/// A two-dimensional point. Depending on the context it is expressed in viewport coordinates
/// (as reported by the events) or in coordinates local to the surface.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One continuous line, in surface-local logical coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stroke {
    pub points: Vec<Point>,
}

/// The drawable region where the user signs, together with its raster buffer and stroke state.
///
/// The raster buffer has a physical size equal to the logical size scaled by the device pixel
/// ratio, so every point received from the events goes through the same mapping: the on-screen
/// offset of the surface is subtracted and the result is multiplied by the ratio.
#[derive(Debug, Clone)]
pub struct SignatureSurface {
    logical_width: f32,
    logical_height: f32,
    device_pixel_ratio: f32,
    offset: Point,
    stroke_width: f32,
    stroke_color: Rgba<u8>,
    background: Option<Rgba<u8>>,
    buffer: RgbaImage,
    is_drawing: bool,
    last_point: Option<Point>,
    current_stroke: Stroke,
    strokes: Vec<Stroke>,
    has_content: bool,
}

impl SignatureSurface {
    /// Create a blank surface from its configuration. An unusable size, ratio or color is a
    /// configuration error which is reported here once and never again by the other operations.
    pub fn new(configuration: &SurfaceConfiguration) -> Result<Self, ContextError> {
        let stroke_color = parse_color(&configuration.stroke_color)?;
        let background = configuration
            .background
            .as_deref()
            .map(parse_color)
            .transpose()?;
        if !(configuration.stroke_width.is_finite() && configuration.stroke_width > 0.0) {
            return Err(ContextError::with_context(format!(
                "Invalid stroke width {} for the signature surface",
                configuration.stroke_width
            ))
            .of_kind(ErrorKind::Configuration));
        }
        let (physical_width, physical_height) = physical_size(
            configuration.width,
            configuration.height,
            configuration.device_pixel_ratio,
        )?;

        let mut surface = SignatureSurface {
            logical_width: configuration.width,
            logical_height: configuration.height,
            device_pixel_ratio: configuration.device_pixel_ratio,
            offset: Point::default(),
            stroke_width: configuration.stroke_width,
            stroke_color,
            background,
            buffer: RgbaImage::new(physical_width, physical_height),
            is_drawing: false,
            last_point: None,
            current_stroke: Stroke::default(),
            strokes: Vec::new(),
            has_content: false,
        };
        surface.fill_background();
        log::debug!(
            "Created a signature surface of {}x{} pixels (ratio {})",
            physical_width,
            physical_height,
            configuration.device_pixel_ratio
        );

        Ok(surface)
    }

    /// Start a new stroke at the given point, expressed in viewport coordinates.
    pub fn begin(&mut self, point: Point) {
        let local_point = self.to_local(point);
        self.is_drawing = true;
        self.last_point = Some(local_point);
        self.current_stroke = Stroke {
            points: vec![local_point],
        };
    }

    /// Draw a segment from the last recorded point to the given one, if a stroke is in progress.
    pub fn extend(&mut self, point: Point) {
        if !self.is_drawing {
            return;
        }
        let local_point = self.to_local(point);
        if let Some(last_point) = self.last_point {
            self.render_segment(last_point, local_point);
            self.has_content = true;
        }
        self.last_point = Some(local_point);
        self.current_stroke.points.push(local_point);
    }

    /// Stop drawing. Ending when no stroke is in progress does nothing.
    pub fn end(&mut self) {
        if self.is_drawing && !self.current_stroke.points.is_empty() {
            self.strokes.push(std::mem::take(&mut self.current_stroke));
        }
        self.is_drawing = false;
        self.last_point = None;
    }

    /// Blank the buffer and forget every stroke, including the one in progress.
    pub fn clear(&mut self) {
        self.fill_background();
        self.is_drawing = false;
        self.strokes.clear();
        self.current_stroke = Stroke::default();
        self.last_point = None;
        self.has_content = false;
    }

    /// Feed an event through the event bindings.
    pub fn dispatch(&mut self, event: &PointerEvent) {
        match (action_for(event.kind), event.position) {
            (Some(SurfaceAction::Begin), Some(position)) => self.begin(position),
            (Some(SurfaceAction::Extend), Some(position)) => self.extend(position),
            (Some(SurfaceAction::End), _) => self.end(),
            (action, None) => log::trace!("Ignoring {:?} without a position", action),
            (None, _) => {}
        }
    }

    /// Change the logical size and the device pixel ratio. The buffer is reallocated and,
    /// just as a canvas does on resize, its contents are lost.
    pub fn resize(
        &mut self,
        logical_width: f32,
        logical_height: f32,
        device_pixel_ratio: f32,
    ) -> Result<(), ContextError> {
        let (physical_width, physical_height) =
            physical_size(logical_width, logical_height, device_pixel_ratio)?;
        self.logical_width = logical_width;
        self.logical_height = logical_height;
        self.device_pixel_ratio = device_pixel_ratio;
        self.buffer = RgbaImage::new(physical_width, physical_height);
        self.clear();

        Ok(())
    }

    /// Record where the top-left corner of the surface is placed in the viewport.
    pub fn set_offset(&mut self, left: f32, top: f32) {
        self.offset = Point { x: left, y: top };
    }

    /// Whether the user has drawn anything since the surface was created or last cleared.
    pub fn has_content(&self) -> bool {
        self.has_content
    }

    pub fn is_drawing(&self) -> bool {
        self.is_drawing
    }

    /// The completed strokes, in surface-local logical coordinates.
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn logical_size(&self) -> (f32, f32) {
        (self.logical_width, self.logical_height)
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }

    /// A copy of the raster buffer.
    pub fn snapshot(&self) -> RgbaImage {
        self.buffer.clone()
    }

    /// Encode the raster buffer as a PNG image.
    pub fn export_png(&self) -> Result<Vec<u8>, ContextError> {
        let mut png_bytes = Vec::new();
        self.buffer
            .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .map_err(|error| {
                ContextError::with_error("Failed to encode the signature as PNG", &error)
            })?;

        Ok(png_bytes)
    }

    /// Encode the raster buffer as a `data:image/png;base64,` URL.
    pub fn export_data_url(&self) -> Result<String, ContextError> {
        let png_bytes = self.export_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png_bytes)
        ))
    }

    fn to_local(&self, viewport_point: Point) -> Point {
        Point {
            x: viewport_point.x - self.offset.x,
            y: viewport_point.y - self.offset.y,
        }
    }

    fn fill_background(&mut self) {
        let fill = self.background.unwrap_or(Rgba([0, 0, 0, 0]));
        for pixel in self.buffer.pixels_mut() {
            *pixel = fill;
        }
    }

    /// Rasterize a segment with round caps between two surface-local points.
    fn render_segment(&mut self, from: Point, to: Point) {
        let ratio = self.device_pixel_ratio;
        let from = Point {
            x: from.x * ratio,
            y: from.y * ratio,
        };
        let to = Point {
            x: to.x * ratio,
            y: to.y * ratio,
        };
        let radius = self.stroke_width * ratio / 2.0;

        let (width, height) = self.buffer.dimensions();
        let minimum_x = clamp_to_axis((from.x.min(to.x) - radius - 1.0).floor(), width);
        let maximum_x = clamp_to_axis((from.x.max(to.x) + radius + 1.0).ceil(), width);
        let minimum_y = clamp_to_axis((from.y.min(to.y) - radius - 1.0).floor(), height);
        let maximum_y = clamp_to_axis((from.y.max(to.y) + radius + 1.0).ceil(), height);

        for y in minimum_y..maximum_y {
            for x in minimum_x..maximum_x {
                // Sample at the center of the pixel
                let center = Point {
                    x: x as f32 + 0.5,
                    y: y as f32 + 0.5,
                };
                let coverage =
                    (radius + 0.5 - distance_to_segment(center, from, to)).clamp(0.0, 1.0);
                if coverage > 0.0 {
                    blend(self.buffer.get_pixel_mut(x, y), self.stroke_color, coverage);
                }
            }
        }
    }
}

/// Largest width or height of the raster buffer, in physical pixels.
const MAXIMUM_SIDE: u32 = 16_384;
/// Largest size of the raster buffer, in bytes.
const MAXIMUM_BUFFER_LENGTH: u64 = 64 * 1024 * 1024;

/// Compute the size of the raster buffer for a logical size and a device pixel ratio.
fn physical_size(
    logical_width: f32,
    logical_height: f32,
    device_pixel_ratio: f32,
) -> Result<(u32, u32), ContextError> {
    let is_usable = |value: f32| value.is_finite() && value > 0.0;
    if !(is_usable(logical_width) && is_usable(logical_height) && is_usable(device_pixel_ratio)) {
        return Err(ContextError::with_context(format!(
            "Invalid signature surface of {}x{} with device pixel ratio {}",
            logical_width, logical_height, device_pixel_ratio
        ))
        .of_kind(ErrorKind::Configuration));
    }

    let physical_width = (logical_width * device_pixel_ratio).ceil();
    let physical_height = (logical_height * device_pixel_ratio).ceil();
    let buffer_length = (physical_width as u64)
        .checked_mul(physical_height as u64)
        .and_then(|pixels| pixels.checked_mul(4));
    if physical_width > MAXIMUM_SIDE as f32
        || physical_height > MAXIMUM_SIDE as f32
        || buffer_length.map_or(true, |length| length > MAXIMUM_BUFFER_LENGTH)
    {
        return Err(ContextError::with_context(format!(
            "The signature surface of {}x{} pixels is too large",
            physical_width, physical_height
        ))
        .of_kind(ErrorKind::Configuration));
    }

    Ok((physical_width as u32, physical_height as u32))
}

fn clamp_to_axis(value: f32, length: u32) -> u32 {
    value.clamp(0.0, length as f32) as u32
}

fn distance_to_segment(point: Point, from: Point, to: Point) -> f32 {
    let (delta_x, delta_y) = (to.x - from.x, to.y - from.y);
    let length_squared = delta_x * delta_x + delta_y * delta_y;
    let t = if length_squared == 0.0 {
        0.0
    } else {
        (((point.x - from.x) * delta_x + (point.y - from.y) * delta_y) / length_squared)
            .clamp(0.0, 1.0)
    };
    let closest = Point {
        x: from.x + t * delta_x,
        y: from.y + t * delta_y,
    };

    ((point.x - closest.x).powi(2) + (point.y - closest.y).powi(2)).sqrt()
}

/// Composite the color over the pixel (source-over), scaling its alpha by the coverage.
fn blend(pixel: &mut Rgba<u8>, color: Rgba<u8>, coverage: f32) {
    let source_alpha = f32::from(color[3]) / 255.0 * coverage;
    let destination_alpha = f32::from(pixel[3]) / 255.0;
    let output_alpha = source_alpha + destination_alpha * (1.0 - source_alpha);
    if output_alpha <= 0.0 {
        return;
    }

    for channel in 0..3 {
        let value = (f32::from(color[channel]) * source_alpha
            + f32::from(pixel[channel]) * destination_alpha * (1.0 - source_alpha))
            / output_alpha;
        pixel[channel] = value.round().clamp(0.0, 255.0) as u8;
    }
    pixel[3] = (output_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}
