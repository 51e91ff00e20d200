//! Figure capture: a scope guard around the figure registry and a small
//! headless rasterizer that turns figures into PNG artifacts.

use std::io::Cursor;
use std::ops::{Deref, DerefMut};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::lang::{Figure, FigureRegistry, Rgb, SeriesKind};

/// One rendered figure attached to an execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotArtifact {
    pub index: usize,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub title: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl PlotArtifact {
    pub fn data_url(&self) -> String {
        format!("data:image/{};base64,{}", self.format, STANDARD.encode(&self.data))
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("figure {id} has unusable size {width}x{height}")]
    Size { id: u32, width: u32, height: u32 },
    #[error("png encoding failed: {0}")]
    Encode(#[from] png::EncodingError),
}

/// Closes every open figure on entry and again when dropped, so figures never
/// leak from one run into the next even if rendering is skipped.
pub(crate) struct FigureScope<'a> {
    figures: &'a mut FigureRegistry,
}

impl<'a> FigureScope<'a> {
    pub(crate) fn enter(figures: &'a mut FigureRegistry) -> Self {
        figures.close_all();
        Self { figures }
    }

    /// Renders every figure created during the scope, in creation order.
    pub(crate) fn finish(self) -> Vec<PlotArtifact> {
        let figures = self.figures.drain();
        let mut artifacts = Vec::with_capacity(figures.len());
        for figure in &figures {
            match render_png(figure) {
                Ok(data) => artifacts.push(PlotArtifact {
                    index: artifacts.len(),
                    format: "png".to_string(),
                    width: figure.width,
                    height: figure.height,
                    title: figure.title.clone(),
                    data,
                }),
                Err(e) => warn!(figure = figure.id.0, error = %e, "skipping figure that failed to render"),
            }
        }
        artifacts
    }
}

impl Deref for FigureScope<'_> {
    type Target = FigureRegistry;

    fn deref(&self) -> &FigureRegistry {
        self.figures
    }
}

impl DerefMut for FigureScope<'_> {
    fn deref_mut(&mut self) -> &mut FigureRegistry {
        self.figures
    }
}

impl Drop for FigureScope<'_> {
    fn drop(&mut self) {
        self.figures.close_all();
    }
}

const MAX_SIDE: u32 = 4096;
const BACKGROUND: Rgb = Rgb(255, 255, 255);
const AXIS: Rgb = Rgb(0, 0, 0);
const GRID: Rgb = Rgb(0xdd, 0xdd, 0xdd);

struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&[BACKGROUND.0, BACKGROUND.1, BACKGROUND.2, 255]);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let at = ((y as u32 * self.width + x as u32) * 4) as usize;
        self.pixels[at..at + 3].copy_from_slice(&[color.0, color.1, color.2]);
    }

    fn hline(&mut self, x0: i64, x1: i64, y: i64, color: Rgb) {
        for x in x0.min(x1)..=x0.max(x1) {
            self.put(x, y, color);
        }
    }

    fn vline(&mut self, x: i64, y0: i64, y1: i64, color: Rgb) {
        for y in y0.min(y1)..=y0.max(y1) {
            self.put(x, y, color);
        }
    }

    fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb) {
        for y in y0.min(y1)..=y0.max(y1) {
            self.hline(x0, x1, y, color);
        }
    }

    fn stroke_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb) {
        self.hline(x0, x1, y0, color);
        self.hline(x0, x1, y1, color);
        self.vline(x0, y0, y1, color);
        self.vline(x1, y0, y1, color);
    }

    /// Bresenham, clipped to `clip`.
    fn line(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb, clip: &Rect) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            for (ox, oy) in [(0, 0), (1, 0), (0, 1)] {
                if clip.contains(x + ox, y + oy) {
                    self.put(x + ox, y + oy, color);
                }
            }
            if (x, y) == to {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn disc(&mut self, cx: i64, cy: i64, radius: i64, color: Rgb, clip: &Rect) {
        for y in -radius..=radius {
            for x in -radius..=radius {
                if x * x + y * y <= radius * radius && clip.contains(cx + x, cy + y) {
                    self.put(cx + x, cy + y, color);
                }
            }
        }
    }

    fn encode(&self) -> Result<Vec<u8>, RenderError> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = png::Encoder::new(&mut buf, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
        }
        Ok(buf.into_inner())
    }
}

struct Rect {
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
}

impl Rect {
    fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    min: f64,
    max: f64,
}

impl Bounds {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        values.filter(|v| v.is_finite()).fold(None, |acc, v| match acc {
            None => Some(Self { min: v, max: v }),
            Some(b) => Some(Self {
                min: b.min.min(v),
                max: b.max.max(v),
            }),
        })
    }

    fn include(self, v: f64) -> Self {
        Self {
            min: self.min.min(v),
            max: self.max.max(v),
        }
    }

    /// Widens degenerate ranges and adds a 5% margin on both ends.
    fn padded(self) -> Self {
        let (min, max) = if self.max - self.min < f64::EPSILON {
            let half = if self.min == 0.0 { 0.5 } else { self.min.abs() * 0.05 };
            (self.min - half, self.max + half)
        } else {
            (self.min, self.max)
        };
        let pad = (max - min) * 0.05;
        Self {
            min: min - pad,
            max: max + pad,
        }
    }
}

fn nice_step(span: f64, target: f64) -> f64 {
    let raw = span / target;
    let magnitude = 10f64.powf(raw.log10().floor());
    let normalized = raw / magnitude;
    let nice = if normalized < 1.5 {
        1.0
    } else if normalized < 3.0 {
        2.0
    } else if normalized < 7.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}

fn ticks(bounds: Bounds) -> Vec<f64> {
    let step = nice_step(bounds.max - bounds.min, 5.0);
    if !step.is_finite() || step <= 0.0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut t = (bounds.min / step).ceil() * step;
    while t <= bounds.max && out.len() < 50 {
        out.push(t);
        t += step;
    }
    out
}

/// Rasterizes one figure to PNG bytes.
pub fn render_png(figure: &Figure) -> Result<Vec<u8>, RenderError> {
    let (width, height) = (figure.width, figure.height);
    if width < 16 || height < 16 || width > MAX_SIDE || height > MAX_SIDE {
        return Err(RenderError::Size {
            id: figure.id.0,
            width,
            height,
        });
    }
    let mut canvas = Canvas::new(width, height);

    let margin_x = i64::from(width / 10).max(8);
    let margin_y = i64::from(height / 10).max(8);
    let area = Rect {
        left: margin_x,
        top: margin_y,
        right: i64::from(width) - margin_x / 2,
        bottom: i64::from(height) - margin_y,
    };

    let has_bars = figure.series.iter().any(|s| s.kind == SeriesKind::Bar);
    let mut xb = Bounds::of(figure.series.iter().flat_map(|s| s.xs.iter().copied()))
        .unwrap_or(Bounds { min: 0.0, max: 1.0 });
    let mut yb = Bounds::of(figure.series.iter().flat_map(|s| s.ys.iter().copied()))
        .unwrap_or(Bounds { min: 0.0, max: 1.0 });
    if has_bars {
        xb = xb.include(xb.min - 0.5).include(xb.max + 0.5);
        yb = yb.include(0.0);
    }
    let (xb, yb) = (xb.padded(), yb.padded());

    let span_x = (area.right - area.left) as f64;
    let span_y = (area.bottom - area.top) as f64;
    let to_px = |x: f64, y: f64| -> (i64, i64) {
        let px = area.left as f64 + (x - xb.min) / (xb.max - xb.min) * span_x;
        let py = area.bottom as f64 - (y - yb.min) / (yb.max - yb.min) * span_y;
        (px.round() as i64, py.round() as i64)
    };

    let x_ticks = ticks(xb);
    let y_ticks = ticks(yb);
    if figure.grid {
        for &t in &x_ticks {
            let (px, _) = to_px(t, yb.min);
            canvas.vline(px, area.top, area.bottom, GRID);
        }
        for &t in &y_ticks {
            let (_, py) = to_px(xb.min, t);
            canvas.hline(area.left, area.right, py, GRID);
        }
    }

    for series in &figure.series {
        let points: Vec<(i64, i64)> = series
            .xs
            .iter()
            .zip(&series.ys)
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(&x, &y)| to_px(x, y))
            .collect();
        match series.kind {
            SeriesKind::Line => {
                for pair in points.windows(2) {
                    canvas.line(pair[0], pair[1], series.color, &area);
                }
                if let [only] = points.as_slice() {
                    canvas.disc(only.0, only.1, 2, series.color, &area);
                }
            }
            SeriesKind::Scatter => {
                for &(x, y) in &points {
                    canvas.disc(x, y, 3, series.color, &area);
                }
            }
            SeriesKind::Bar => {
                let (_, base) = to_px(xb.min, 0.0);
                let half = ((0.4 / (xb.max - xb.min)) * span_x).max(1.0) as i64;
                for &(x, y) in &points {
                    canvas.fill_rect(
                        (x - half).max(area.left),
                        y.clamp(area.top, area.bottom),
                        (x + half).min(area.right),
                        base.clamp(area.top, area.bottom),
                        series.color,
                    );
                }
            }
        }
    }

    canvas.stroke_rect(area.left, area.top, area.right, area.bottom, AXIS);
    for &t in &x_ticks {
        let (px, _) = to_px(t, yb.min);
        canvas.vline(px, area.bottom, area.bottom + 4, AXIS);
    }
    for &t in &y_ticks {
        let (_, py) = to_px(xb.min, t);
        canvas.hline(area.left - 4, area.left, py, AXIS);
    }

    if figure.legend {
        let labelled: Vec<Rgb> = figure
            .series
            .iter()
            .filter(|s| s.label.is_some())
            .map(|s| s.color)
            .collect();
        if !labelled.is_empty() {
            let right = area.right - 6;
            let left = right - 24;
            let top = area.top + 6;
            let bottom = top + 6 + 12 * labelled.len() as i64;
            canvas.fill_rect(left, top, right, bottom, BACKGROUND);
            canvas.stroke_rect(left, top, right, bottom, GRID);
            for (i, color) in labelled.into_iter().enumerate() {
                let y = top + 6 + 12 * i as i64;
                canvas.fill_rect(left + 4, y, right - 4, y + 6, color);
            }
        }
    }

    canvas.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{FigureId, Series};

    fn figure_with(series: Vec<Series>) -> Figure {
        let mut registry = FigureRegistry::new((200, 150));
        registry.current_mut().series = series;
        registry.drain().remove(0)
    }

    #[test]
    fn renders_png_signature() {
        let fig = figure_with(vec![Series {
            kind: SeriesKind::Line,
            xs: vec![0.0, 1.0, 2.0],
            ys: vec![1.0, 4.0, 9.0],
            label: None,
            color: Rgb::CYCLE[0],
        }]);
        let bytes = render_png(&fig).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn empty_figure_still_renders() {
        let fig = figure_with(Vec::new());
        assert!(render_png(&fig).is_ok());
    }

    #[test]
    fn tiny_figure_is_rejected() {
        let mut registry = FigureRegistry::new((4, 4));
        registry.select(FigureId(3), None);
        let fig = registry.drain().remove(0);
        assert!(matches!(render_png(&fig), Err(RenderError::Size { id: 3, .. })));
    }

    #[test]
    fn scope_closes_figures_on_drop() {
        let mut registry = FigureRegistry::default();
        registry.new_figure(None);
        {
            let mut scope = FigureScope::enter(&mut registry);
            assert!(scope.is_empty());
            scope.new_figure(None);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn ticks_are_round_numbers() {
        let t = ticks(Bounds { min: 0.0, max: 10.0 });
        assert_eq!(t, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }
}
