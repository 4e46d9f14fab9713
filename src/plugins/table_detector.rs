//! Ruled-table detection over a page raster.
//!
//! The page is binarised, long horizontal and vertical ink runs are collected
//! as line segments, adjacent rows/columns of the same stroke are merged, and
//! horizontal lines whose spans overlap are grouped. A group becomes a table
//! region when at least two vertical lines cross it.
//!
//! Output shape:
//!
//! ```json
//! { "tables": [ { "x1": 10, "y1": 20, "x2": 190, "y2": 120,
//!                 "rows": 3, "columns": 2 } ] }
//! ```

use super::{Plugin, PluginContext, PluginInput};
use crate::config::TABLE_DETECTOR_PLUGIN;
use crate::error::PluginError;
use image::GrayImage;
use serde::Serialize;

/// Bounding region of a detected table, in pixels of the rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableRegion {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub rows: usize,
    pub columns: usize,
}

/// A straight stroke: `pos` is the row (horizontal) or column (vertical),
/// `[start, end]` the extent along the stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    pos: u32,
    start: u32,
    end: u32,
}

impl Segment {
    fn overlaps(&self, other: &Segment) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Table detection plugin.
#[derive(Debug, Clone)]
pub struct TableDetectorPlugin {
    /// Luma below this is ink.
    pub threshold: u8,
    /// Shortest run, in pixels, that counts as a ruling line.
    pub min_line_len: u32,
}

impl Default for TableDetectorPlugin {
    fn default() -> Self {
        Self {
            threshold: 128,
            min_line_len: 100,
        }
    }
}

impl TableDetectorPlugin {
    pub fn detect(&self, gray: &GrayImage) -> Vec<TableRegion> {
        let horizontal = merge_strokes(self.runs(gray, true));
        let vertical = merge_strokes(self.runs(gray, false));
        if horizontal.len() < 2 || vertical.len() < 2 {
            return Vec::new();
        }

        let mut regions = Vec::new();
        for group in group_overlapping(&horizontal) {
            let x1 = group.iter().map(|s| s.start).min().unwrap_or(0);
            let x2 = group.iter().map(|s| s.end).max().unwrap_or(0);
            let y1 = group.iter().map(|s| s.pos).min().unwrap_or(0);
            let y2 = group.iter().map(|s| s.pos).max().unwrap_or(0);

            let crossing = vertical
                .iter()
                .filter(|v| v.pos + 1 >= x1 && v.pos <= x2 + 1)
                .filter(|v| v.start <= y2 + 1 && v.end + 1 >= y1)
                .count();
            if group.len() >= 2 && crossing >= 2 {
                regions.push(TableRegion {
                    x1,
                    y1,
                    x2,
                    y2,
                    rows: group.len() - 1,
                    columns: crossing - 1,
                });
            }
        }
        regions
    }

    /// Ink runs at least `min_line_len` long along rows (or columns).
    fn runs(&self, gray: &GrayImage, horizontal: bool) -> Vec<Segment> {
        let (w, h) = gray.dimensions();
        let (outer, inner) = if horizontal { (h, w) } else { (w, h) };
        let mut segments = Vec::new();

        for o in 0..outer {
            let mut run_start: Option<u32> = None;
            for i in 0..=inner {
                let ink = i < inner && {
                    let (x, y) = if horizontal { (i, o) } else { (o, i) };
                    gray.get_pixel(x, y).0[0] < self.threshold
                };
                match (ink, run_start) {
                    (true, None) => run_start = Some(i),
                    (false, Some(s)) => {
                        if i - s >= self.min_line_len {
                            segments.push(Segment {
                                pos: o,
                                start: s,
                                end: i - 1,
                            });
                        }
                        run_start = None;
                    }
                    _ => {}
                }
            }
        }
        segments
    }
}

/// Merge strokes on adjacent rows/columns that overlap (thick lines).
fn merge_strokes(mut segments: Vec<Segment>) -> Vec<Segment> {
    segments.sort_by_key(|s| (s.pos, s.start));
    let mut merged: Vec<Segment> = Vec::new();
    for seg in segments {
        if let Some(last) = merged
            .iter_mut()
            .rev()
            .take_while(|m| seg.pos <= m.pos + 1)
            .find(|m| m.overlaps(&seg))
        {
            last.pos = seg.pos.max(last.pos);
            last.start = last.start.min(seg.start);
            last.end = last.end.max(seg.end);
            continue;
        }
        merged.push(seg);
    }
    // `pos` tracked the last row of each stroke; that is fine for counting
    // and bounding purposes.
    merged
}

/// Group segments whose extents overlap transitively.
fn group_overlapping(segments: &[Segment]) -> Vec<Vec<Segment>> {
    let mut groups: Vec<Vec<Segment>> = Vec::new();
    for seg in segments {
        match groups
            .iter_mut()
            .find(|g| g.iter().any(|s| s.overlaps(seg)))
        {
            Some(g) => g.push(*seg),
            None => groups.push(vec![*seg]),
        }
    }
    groups
}

impl Plugin for TableDetectorPlugin {
    fn name(&self) -> &str {
        TABLE_DETECTOR_PLUGIN
    }

    fn validate(&self, input: &PluginInput<'_>) -> bool {
        input
            .image
            .is_some_and(|img| img.width() >= self.min_line_len || img.height() >= self.min_line_len)
    }

    fn process(
        &self,
        input: &PluginInput<'_>,
        _ctx: &PluginContext<'_>,
    ) -> Result<serde_json::Value, PluginError> {
        let image = input.image.ok_or_else(|| PluginError::Failed {
            plugin: TABLE_DETECTOR_PLUGIN.to_string(),
            message: "page has no image".to_string(),
        })?;
        let tables = self.detect(&image.to_luma8());
        let tables = serde_json::to_value(tables).map_err(|e| PluginError::Failed {
            plugin: TABLE_DETECTOR_PLUGIN.to_string(),
            message: e.to_string(),
        })?;
        Ok(serde_json::json!({ "tables": tables }))
    }
}
