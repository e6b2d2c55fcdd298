//! Parsed schematic data: die boundaries in source-file coordinates.
//!
//! A schematic is immutable after ingestion; corrections are made by
//! uploading a replacement.

use arcstr::ArcStr;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use wafergeom::{Bounds, CoordinateSystem, Point};

use crate::wafer::{Die, WaferMap};

/// Supported schematic file formats.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FormatType {
    Gdsii,
    Dxf,
    Svg,
}

impl FormatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gdsii => "gdsii",
            Self::Dxf => "dxf",
            Self::Svg => "svg",
        }
    }

    /// The formats the engine accepts, for error messages and the
    /// supported-formats listing.
    pub fn all() -> &'static [FormatType] {
        &[Self::Gdsii, Self::Dxf, Self::Svg]
    }
}

impl std::fmt::Display for FormatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An axis-aligned die footprint extracted from a schematic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DieBoundary {
    /// Unique within the enclosing schematic.
    pub die_id: ArcStr,
    pub bounds: Bounds,
    pub available: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,
}

impl DieBoundary {
    pub fn new(die_id: impl Into<ArcStr>, bounds: Bounds) -> Self {
        Self {
            die_id: die_id.into(),
            bounds,
            available: true,
            metadata: IndexMap::new(),
        }
    }

    #[inline]
    pub fn center(&self) -> Point {
        self.bounds.center()
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.bounds.width()
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.bounds.height()
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.bounds.area()
    }

    #[inline]
    pub fn contains(&self, pt: Point) -> bool {
        self.bounds.contains(pt)
    }
}

/// Metadata recorded at ingestion time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchematicMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    pub scale_factor: f64,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub extra: IndexMap<String, Value>,
}

/// Derived statistics over a schematic, computed on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchematicStatistics {
    pub die_count: usize,
    pub available_die_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_bounds: Option<Bounds>,
    pub layout_width: f64,
    pub layout_height: f64,
}

/// The uniform die-boundary model every parser produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchematicData {
    pub id: Uuid,
    pub filename: String,
    pub format_type: FormatType,
    pub upload_date: DateTime<Utc>,
    pub coordinate_system: CoordinateSystem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wafer_size: Option<String>,
    pub dies: Vec<DieBoundary>,
    pub metadata: SchematicMetadata,
}

impl SchematicData {
    pub fn new(
        filename: impl Into<String>,
        format_type: FormatType,
        coordinate_system: CoordinateSystem,
        dies: Vec<DieBoundary>,
        metadata: SchematicMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            format_type,
            upload_date: Utc::now(),
            coordinate_system,
            wafer_size: None,
            dies,
            metadata,
        }
    }

    #[inline]
    pub fn die_count(&self) -> usize {
        self.dies.len()
    }

    pub fn available_die_count(&self) -> usize {
        self.dies.iter().filter(|d| d.available).count()
    }

    /// The minimal bounds enclosing every die, or `None` for an empty
    /// schematic.
    pub fn layout_bounds(&self) -> Option<Bounds> {
        Bounds::enclosing(self.dies.iter().map(|d| d.bounds))
    }

    pub fn statistics(&self) -> SchematicStatistics {
        let layout_bounds = self.layout_bounds();
        SchematicStatistics {
            die_count: self.die_count(),
            available_die_count: self.available_die_count(),
            layout_bounds,
            layout_width: layout_bounds.map(|b| b.width()).unwrap_or(0.0),
            layout_height: layout_bounds.map(|b| b.height()).unwrap_or(0.0),
        }
    }

    /// Finds the boundary containing `pt` by linear scan.
    ///
    /// The validator builds an interval index instead; this is for one-off
    /// queries.
    pub fn find_boundary_at(&self, pt: Point) -> Option<&DieBoundary> {
        self.dies.iter().find(|d| d.contains(pt))
    }

    /// Synthesizes a [`WaferMap`] from the die boundaries, assigning grid
    /// indices by sorting centers in row-major order. Availability inherits
    /// from the boundary.
    pub fn synthesize_wafer_map(&self) -> Option<GridSynthesis> {
        if self.dies.is_empty() {
            return None;
        }

        let median_height = median(self.dies.iter().map(|d| d.height()))?;
        let row_tolerance = (median_height / 2.0).max(f64::EPSILON);

        // Group boundaries into rows of similar center-y, bottom-up.
        let mut order: Vec<usize> = (0..self.dies.len()).collect();
        order.sort_by(|&a, &b| {
            let (ca, cb) = (self.dies[a].center(), self.dies[b].center());
            ca.y.partial_cmp(&cb.y)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ca.x.partial_cmp(&cb.x).unwrap_or(std::cmp::Ordering::Equal))
        });

        let mut rows: Vec<Vec<usize>> = Vec::new();
        let mut row_anchor = f64::NEG_INFINITY;
        for &i in &order {
            let cy = self.dies[i].center().y;
            match rows.last_mut() {
                Some(row) if (cy - row_anchor).abs() <= row_tolerance => row.push(i),
                _ => {
                    rows.push(vec![i]);
                    row_anchor = cy;
                }
            }
        }

        let mut dies = Vec::with_capacity(self.dies.len());
        let mut cells = Vec::with_capacity(self.dies.len());
        for (gy, row) in rows.iter().enumerate() {
            let mut row = row.clone();
            row.sort_by(|&a, &b| {
                self.dies[a]
                    .center()
                    .x
                    .partial_cmp(&self.dies[b].center().x)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for (gx, &i) in row.iter().enumerate() {
                dies.push(Die {
                    x: gx as i32,
                    y: gy as i32,
                    available: self.dies[i].available,
                });
                cells.push((gx as i32, gy as i32, i));
            }
        }

        // Affine grid frame: origin at the first cell's center, pitch from
        // median center spacing. Falls back to die size for single rows or
        // columns.
        let origin = cells
            .iter()
            .find(|(gx, gy, _)| *gx == 0 && *gy == 0)
            .map(|&(_, _, i)| self.dies[i].center())?;
        let pitch_x = median(rows.iter().flat_map(|row| {
            row.windows(2)
                .map(|w| self.dies[w[1]].center().x - self.dies[w[0]].center().x)
        }))
        .unwrap_or_else(|| median(self.dies.iter().map(|d| d.width())).unwrap_or(1.0));
        let pitch_y = median(
            rows.windows(2)
                .map(|w| self.dies[w[1][0]].center().y - self.dies[w[0][0]].center().y),
        )
        .unwrap_or(median_height);

        let mut wafer = WaferMap::new(dies);
        if let Some(size) = &self.wafer_size {
            wafer = wafer.with_wafer_size(size.clone());
        }
        Some(GridSynthesis {
            wafer,
            origin,
            pitch: Point::new(pitch_x.max(f64::EPSILON), pitch_y.max(f64::EPSILON)),
        })
    }
}

/// A wafer map synthesized from die boundaries, plus the affine frame that
/// maps grid indices back into schematic coordinates.
#[derive(Debug, Clone)]
pub struct GridSynthesis {
    pub wafer: WaferMap,
    /// Schematic-space center of grid cell (0, 0).
    pub origin: Point,
    /// Median center-to-center spacing along x and y.
    pub pitch: Point,
}

impl GridSynthesis {
    /// Maps a (possibly fractional, transformed) grid-space point into
    /// schematic coordinates.
    pub fn grid_to_schematic(&self, grid: Point) -> Point {
        Point::new(
            self.origin.x + grid.x * self.pitch.x,
            self.origin.y + grid.y * self.pitch.y,
        )
    }
}

/// Estimates the wafer size label from the layout diameter in millimeters.
pub fn estimate_wafer_size(diameter_mm: f64) -> Option<String> {
    if !diameter_mm.is_finite() || diameter_mm <= 0.0 {
        return None;
    }
    let label = if diameter_mm < 100.0 {
        "100mm"
    } else if diameter_mm < 150.0 {
        "150mm"
    } else if diameter_mm < 200.0 {
        "200mm"
    } else if diameter_mm < 300.0 {
        "300mm"
    } else {
        "450mm"
    };
    Some(label.to_string())
}

pub(crate) fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}
