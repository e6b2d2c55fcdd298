//! The wafer model: dies on an integer grid, keyed by position.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use wafergeom::Point;

/// One chip-sized region on a wafer.
///
/// Grid coordinates are logical row/column indices, not physical
/// micrometers.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Die {
    pub x: i32,
    pub y: i32,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

impl Die {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            available: true,
        }
    }

    pub fn unavailable(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            available: false,
        }
    }

    #[inline]
    pub fn coord(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// The die position as a real-valued point, for geometric operations.
    #[inline]
    pub fn position(&self) -> Point {
        Point::new(self.x as f64, self.y as f64)
    }
}

/// A finite set of dies, uniquely keyed by grid position.
///
/// When the same position is inserted twice, the later die replaces the
/// earlier one, preserving the uniqueness invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "WaferMapRepr", into = "WaferMapRepr")]
pub struct WaferMap {
    dies: Vec<Die>,
    index: HashMap<(i32, i32), usize>,
    wafer_size: Option<String>,
    product_type: Option<String>,
    lot_id: Option<String>,
}

impl WaferMap {
    pub fn new(dies: impl IntoIterator<Item = Die>) -> Self {
        let mut map = Self::default();
        for die in dies {
            map.insert(die);
        }
        map
    }

    pub fn with_wafer_size(mut self, wafer_size: impl Into<String>) -> Self {
        self.wafer_size = Some(wafer_size.into());
        self
    }

    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    pub fn with_lot_id(mut self, lot_id: impl Into<String>) -> Self {
        self.lot_id = Some(lot_id.into());
        self
    }

    /// Inserts a die, replacing any existing die at the same position.
    pub fn insert(&mut self, die: Die) {
        match self.index.get(&die.coord()) {
            Some(&i) => self.dies[i] = die,
            None => {
                self.index.insert(die.coord(), self.dies.len());
                self.dies.push(die);
            }
        }
    }

    #[inline]
    pub fn dies(&self) -> &[Die] {
        &self.dies
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dies.is_empty()
    }

    pub fn get(&self, x: i32, y: i32) -> Option<&Die> {
        self.index.get(&(x, y)).map(|&i| &self.dies[i])
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.index.contains_key(&(x, y))
    }

    pub fn available_dies(&self) -> impl Iterator<Item = &Die> {
        self.dies.iter().filter(|d| d.available)
    }

    pub fn available_count(&self) -> usize {
        self.available_dies().count()
    }

    pub fn wafer_size(&self) -> Option<&str> {
        self.wafer_size.as_deref()
    }

    pub fn product_type(&self) -> Option<&str> {
        self.product_type.as_deref()
    }

    pub fn lot_id(&self) -> Option<&str> {
        self.lot_id.as_deref()
    }

    /// Inclusive (x_min, y_min, x_max, y_max) over all dies.
    pub fn grid_bounds(&self) -> Option<(i32, i32, i32, i32)> {
        let first = self.dies.first()?;
        let mut bounds = (first.x, first.y, first.x, first.y);
        for die in &self.dies[1..] {
            bounds.0 = bounds.0.min(die.x);
            bounds.1 = bounds.1.min(die.y);
            bounds.2 = bounds.2.max(die.x);
            bounds.3 = bounds.3.max(die.y);
        }
        Some(bounds)
    }

    /// Geometric centroid of the available dies.
    pub fn centroid(&self) -> Option<Point> {
        let mut n = 0usize;
        let mut sum = Point::zero();
        for die in self.available_dies() {
            sum = sum + die.position();
            n += 1;
        }
        if n == 0 {
            None
        } else {
            Some(Point::new(sum.x / n as f64, sum.y / n as f64))
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaferMapRepr {
    dies: Vec<Die>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wafer_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    product_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lot_id: Option<String>,
}

impl From<WaferMapRepr> for WaferMap {
    fn from(repr: WaferMapRepr) -> Self {
        let mut map = WaferMap::new(repr.dies);
        map.wafer_size = repr.wafer_size;
        map.product_type = repr.product_type;
        map.lot_id = repr.lot_id;
        map
    }
}

impl From<WaferMap> for WaferMapRepr {
    fn from(map: WaferMap) -> Self {
        Self {
            dies: map.dies,
            wafer_size: map.wafer_size,
            product_type: map.product_type,
            lot_id: map.lot_id,
        }
    }
}
