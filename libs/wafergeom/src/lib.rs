//! Core geometric types for wafer-map and die-boundary processing.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod transform;

pub use transform::{TransformConfig, Transformation};

/// A point in two-dimensional layout-space.
///
/// Coordinates carry no unit at the type level; the unit is inherited from
/// the enclosing [`CoordinateSystem`].
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Creates a new [`Point`] from (x, y) coordinates.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Returns the origin, (0, 0).
    #[inline]
    pub fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Creates a new [`Point`] shifted by `p`.
    #[inline]
    pub fn translated(&self, p: Point) -> Self {
        Self::new(self.x + p.x, self.y + p.y)
    }
}

impl std::ops::Add<Point> for Point {
    type Output = Self;
    fn add(self, rhs: Point) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub<Point> for Point {
    type Output = Self;
    fn sub(self, rhs: Point) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl From<(f64, f64)> for Point {
    fn from(value: (f64, f64)) -> Self {
        Self {
            x: value.0,
            y: value.1,
        }
    }
}

impl From<Point> for (f64, f64) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

/// An axis-aligned bounding box.
///
/// Invariant: `x_min <= x_max` and `y_min <= y_max`. [`Bounds::new`]
/// normalizes swapped corners rather than failing.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct Bounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Bounds {
    /// Creates new [`Bounds`], normalizing the corner ordering.
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min: x_min.min(x_max),
            y_min: y_min.min(y_max),
            x_max: x_min.max(x_max),
            y_max: y_min.max(y_max),
        }
    }

    /// Creates [`Bounds`] from two opposite corners.
    pub fn from_corners(p0: Point, p1: Point) -> Self {
        Self::new(p0.x, p0.y, p1.x, p1.y)
    }

    /// Creates [`Bounds`] centered at `center` with the given width and height.
    pub fn from_center_size(center: Point, width: f64, height: f64) -> Self {
        Self::new(
            center.x - width / 2.0,
            center.y - height / 2.0,
            center.x + width / 2.0,
            center.y + height / 2.0,
        )
    }

    /// Creates empty [`Bounds`] containing the given point.
    pub fn from_point(p: Point) -> Self {
        Self::new(p.x, p.y, p.x, p.y)
    }

    /// Returns the center point.
    pub fn center(&self) -> Point {
        Point::new(
            (self.x_min + self.x_max) / 2.0,
            (self.y_min + self.y_max) / 2.0,
        )
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Width/height ratio, normalized so the result is always >= 1.
    ///
    /// Returns infinity for degenerate (zero-height or zero-width) bounds.
    pub fn aspect_ratio(&self) -> f64 {
        let (w, h) = (self.width(), self.height());
        let (long, short) = if w >= h { (w, h) } else { (h, w) };
        if short == 0.0 {
            f64::INFINITY
        } else {
            long / short
        }
    }

    /// Checks containment, inclusive of the boundary.
    pub fn contains(&self, pt: Point) -> bool {
        self.x_min <= pt.x && pt.x <= self.x_max && self.y_min <= pt.y && pt.y <= self.y_max
    }

    /// Checks whether `other` lies entirely within `self` (inclusive).
    pub fn encloses(&self, other: &Bounds) -> bool {
        self.x_min <= other.x_min
            && self.y_min <= other.y_min
            && self.x_max >= other.x_max
            && self.y_max >= other.y_max
    }

    /// Checks whether the two bounds overlap (inclusive of edges).
    pub fn intersects(&self, other: &Bounds) -> bool {
        !(other.x_max < self.x_min
            || self.x_max < other.x_min
            || other.y_max < self.y_min
            || self.y_max < other.y_min)
    }

    /// Returns the minimal [`Bounds`] containing both inputs.
    pub fn union(&self, other: &Bounds) -> Self {
        Self {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    /// Grows the bounds to include `pt`.
    pub fn add_point(&self, pt: Point) -> Self {
        Self {
            x_min: self.x_min.min(pt.x),
            y_min: self.y_min.min(pt.y),
            x_max: self.x_max.max(pt.x),
            y_max: self.y_max.max(pt.y),
        }
    }

    /// Expands the bounds by `amount` on all sides.
    pub fn expand(&self, amount: f64) -> Self {
        Self::new(
            self.x_min - amount,
            self.y_min - amount,
            self.x_max + amount,
            self.y_max + amount,
        )
    }

    /// Computes the minimal [`Bounds`] enclosing all items, or `None` for an
    /// empty iterator.
    pub fn enclosing(bounds: impl IntoIterator<Item = Bounds>) -> Option<Self> {
        bounds.into_iter().reduce(|acc, b| acc.union(&b))
    }
}

/// Tagged coordinate-system identifier.
///
/// Determines origin placement and y-axis direction for coordinates stored
/// alongside it. The engine's canonical system is
/// [`CoordinateSystem::CartesianCenterOrigin`] with y up.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CoordinateSystem {
    #[default]
    CartesianCenterOrigin,
    CartesianCornerOrigin,
    Polar,
    GdsiiUnits,
    CadUnits,
    Normalized01,
    SvgUnits,
}

impl Display for CoordinateSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CartesianCenterOrigin => "cartesianCenterOrigin",
            Self::CartesianCornerOrigin => "cartesianCornerOrigin",
            Self::Polar => "polar",
            Self::GdsiiUnits => "gdsiiUnits",
            Self::CadUnits => "cadUnits",
            Self::Normalized01 => "normalized01",
            Self::SvgUnits => "svgUnits",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("error parsing coordinate system `{original}`")]
pub struct CoordinateSystemParseError {
    original: String,
}

impl FromStr for CoordinateSystem {
    type Err = CoordinateSystemParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cartesianCenterOrigin" => Ok(Self::CartesianCenterOrigin),
            "cartesianCornerOrigin" => Ok(Self::CartesianCornerOrigin),
            "polar" => Ok(Self::Polar),
            "gdsiiUnits" => Ok(Self::GdsiiUnits),
            "cadUnits" => Ok(Self::CadUnits),
            "normalized01" => Ok(Self::Normalized01),
            "svgUnits" => Ok(Self::SvgUnits),
            _ => Err(CoordinateSystemParseError {
                original: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_normalize_corners() {
        let b = Bounds::new(10.0, 8.0, 2.0, 3.0);
        assert_eq!(b, Bounds::new(2.0, 3.0, 10.0, 8.0));
        assert_eq!(b.width(), 8.0);
        assert_eq!(b.height(), 5.0);
    }

    #[test]
    fn bounds_contains_is_inclusive() {
        let b = Bounds::new(0.0, 0.0, 4.0, 4.0);
        assert!(b.contains(Point::new(0.0, 0.0)));
        assert!(b.contains(Point::new(4.0, 4.0)));
        assert!(b.contains(Point::new(2.0, 3.0)));
        assert!(!b.contains(Point::new(4.0001, 2.0)));
    }

    #[test]
    fn enclosing_covers_all_inputs() {
        let items = vec![
            Bounds::new(0.0, 0.0, 1.0, 1.0),
            Bounds::new(5.0, -2.0, 6.0, 3.0),
            Bounds::new(-1.0, 0.5, 0.0, 0.75),
        ];
        let enclosing = Bounds::enclosing(items.iter().copied()).unwrap();
        for b in &items {
            assert!(enclosing.encloses(b));
        }
        assert_eq!(enclosing, Bounds::new(-1.0, -2.0, 6.0, 3.0));
        assert!(Bounds::enclosing(std::iter::empty()).is_none());
    }

    #[test]
    fn aspect_ratio_is_orientation_independent() {
        assert_eq!(Bounds::new(0.0, 0.0, 8.0, 2.0).aspect_ratio(), 4.0);
        assert_eq!(Bounds::new(0.0, 0.0, 2.0, 8.0).aspect_ratio(), 4.0);
        assert!(Bounds::new(0.0, 0.0, 2.0, 0.0).aspect_ratio().is_infinite());
    }

    #[test]
    fn distance() {
        let d = Point::new(0.0, 0.0).distance_to(Point::new(3.0, 4.0));
        assert_eq!(d, 5.0);
    }
}
