//! Transformation types and traits.

use serde::{Deserialize, Serialize};

use super::Point;

/// Declarative transformation parameters.
///
/// Component transforms are applied in the fixed order
/// flip → scale → rotate → translate. Rotation is about the origin; callers
/// needing rotation about another point re-center via the offsets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformConfig {
    /// Rotation in degrees, counter-clockwise. Accepted range is [-360, 360].
    pub rotation_angle_deg: f64,
    /// Uniform scale factor. Must be positive.
    pub scale_factor: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub flip_x: bool,
    pub flip_y: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            rotation_angle_deg: 0.0,
            scale_factor: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            flip_x: false,
            flip_y: false,
        }
    }
}

impl TransformConfig {
    /// Returns `true` if the config is the identity transform.
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

/// A 2x2 matrix and two-entry translation vector, used for movement of
/// [`Point`]s.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Transformation {
    /// The transformation matrix in row-major order.
    pub a: [[f64; 2]; 2],
    /// The x-y translation applied after the matrix.
    pub b: [f64; 2],
}

impl Default for Transformation {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transformation {
    /// Returns the identity transform, leaving any transformed point unmodified.
    pub fn identity() -> Self {
        Self {
            a: [[1.0, 0.0], [0.0, 1.0]],
            b: [0.0, 0.0],
        }
    }

    /// Returns a translation by `(x, y)`.
    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            a: [[1.0, 0.0], [0.0, 1.0]],
            b: [x, y],
        }
    }

    /// Returns a rotation by `angle` degrees, counter-clockwise.
    pub fn rotate(angle: f64) -> Self {
        let sin = angle.to_radians().sin();
        let cos = angle.to_radians().cos();
        Self {
            a: [[cos, -sin], [sin, cos]],
            b: [0.0, 0.0],
        }
    }

    /// Returns a scaling by `sx` along x and `sy` along y.
    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: [[sx, 0.0], [0.0, sy]],
            b: [0.0, 0.0],
        }
    }

    /// Returns a reflection across the y-axis (x negated) and/or the x-axis
    /// (y negated).
    pub fn flip(flip_x: bool, flip_y: bool) -> Self {
        let fx = if flip_x { -1.0 } else { 1.0 };
        let fy = if flip_y { -1.0 } else { 1.0 };
        Self::scale(fx, fy)
    }

    /// Creates a [`Transformation`] from a [`TransformConfig`], composing
    /// flip, scale, rotation, and translation in that order.
    pub fn from_config(cfg: &TransformConfig) -> Self {
        let mut t = Self::flip(cfg.flip_x, cfg.flip_y);
        t = Self::cascade(Self::scale(cfg.scale_factor, cfg.scale_factor), t);
        t = Self::cascade(Self::rotate(cfg.rotation_angle_deg), t);
        Self::cascade(Self::translate(cfg.offset_x, cfg.offset_y), t)
    }

    /// Creates a new [`Transformation`] that applies `child` first, then
    /// `parent`.
    ///
    /// Note this operation *is not* commutative.
    pub fn cascade(parent: Transformation, child: Transformation) -> Transformation {
        let mut b = matvec(&parent.a, &child.b);
        b[0] += parent.b[0];
        b[1] += parent.b[1];
        let a = matmul(&parent.a, &child.a);
        Self { a, b }
    }

    /// Applies the transformation to a point.
    pub fn apply(&self, p: Point) -> Point {
        let v = matvec(&self.a, &[p.x, p.y]);
        Point::new(v[0] + self.b[0], v[1] + self.b[1])
    }

    /// Returns the inverse transformation, or `None` when the matrix is
    /// singular (determinant within 1e-12 of zero).
    pub fn invert(&self) -> Option<Transformation> {
        let det = self.a[0][0] * self.a[1][1] - self.a[0][1] * self.a[1][0];
        if det.abs() < 1e-12 {
            return None;
        }
        let inv = [
            [self.a[1][1] / det, -self.a[0][1] / det],
            [-self.a[1][0] / det, self.a[0][0] / det],
        ];
        let b = matvec(&inv, &self.b);
        Some(Transformation {
            a: inv,
            b: [-b[0], -b[1]],
        })
    }
}

impl From<&TransformConfig> for Transformation {
    fn from(cfg: &TransformConfig) -> Self {
        Self::from_config(cfg)
    }
}

/// Multiplies two 2x2 matrices, returning a new 2x2 matrix.
fn matmul(a: &[[f64; 2]; 2], b: &[[f64; 2]; 2]) -> [[f64; 2]; 2] {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}

/// Multiplies a 2x2 matrix by a 2-entry vector, returning a new 2-entry vector.
fn matvec(a: &[[f64; 2]; 2], v: &[f64; 2]) -> [f64; 2] {
    [
        a[0][0] * v[0] + a[0][1] * v[1],
        a[1][0] * v[0] + a[1][1] * v[1],
    ]
}
