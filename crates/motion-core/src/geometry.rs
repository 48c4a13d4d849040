// Affine2: 2-D homogeneous transforms
//
// Every coordinate frame in a sample is related to the others by a 3x3
// homogeneous matrix acting on column vectors [x, y, 1]:
//
//   world_from_agent   agent pose (rotation by yaw, then translation)
//   agent_from_world   its inverse
//   raster_from_agent  metres to pixels, agent placed at the raster centre
//   raster_from_world  raster_from_agent * agent_from_world
//
// Matrices compose right-to-left with `*`, exactly as the names read.

use std::f64::consts::PI;
use std::fmt;
use std::ops::Mul;

/// A 3x3 homogeneous transform on the plane, stored row-major.
#[derive(Clone, Copy, PartialEq)]
pub struct Affine2(pub [[f64; 3]; 3]);

impl Affine2 {
    pub const IDENTITY: Affine2 = Affine2([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Pose of a body at `translation` with heading `yaw` (radians).
    pub fn from_pose(translation: [f64; 2], yaw: f64) -> Self {
        let (s, c) = yaw.sin_cos();
        Affine2([
            [c, -s, translation[0]],
            [s, c, translation[1]],
            [0.0, 0.0, 1.0],
        ])
    }

    /// Axis-aligned scaling followed by a translation.
    pub fn scale_translate(scale: [f64; 2], translation: [f64; 2]) -> Self {
        Affine2([
            [scale[0], 0.0, translation[0]],
            [0.0, scale[1], translation[1]],
            [0.0, 0.0, 1.0],
        ])
    }

    /// Pure translation.
    pub fn translation(t: [f64; 2]) -> Self {
        Self::scale_translate([1.0, 1.0], t)
    }

    /// Inverse of a rigid or scale+translate transform.
    ///
    /// Only the upper 2x2 block is inverted generally; the bottom row is
    /// assumed to be `[0, 0, 1]`, which holds for every transform built here.
    /// A singular linear part yields non-finite entries.
    pub fn inverse(&self) -> Self {
        let m = &self.0;
        let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
        let inv_det = 1.0 / det;
        let a = m[1][1] * inv_det;
        let b = -m[0][1] * inv_det;
        let c = -m[1][0] * inv_det;
        let d = m[0][0] * inv_det;
        let tx = -(a * m[0][2] + b * m[1][2]);
        let ty = -(c * m[0][2] + d * m[1][2]);
        Affine2([[a, b, tx], [c, d, ty], [0.0, 0.0, 1.0]])
    }

    /// Apply the transform to a single point.
    pub fn transform_point(&self, p: [f64; 2]) -> [f64; 2] {
        let m = &self.0;
        [
            m[0][0] * p[0] + m[0][1] * p[1] + m[0][2],
            m[1][0] * p[0] + m[1][1] * p[1] + m[1][2],
        ]
    }

    /// Rotation angle encoded in the linear part.
    pub fn yaw(&self) -> f64 {
        self.0[1][0].atan2(self.0[0][0])
    }

    /// Flattened row-major copy, handy for stacking into arrays.
    pub fn to_flat(&self) -> [f64; 9] {
        let m = &self.0;
        [
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        ]
    }
}

impl Default for Affine2 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Affine2 {
    type Output = Affine2;

    fn mul(self, rhs: Affine2) -> Affine2 {
        let a = &self.0;
        let b = &rhs.0;
        let mut out = [[0.0; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (0..3).map(|k| a[i][k] * b[k][j]).sum();
            }
        }
        Affine2(out)
    }
}

impl fmt::Debug for Affine2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "Affine2[[{:.4}, {:.4}, {:.4}], [{:.4}, {:.4}, {:.4}], [{:.4}, {:.4}, {:.4}]]",
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2]
        )
    }
}

/// Map a batch of 2-D points through `transform`.
pub fn transform_points(points: &[[f64; 2]], transform: &Affine2) -> Vec<[f64; 2]> {
    points.iter().map(|&p| transform.transform_point(p)).collect()
}

/// Heading of a 3x3 rotation matrix about the z axis.
pub fn yaw_from_rotation(rotation: &[[f64; 3]; 3]) -> f64 {
    rotation[1][0].atan2(rotation[0][0])
}

/// 3x3 rotation about z by `yaw`; the inverse of [`yaw_from_rotation`].
pub fn rotation_from_yaw(yaw: f64) -> [[f64; 3]; 3] {
    let (s, c) = yaw.sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

/// Signed difference `to - from`, wrapped into `(-pi, pi]`.
pub fn angle_between(from: f64, to: f64) -> f64 {
    let mut d = (to - from) % (2.0 * PI);
    if d > PI {
        d -= 2.0 * PI;
    } else if d <= -PI {
        d += 2.0 * PI;
    }
    d
}
