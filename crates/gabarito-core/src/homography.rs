use nalgebra::{Matrix3, Point2, RowSVector, SMatrix, SVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Projective map `p_dst ~ H * p_src` in homogeneous coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let v = self.h * Vector3::new(p.x as f64, p.y as f64, 1.0);
        let w = v[2];
        Point2::new((v[0] / w) as f32, (v[1] / w) as f32)
    }

    /// Like [`Homography::apply`] but `None` when the point maps to (or behind)
    /// the line at infinity.
    #[inline]
    pub fn try_apply(&self, p: Point2<f32>) -> Option<Point2<f32>> {
        let v = self.h * Vector3::new(p.x as f64, p.y as f64, 1.0);
        let w = v[2];
        if !w.is_finite() || w.abs() < 1e-12 {
            return None;
        }
        let q = Point2::new((v[0] / w) as f32, (v[1] / w) as f32);
        (q.x.is_finite() && q.y.is_finite()).then_some(q)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// Determinant of `H` scaled so that `h33 == 1`.
    pub fn normalized_determinant(&self) -> f64 {
        let s = self.h[(2, 2)];
        if s.abs() < 1e-12 {
            return 0.0;
        }
        (self.h / s).determinant()
    }
}

/// Similarity that moves the centroid of `pts` to the origin and scales
/// their mean distance from it to `sqrt(2)` (Hartley conditioning).
fn conditioning(pts: &[Point2<f32>; 4]) -> Matrix3<f64> {
    let c = pts
        .iter()
        .fold(Vector2::<f64>::zeros(), |acc, p| acc + p.coords.cast::<f64>())
        / 4.0;
    let spread = pts
        .iter()
        .map(|p| (p.coords.cast::<f64>() - c).norm())
        .sum::<f64>()
        / 4.0;
    let s = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0)
}

fn condition(t: &Matrix3<f64>, p: Point2<f32>) -> (f64, f64) {
    let v = t * Vector3::new(p.x as f64, p.y as f64, 1.0);
    (v.x, v.y)
}

/// Homography taking each `src[i]` onto `dst[i]`.
///
/// Used with sheet-unit fiducial centers as `src` and their image positions
/// as `dst`. Both quads are conditioned, the 8 unknowns (`h33 = 1`) come
/// from an LU solve, and the result is rescaled so `h33 == 1`. `None` for
/// degenerate input such as repeated or collinear corners.
pub fn homography_from_4pt(src: &[Point2<f32>; 4], dst: &[Point2<f32>; 4]) -> Option<Homography> {
    let t_src = conditioning(src);
    let t_dst = conditioning(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (k, (&s, &d)) in src.iter().zip(dst).enumerate() {
        let (x, y) = condition(&t_src, s);
        let (u, v) = condition(&t_dst, d);
        a.set_row(
            2 * k,
            &RowSVector::<f64, 8>::from_row_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]),
        );
        a.set_row(
            2 * k + 1,
            &RowSVector::<f64, 8>::from_row_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]),
        );
        b[2 * k] = u;
        b[2 * k + 1] = v;
    }

    let x = a.lu().solve(&b)?;
    if !x.iter().all(|v| v.is_finite()) {
        return None;
    }
    #[rustfmt::skip]
    let conditioned = Matrix3::new(
        x[0], x[1], x[2],
        x[3], x[4], x[5],
        x[6], x[7], 1.0,
    );
    let h = t_dst.try_inverse()? * conditioned * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-12 {
        return None;
    }
    Some(Homography::new(h / scale))
}
