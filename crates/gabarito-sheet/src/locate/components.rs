//! Dark-region grouping for fiducial search.

use gabarito_core::{GrayImageView, Photometry};
use nalgebra::Point2;

/// One 4-connected region of dark pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Component {
    pub area: usize,
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
    sum_x: f64,
    sum_y: f64,
}

impl Component {
    fn seed(x: usize, y: usize) -> Self {
        Self {
            area: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            sum_x: 0.0,
            sum_y: 0.0,
        }
    }

    fn add(&mut self, x: usize, y: usize) {
        self.area += 1;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.sum_x += x as f64;
        self.sum_y += y as f64;
    }

    #[inline]
    pub fn bbox_width(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    #[inline]
    pub fn bbox_height(&self) -> usize {
        self.max_y - self.min_y + 1
    }

    /// Area over bounding-box area.
    pub fn fill_ratio(&self) -> f32 {
        self.area as f32 / (self.bbox_width() * self.bbox_height()) as f32
    }

    /// Long side over short side of the bounding box.
    pub fn aspect(&self) -> f32 {
        let w = self.bbox_width() as f32;
        let h = self.bbox_height() as f32;
        w.max(h) / w.min(h)
    }

    /// Mean pixel position (pixel centers at integer coordinates).
    pub fn centroid(&self) -> Point2<f32> {
        let n = self.area.max(1) as f64;
        Point2::new((self.sum_x / n) as f32, (self.sum_y / n) as f32)
    }

    pub fn touches_border(&self, width: usize, height: usize) -> bool {
        self.min_x == 0 || self.min_y == 0 || self.max_x + 1 >= width || self.max_y + 1 >= height
    }
}

/// Collect the 4-connected components of pixels `photometry` calls dark.
///
/// Components are discovered in row-major order of their first pixel, so
/// the output order is a pure function of the image. Regions smaller than
/// `min_area` are dropped.
pub(crate) fn dark_components(
    img: &GrayImageView<'_>,
    photometry: &Photometry,
    min_area: usize,
) -> Vec<Component> {
    let (w, h) = (img.width, img.height);
    let mut visited = vec![false; w * h];
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut out = Vec::new();

    let is_dark = |x: usize, y: usize| photometry.is_dark(img.data[y * img.stride + x]);

    for y in 0..h {
        for x in 0..w {
            if visited[y * w + x] || !is_dark(x, y) {
                continue;
            }

            let mut comp = Component::seed(x, y);
            visited[y * w + x] = true;
            stack.push((x, y));

            while let Some((cx, cy)) = stack.pop() {
                comp.add(cx, cy);

                let mut visit = |nx: usize, ny: usize| {
                    let idx = ny * w + nx;
                    if !visited[idx] && is_dark(nx, ny) {
                        visited[idx] = true;
                        stack.push((nx, ny));
                    }
                };
                if cx > 0 {
                    visit(cx - 1, cy);
                }
                if cx + 1 < w {
                    visit(cx + 1, cy);
                }
                if cy > 0 {
                    visit(cx, cy - 1);
                }
                if cy + 1 < h {
                    visit(cx, cy + 1);
                }
            }

            if comp.area >= min_area {
                out.push(comp);
            }
        }
    }

    out
}
