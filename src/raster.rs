// ============================================================================
// raster.rs — TriEvo
// CPU mirror of the coverage rule and fitness formula used by the WGSL
// kernels. The kernels are checked against these functions in tests.
// ============================================================================

use crate::candidate::Candidate;
use crate::config::Origin;

/// Borrowed RGBA8 pixel grid in texture row order.
#[derive(Clone, Copy)]
pub struct PixelGrid<'a> {
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
}

impl PixelGrid<'_> {
    fn rgb(&self, x: u32, row: u32) -> [f32; 3] {
        let i = ((row * self.width + x) * 4) as usize;
        [
            self.rgba[i] as f32 / 255.0,
            self.rgba[i + 1] as f32 / 255.0,
            self.rgba[i + 2] as f32 / 255.0,
        ]
    }
}

/// Texture row holding pixel-space row `y`.
pub fn texel_row(origin: Origin, y: u32, height: u32) -> u32 {
    match origin {
        Origin::TopLeft => y,
        Origin::BottomLeft => height - 1 - y,
    }
}

/// Twice the signed area; zero for degenerate triangles.
pub fn doubled_area(c: &Candidate) -> i64 {
    let [a, b, d] = c.vertices;
    (b[0] as i64 - a[0] as i64) * (d[1] as i64 - a[1] as i64)
        - (b[1] as i64 - a[1] as i64) * (d[0] as i64 - a[0] as i64)
}

/// Whether the centre of pixel (x, y) lies inside the triangle. Edges are
/// inclusive, either winding is accepted, degenerate triangles cover nothing.
/// Evaluated on doubled coordinates so everything stays integral.
pub fn covers(c: &Candidate, x: i32, y: i32) -> bool {
    if doubled_area(c) == 0 {
        return false;
    }
    let p = [2 * x + 1, 2 * y + 1];
    let v = c.vertices.map(|[vx, vy]| [2 * vx, 2 * vy]);
    let e0 = edge(v[0], v[1], p);
    let e1 = edge(v[1], v[2], p);
    let e2 = edge(v[2], v[0], p);
    (e0 >= 0 && e1 >= 0 && e2 >= 0) || (e0 <= 0 && e1 <= 0 && e2 <= 0)
}

fn edge(a: [i32; 2], b: [i32; 2], p: [i32; 2]) -> i32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

/// Pixel-space bounding box clipped to the image, as `(x0, y0, x1, y1)`
/// inclusive. `None` when the triangle lies entirely outside.
pub fn clipped_bounds(c: &Candidate, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let xs = c.vertices.map(|v| v[0]);
    let ys = c.vertices.map(|v| v[1]);
    let min_x = xs.iter().copied().min()?.max(0);
    let max_x = xs.iter().copied().max()?.min(width as i32 - 1);
    let min_y = ys.iter().copied().min()?.max(0);
    let max_y = ys.iter().copied().max()?.min(height as i32 - 1);
    if min_x > max_x || min_y > max_y {
        return None;
    }
    Some((min_x as u32, min_y as u32, max_x as u32, max_y as u32))
}

/// Score of one candidate and the colour it resolves to.
///
/// `fitness = Σ |ref − canvas|² − |ref − mean|²` over covered pixels, where
/// `mean` is the average reference colour under the triangle.
pub fn fitness(
    c: &Candidate,
    reference: PixelGrid<'_>,
    canvas: PixelGrid<'_>,
    origin: Origin,
) -> (f32, [f32; 4]) {
    let Some((x0, y0, x1, y1)) = clipped_bounds(c, reference.width, reference.height) else {
        return (0.0, [0.0, 0.0, 0.0, 1.0]);
    };

    let mut sum = [0.0f32; 3];
    let mut count = 0u32;
    for y in y0..=y1 {
        for x in x0..=x1 {
            if covers(c, x as i32, y as i32) {
                let r = reference.rgb(x, texel_row(origin, y, reference.height));
                for k in 0..3 {
                    sum[k] += r[k];
                }
                count += 1;
            }
        }
    }
    if count == 0 {
        return (0.0, [0.0, 0.0, 0.0, 1.0]);
    }
    let mean = sum.map(|s| s / count as f32);

    let mut score = 0.0f32;
    for y in y0..=y1 {
        for x in x0..=x1 {
            if covers(c, x as i32, y as i32) {
                let row = texel_row(origin, y, reference.height);
                let r = reference.rgb(x, row);
                let k = canvas.rgb(x, row);
                let mut before = 0.0;
                let mut after = 0.0;
                for ch in 0..3 {
                    before += (r[ch] - k[ch]) * (r[ch] - k[ch]);
                    after += (r[ch] - mean[ch]) * (r[ch] - mean[ch]);
                }
                score += before - after;
            }
        }
    }
    (score, [mean[0], mean[1], mean[2], 1.0])
}

/// Texture rows touched when `candidates` are composited, in row-major order.
pub fn covered_texels(
    candidates: &[Candidate],
    width: u32,
    height: u32,
    origin: Origin,
) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if candidates.iter().any(|c| covers(c, x as i32, y as i32)) {
                out.push((x, texel_row(origin, y, height)));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(v: [[i32; 2]; 3]) -> Candidate {
        Candidate::new(v, [1.0; 4])
    }

    #[test]
    fn coverage_is_winding_independent() {
        let ccw = tri([[0, 0], [4, 0], [0, 4]]);
        let cw = tri([[0, 0], [0, 4], [4, 0]]);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(covers(&ccw, x, y), covers(&cw, x, y), "({x},{y})");
            }
        }
        assert!(covers(&ccw, 0, 0));
        // centre (1.5, 2.5) sits on the hypotenuse x + y = 4
        assert!(covers(&ccw, 1, 2));
        assert!(!covers(&ccw, 3, 3));
    }

    #[test]
    fn bottom_left_flips_rows() {
        assert_eq!(texel_row(Origin::TopLeft, 0, 4), 0);
        assert_eq!(texel_row(Origin::BottomLeft, 0, 4), 3);
        assert_eq!(texel_row(Origin::BottomLeft, 3, 4), 0);
    }

    #[test]
    fn collinear_vertices_have_zero_area() {
        assert_eq!(doubled_area(&tri([[0, 0], [2, 2], [4, 4]])), 0);
        assert_eq!(doubled_area(&tri([[0, 0], [4, 0], [0, 4]])), 16);
    }

    #[test]
    fn degenerate_triangle_covers_nothing() {
        let line = tri([[0, 0], [2, 2], [4, 4]]);
        assert!((0..4).all(|i| !covers(&line, i, i)));
    }

    #[test]
    fn bounds_clip_to_image() {
        let c = tri([[-5, -5], [10, 1], [2, 10]]);
        assert_eq!(clipped_bounds(&c, 4, 4), Some((0, 0, 3, 3)));
        let outside = tri([[10, 10], [12, 10], [10, 12]]);
        assert_eq!(clipped_bounds(&outside, 4, 4), None);
    }

    #[test]
    fn fitness_rewards_covering_unmatched_pixels() {
        let red: Vec<u8> = [255, 0, 0, 255].repeat(16);
        let blank = vec![0u8; 64];
        let reference = PixelGrid { width: 4, height: 4, rgba: &red };
        let canvas = PixelGrid { width: 4, height: 4, rgba: &blank };

        let big = tri([[0, 0], [8, 0], [0, 8]]);
        let (score, color) = fitness(&big, reference, canvas, Origin::TopLeft);
        // every pixel centre with x + y <= 7 is covered: all 16
        assert!((score - 16.0).abs() < 1e-4, "{score}");
        assert!((color[0] - 1.0).abs() < 1e-6 && color[1].abs() < 1e-6);

        let outside = tri([[10, 10], [12, 10], [10, 12]]);
        assert_eq!(fitness(&outside, reference, canvas, Origin::TopLeft).0, 0.0);
    }

    #[test]
    fn fitness_is_zero_when_canvas_already_matches() {
        let red: Vec<u8> = [255, 0, 0, 255].repeat(16);
        let grid = PixelGrid { width: 4, height: 4, rgba: &red };
        let c = tri([[0, 0], [4, 0], [0, 4]]);
        assert!(fitness(&c, grid, grid, Origin::BottomLeft).0.abs() < 1e-6);
    }

    #[test]
    fn covered_texels_respect_origin() {
        let c = tri([[0, 0], [2, 0], [0, 2]]);
        let top = covered_texels(&[c], 4, 4, Origin::TopLeft);
        let bottom = covered_texels(&[c], 4, 4, Origin::BottomLeft);
        assert!(top.contains(&(0, 0)));
        assert!(bottom.contains(&(0, 3)));
        assert_eq!(top.len(), bottom.len());
    }
}
