//! Quad fitting on traced component boundaries.
//!
//! Each candidate comes out of a farthest-point diagonal split: the two
//! most distant boundary points fix a diagonal, the most deviating point
//! on either arc fixes the remaining corners. Corners are then refined to
//! subpixel precision by intersecting total-least-squares line fits of
//! the side arcs, with lens distortion removed point by point first.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::contour::{trace_boundary, Component};
use crate::threshold::BinaryImage;
use crate::undistort::PointCorrector;
use crate::Real;

// Both diagonal arcs must bulge at least this fraction of the diagonal,
// otherwise the shape is too flat to be a quad.
const DIAG_DEV_MIN_FRAC: Real = 0.08;
// Fixed pixel slack on the per-side straightness check, on top of the
// length-proportional tolerance.
const SIDE_SLACK: Real = 1.5;

/// Contour grouping policy for the detector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HullMode {
    /// Fit each component boundary independently.
    #[default]
    Off,
    /// Merge components with touching bounding boxes and fit the convex
    /// hull of their combined boundaries. Recovers markers whose border
    /// is broken by occlusion, at extra cost.
    Merge,
}

/// Geometry gates applied to every fitted quad.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadParams {
    /// Minimum enclosed area, full-resolution pixels.
    pub min_area: Real,
    /// Maximum enclosed area, full-resolution pixels.
    pub max_area: Real,
    /// Allowed boundary deviation per side as a fraction of side length.
    pub side_tolerance: Real,
    /// Reject corners whose adjacent sides are flatter than this |cos|.
    pub max_corner_cos: Real,
    pub hull: HullMode,
}

impl Default for QuadParams {
    fn default() -> Self {
        Self {
            min_area: 70.0,
            max_area: 100_000.0,
            side_tolerance: 0.10,
            max_corner_cos: 0.966,
            hull: HullMode::Off,
        }
    }
}

/// One detected quadrilateral, alive for the current frame only.
#[derive(Clone, Copy, Debug)]
pub struct MarkerCandidate {
    /// Corners in ideal image coordinates, clockwise in screen space.
    pub corners: [Point2<Real>; 4],
    /// Intersection of the diagonals.
    pub center: Point2<Real>,
    /// Enclosed area estimate, full-resolution pixels.
    pub area: Real,
    /// Corner index nearest the boundary start; orientation hypothesis
    /// refined later by the matcher.
    pub dir_hint: usize,
}

/// Lazy candidate sequence over the labeled components of one frame.
pub struct QuadScan<'a> {
    bin: &'a BinaryImage,
    corrector: PointCorrector<'a>,
    params: QuadParams,
    groups: std::vec::IntoIter<Vec<Component>>,
}

impl<'a> QuadScan<'a> {
    pub fn new(
        bin: &'a BinaryImage,
        corrector: PointCorrector<'a>,
        params: QuadParams,
        components: Vec<Component>,
    ) -> Self {
        let groups = match params.hull {
            HullMode::Off => components.into_iter().map(|c| vec![c]).collect(),
            HullMode::Merge => cluster_by_bbox(components),
        };
        Self {
            bin,
            corrector,
            params,
            groups: groups.into_iter(),
        }
    }

    fn fit_group(&self, group: &[Component]) -> Option<MarkerCandidate> {
        let scale = self.bin.scale as Real;
        let mut points: Vec<Point2<Real>> = Vec::new();
        for c in group {
            let chain = trace_boundary(self.bin, c.seed, c.area);
            points.extend(
                chain
                    .iter()
                    .map(|&(x, y)| Point2::new(x as Real * scale, y as Real * scale)),
            );
        }
        let points = match self.params.hull {
            HullMode::Off => points,
            HullMode::Merge => convex_hull(points),
        };
        fit_quad(&points, &self.corrector, &self.params)
    }
}

impl<'a> Iterator for QuadScan<'a> {
    type Item = MarkerCandidate;

    fn next(&mut self) -> Option<MarkerCandidate> {
        loop {
            let group = self.groups.next()?;
            if let Some(c) = self.fit_group(&group) {
                return Some(c);
            }
        }
    }
}

fn cluster_by_bbox(comps: Vec<Component>) -> Vec<Vec<Component>> {
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    fn touch(a: &[usize; 4], b: &[usize; 4]) -> bool {
        a[0] <= b[2] && b[0] <= a[2] && a[1] <= b[3] && b[1] <= a[3]
    }

    let n = comps.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in i + 1..n {
            if touch(&comps[i].bbox, &comps[j].bbox) {
                let ri = root(&mut parent, i);
                let rj = root(&mut parent, j);
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                }
            }
        }
    }
    let mut index = std::collections::HashMap::new();
    let mut groups: Vec<Vec<Component>> = Vec::new();
    for (i, c) in comps.into_iter().enumerate() {
        let r = root(&mut parent, i);
        let slot = *index.entry(r).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(c);
    }
    // keep discovery order deterministic across runs
    groups.sort_by_key(|g| (g[0].seed.1, g[0].seed.0));
    groups
}

/// Andrew's monotone chain; returns the hull clockwise in screen space.
fn convex_hull(mut points: Vec<Point2<Real>>) -> Vec<Point2<Real>> {
    points.sort_by(|a, b| {
        a.x.partial_cmp(&b.x)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    points.dedup_by(|a, b| a.x == b.x && a.y == b.y);
    if points.len() < 3 {
        return points;
    }
    let cross = |o: &Point2<Real>, a: &Point2<Real>, b: &Point2<Real>| {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };
    let mut hull: Vec<Point2<Real>> = Vec::with_capacity(points.len());
    for p in &points {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }
    let lower = hull.len() + 1;
    for p in points.iter().rev() {
        while hull.len() >= lower && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }
    hull.pop();
    hull
}

fn farthest_from(points: &[Point2<Real>], origin: Point2<Real>) -> usize {
    let mut best = 0;
    let mut best_d = -1.0;
    for (i, p) in points.iter().enumerate() {
        let d = (p - origin).norm_squared();
        if d > best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Index and size of the largest perpendicular deviation from the line
/// `a`-`b` over the open arc `(from, to)`.
fn arc_max_deviation(
    points: &[Point2<Real>],
    from: usize,
    to: usize,
    a: Point2<Real>,
    b: Point2<Real>,
) -> Option<(usize, Real)> {
    let n = points.len();
    let axis = b - a;
    let len = axis.norm();
    let mut best: Option<(usize, Real)> = None;
    let mut i = (from + 1) % n;
    while i != to {
        let dev = axis.perp(&(points[i] - a)).abs() / len;
        if best.map_or(true, |(_, d)| dev > d) {
            best = Some((i, dev));
        }
        i = (i + 1) % n;
    }
    best
}

fn fit_quad(
    points: &[Point2<Real>],
    corrector: &PointCorrector<'_>,
    params: &QuadParams,
) -> Option<MarkerCandidate> {
    let n = points.len();
    if n < 4 {
        return None;
    }

    let ia = farthest_from(points, points[0]);
    let ib = farthest_from(points, points[ia]);
    let a = points[ia];
    let b = points[ib];
    let diag = (b - a).norm();
    if diag < 1.0 {
        return None;
    }

    let (ic, dev_c) = arc_max_deviation(points, ia, ib, a, b)?;
    let (id, dev_d) = arc_max_deviation(points, ib, ia, a, b)?;
    if dev_c < DIAG_DEV_MIN_FRAC * diag || dev_d < DIAG_DEV_MIN_FRAC * diag {
        return None;
    }
    // chain order is clockwise, so this corner sequence is too
    let idx = [ia, ic, ib, id];

    // every side must stay close to the straight segment between its
    // corners, which is what separates quads from blobs and ellipses
    for s in 0..4 {
        let p0 = points[idx[s]];
        let p1 = points[idx[(s + 1) % 4]];
        let side = p1 - p0;
        let len = side.norm();
        if len < 1e-9 {
            return None;
        }
        let limit = SIDE_SLACK + params.side_tolerance * len;
        let mut i = (idx[s] + 1) % n;
        while i != idx[(s + 1) % 4] {
            if side.perp(&(points[i] - p0)).abs() / len > limit {
                return None;
            }
            i = (i + 1) % n;
        }
    }

    // subpixel refinement: undistort each side arc, fit a line, intersect
    // adjacent lines; arcs too short to trim fall back to the raw vertex
    let mut lines: [Option<Line>; 4] = [None; 4];
    for s in 0..4 {
        let mut arc: Vec<Point2<Real>> = Vec::new();
        let mut i = idx[s];
        loop {
            arc.push(points[i]);
            if i == idx[(s + 1) % 4] {
                break;
            }
            i = (i + 1) % n;
        }
        let trim = arc.len() / 8 + 1;
        if arc.len() > 2 * trim + 1 {
            let ideal: Vec<Point2<Real>> = arc[trim..arc.len() - trim]
                .iter()
                .map(|p| corrector.to_ideal(*p))
                .collect();
            lines[s] = fit_line(&ideal);
        }
    }
    let mut corners = [Point2::origin(); 4];
    for c in 0..4 {
        corners[c] = match (lines[(c + 3) % 4], lines[c]) {
            (Some(prev), Some(cur)) => intersect_lines(&prev, &cur)
                .unwrap_or_else(|| corrector.to_ideal(points[idx[c]])),
            _ => corrector.to_ideal(points[idx[c]]),
        };
    }
    if !corners.iter().all(|p| p.x.is_finite() && p.y.is_finite()) {
        return None;
    }

    let mut area2 = 0.0;
    for i in 0..4 {
        let p = corners[i];
        let q = corners[(i + 1) % 4];
        area2 += p.x * q.y - q.x * p.y;
    }
    let area = area2.abs() / 2.0;
    if area < params.min_area || area > params.max_area {
        return None;
    }

    for c in 0..4 {
        let u = corners[c] - corners[(c + 3) % 4];
        let v = corners[(c + 1) % 4] - corners[c];
        if u.perp(&v) <= 0.0 {
            return None;
        }
        let nu = u.norm();
        let nv = v.norm();
        if nu < 1e-6 || nv < 1e-6 {
            return None;
        }
        if (u.dot(&v) / (nu * nv)).abs() > params.max_corner_cos {
            return None;
        }
    }

    let d0 = Line {
        point: corners[0],
        dir: corners[2] - corners[0],
    };
    let d1 = Line {
        point: corners[1],
        dir: corners[3] - corners[1],
    };
    let center = intersect_lines(&d0, &d1)?;

    let start = corrector.to_ideal(points[0]);
    let dir_hint = (0..4)
        .min_by(|&i, &j| {
            let di = (corners[i] - start).norm_squared();
            let dj = (corners[j] - start).norm_squared();
            di.partial_cmp(&dj).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0);

    Some(MarkerCandidate {
        corners,
        center,
        area,
        dir_hint,
    })
}

#[derive(Clone, Copy)]
struct Line {
    point: Point2<Real>,
    dir: Vector2<Real>,
}

/// Total-least-squares line through the points; the direction is the
/// major axis of the scatter.
fn fit_line(points: &[Point2<Real>]) -> Option<Line> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as Real;
    let mut mx = 0.0;
    let mut my = 0.0;
    for p in points {
        mx += p.x;
        my += p.y;
    }
    mx /= n;
    my /= n;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for p in points {
        let dx = p.x - mx;
        let dy = p.y - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    if sxx + syy < 1e-9 {
        return None;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(Line {
        point: Point2::new(mx, my),
        dir: Vector2::new(theta.cos(), theta.sin()),
    })
}

fn intersect_lines(a: &Line, b: &Line) -> Option<Point2<Real>> {
    let den = a.dir.perp(&b.dir);
    if den.abs() < 1e-9 * a.dir.norm() * b.dir.norm() {
        return None;
    }
    let t = (b.point - a.point).perp(&b.dir) / den;
    Some(a.point + a.dir * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::find_components;
    use crate::threshold::BinaryImage;

    fn mask_from(w: usize, h: usize, set: impl Fn(usize, usize) -> bool) -> BinaryImage {
        let mut data = vec![0u8; w * h];
        for y in 0..h {
            for x in 0..w {
                if set(x, y) {
                    data[y * w + x] = 1;
                }
            }
        }
        BinaryImage::from_raw(w, h, 1, data)
    }

    fn scan(bin: &BinaryImage, params: QuadParams) -> Vec<MarkerCandidate> {
        let comps = find_components(bin, 1);
        QuadScan::new(bin, PointCorrector::disabled(), params, comps).collect()
    }

    #[test]
    fn filled_square_yields_one_candidate() {
        let bin = mask_from(40, 40, |x, y| (8..29).contains(&x) && (8..29).contains(&y));
        let cands = scan(&bin, QuadParams::default());
        assert_eq!(cands.len(), 1);
        let c = cands[0];
        assert!((c.area - 400.0).abs() < 30.0);
        assert!((c.center.x - 18.0).abs() < 1.0);
        assert!((c.center.y - 18.0).abs() < 1.0);
        // corner 0 is the one farthest from the trace start (top-left),
        // so the hint points two steps around the ring
        assert_eq!(c.dir_hint, 2);
        let hinted = c.corners[c.dir_hint];
        assert!((hinted.x - 8.0).abs() < 1.0 && (hinted.y - 8.0).abs() < 1.0);
    }

    #[test]
    fn rotated_diamond_is_accepted() {
        let (cx, cy, r) = (20i32, 20i32, 11i32);
        let bin = mask_from(40, 40, |x, y| {
            (x as i32 - cx).abs() + (y as i32 - cy).abs() <= r
        });
        let cands = scan(&bin, QuadParams::default());
        assert_eq!(cands.len(), 1);
        let c = cands[0];
        assert!((c.area - 2.0 * (r * r) as Real).abs() < 0.25 * (r * r) as Real);
        assert!((c.center.x - cx as Real).abs() < 1.0);
        assert!((c.center.y - cy as Real).abs() < 1.0);
    }

    #[test]
    fn disk_is_rejected() {
        let (cx, cy, r2) = (30i32, 30i32, 576i32);
        let bin = mask_from(60, 60, |x, y| {
            let dx = x as i32 - cx;
            let dy = y as i32 - cy;
            dx * dx + dy * dy <= r2
        });
        assert!(scan(&bin, QuadParams::default()).is_empty());
    }

    #[test]
    fn sub_minimum_area_is_rejected() {
        let bin = mask_from(20, 20, |x, y| (5..11).contains(&x) && (5..11).contains(&y));
        assert!(scan(&bin, QuadParams::default()).is_empty());
        let params = QuadParams {
            min_area: 10.0,
            ..QuadParams::default()
        };
        assert_eq!(scan(&bin, params).len(), 1);
    }

    #[test]
    fn hull_mode_recovers_broken_border() {
        // square ring with the top edge interrupted
        let ring = |x: usize, y: usize| {
            let outer = (6..31).contains(&x) && (6..31).contains(&y);
            let inner = (9..28).contains(&x) && (9..28).contains(&y);
            let gap = (16..21).contains(&x) && y < 9;
            outer && !inner && !gap
        };
        let bin = mask_from(40, 40, ring);
        assert!(scan(&bin, QuadParams::default()).is_empty());
        let params = QuadParams {
            hull: HullMode::Merge,
            ..QuadParams::default()
        };
        let cands = scan(&bin, params);
        assert_eq!(cands.len(), 1);
        assert!((cands[0].area - 576.0).abs() < 50.0);
    }
}
