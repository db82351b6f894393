//! Synthetic marker frames: printable art and test imagery.

use nalgebra::Point2;

use fidtrack_core::bitcode::{cells_for, BITCODE_GRID};
use fidtrack_core::{Homography, ImageError, ImageView, PatternGrid, Real, PATTERN_GRID};

/// Owned 8-bit luma canvas.
#[derive(Clone, Debug)]
pub struct Frame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Canvas of constant luma.
    pub fn filled(width: usize, height: usize, luma: u8) -> Self {
        Self {
            width,
            height,
            data: vec![luma; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn view(&self) -> Result<ImageView<'_>, ImageError> {
        ImageView::from_luma(&self.data, self.width, self.height)
    }

    /// Write one pixel; out-of-canvas writes are dropped.
    pub fn put(&mut self, x: usize, y: usize, luma: u8) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = luma;
        }
    }
}

/// Cell grid of one printable marker: the dark border ring around the
/// pattern interior, one luma value per cell.
#[derive(Clone, Debug)]
pub struct MarkerArt {
    side: usize,
    cells: Vec<u8>,
}

impl MarkerArt {
    /// Border ring around a 16x16 template pattern. `border_fraction`
    /// is the ring thickness as a fraction of the marker side; the ring
    /// is rounded to whole cells, one cell minimum.
    pub fn from_pattern(pattern: &PatternGrid, border_fraction: Real) -> Option<Self> {
        Self::build(pattern.cells(), PATTERN_GRID, border_fraction)
    }

    /// Border ring around the 6x6 code of a binary id.
    pub fn from_binary_id(id: u32, border_fraction: Real) -> Option<Self> {
        let cells = cells_for(id, 0)?;
        Self::build(&cells, BITCODE_GRID, border_fraction)
    }

    fn build(inner: &[u8], grid: usize, border_fraction: Real) -> Option<Self> {
        let span = 1.0 - 2.0 * border_fraction;
        if !(border_fraction > 0.0) || span <= 0.0 {
            return None;
        }
        let border = ((grid as Real * border_fraction / span).round() as usize).max(1);
        let side = grid + 2 * border;
        let mut cells = vec![0u8; side * side];
        for j in 0..grid {
            for i in 0..grid {
                cells[(j + border) * side + (i + border)] = inner[j * grid + i];
            }
        }
        Some(Self { side, cells })
    }

    /// Cells per side, border included.
    pub fn side(&self) -> usize {
        self.side
    }

    pub fn cell(&self, i: usize, j: usize) -> u8 {
        self.cells[j * self.side + i]
    }
}

/// Paint the marker into the quad spanned by `corners` (top-left first,
/// clockwise on screen), nearest-cell through the inverse homography.
/// Returns `false` when the corners admit no homography.
pub fn draw_marker(frame: &mut Frame, art: &MarkerArt, corners: &[Point2<Real>; 4]) -> bool {
    let Some(h) = Homography::unit_square_to(corners) else {
        return false;
    };
    let Some(inv) = h.inverse() else {
        return false;
    };
    let Some((x0, y0, x1, y1)) = bbox(corners, frame.width, frame.height) else {
        return false;
    };
    let n = art.side() as Real;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = inv.apply(Point2::new(x as Real, y as Real));
            if !(0.0..1.0).contains(&p.x) || !(0.0..1.0).contains(&p.y) {
                continue;
            }
            let i = ((p.x * n) as usize).min(art.side - 1);
            let j = ((p.y * n) as usize).min(art.side - 1);
            frame.put(x, y, art.cell(i, j));
        }
    }
    true
}

/// Paint an upright marker with its top-left corner at `(x, y)` and
/// `size` pixels per side.
pub fn draw_marker_upright(frame: &mut Frame, art: &MarkerArt, x: usize, y: usize, size: usize) {
    if size == 0 {
        return;
    }
    let n = art.side();
    for dy in 0..size {
        let j = (dy * n) / size;
        for dx in 0..size {
            let i = (dx * n) / size;
            frame.put(x + dx, y + dy, art.cell(i, j));
        }
    }
}

fn bbox(
    corners: &[Point2<Real>; 4],
    width: usize,
    height: usize,
) -> Option<(usize, usize, usize, usize)> {
    if width == 0 || height == 0 {
        return None;
    }
    let mut lo = corners[0];
    let mut hi = corners[0];
    for c in &corners[1..] {
        lo.x = lo.x.min(c.x);
        lo.y = lo.y.min(c.y);
        hi.x = hi.x.max(c.x);
        hi.y = hi.y.max(c.y);
    }
    if !(lo.x.is_finite() && lo.y.is_finite() && hi.x.is_finite() && hi.y.is_finite()) {
        return None;
    }
    let x0 = lo.x.floor().max(0.0) as usize;
    let y0 = lo.y.floor().max(0.0) as usize;
    let x1 = (hi.x.ceil().max(0.0) as usize).min(width - 1);
    let y1 = (hi.y.ceil().max(0.0) as usize).min(height - 1);
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some((x0, y0, x1, y1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_art_has_dark_ring() {
        let art = MarkerArt::from_binary_id(37, 0.25).unwrap();
        // 6 code cells plus a 3-cell ring on each side
        assert_eq!(art.side(), 12);
        for k in 0..art.side() {
            assert_eq!(art.cell(k, 0), 0);
            assert_eq!(art.cell(0, k), 0);
            assert_eq!(art.cell(k, art.side() - 1), 0);
        }
        // id 37 sets code bit 0, so the first interior cell is dark
        assert_eq!(art.cell(3, 3), 0);
    }

    #[test]
    fn pattern_art_quarter_border() {
        let mut cells = [0u8; PATTERN_GRID * PATTERN_GRID];
        for (i, c) in cells.iter_mut().enumerate() {
            *c = (i % 251) as u8;
        }
        let art = MarkerArt::from_pattern(&PatternGrid::from_cells(cells), 0.25).unwrap();
        assert_eq!(art.side(), 32);
        assert_eq!(art.cell(8, 8), cells[0]);
        assert_eq!(art.cell(23, 23), cells[PATTERN_GRID * PATTERN_GRID - 1]);
    }

    #[test]
    fn degenerate_border_is_rejected() {
        assert!(MarkerArt::from_binary_id(37, 0.0).is_none());
        assert!(MarkerArt::from_binary_id(37, 0.5).is_none());
        assert!(MarkerArt::from_binary_id(600, 0.25).is_none());
    }

    #[test]
    fn upright_draw_covers_the_square() {
        let art = MarkerArt::from_binary_id(0, 0.25).unwrap();
        let mut frame = Frame::filled(64, 64, 255);
        draw_marker_upright(&mut frame, &art, 10, 10, 24);
        // border ring is dark, outside stays light
        assert_eq!(frame.data()[12 * 64 + 12], 0);
        assert_eq!(frame.data()[9 * 64 + 9], 255);
        assert_eq!(frame.data()[33 * 64 + 33], 0);
        assert_eq!(frame.data()[35 * 64 + 35], 255);
    }

    #[test]
    fn projective_draw_fills_interior() {
        let art = MarkerArt::from_binary_id(0, 0.25).unwrap();
        let mut frame = Frame::filled(80, 80, 255);
        let corners = [
            Point2::new(20.0, 20.0),
            Point2::new(60.0, 24.0),
            Point2::new(58.0, 62.0),
            Point2::new(18.0, 58.0),
        ];
        assert!(draw_marker(&mut frame, &art, &corners));
        // center of the quad lands inside the marker
        assert_ne!(frame.data()[40 * 80 + 39], 255);
        // far corner of the canvas is untouched
        assert_eq!(frame.data()[5 * 80 + 70], 255);
    }
}
