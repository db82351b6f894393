//! Connected-component labeling and boundary extraction on the binary
//! mask.
//!
//! Components use 8-connectivity so thin diagonal border runs stay in one
//! piece. Boundaries come out of a Moore-neighbour trace as a closed
//! clockwise chain of mask coordinates.

use std::collections::HashMap;

use crate::threshold::BinaryImage;

/// One labeled foreground region.
#[derive(Clone, Copy, Debug)]
pub struct Component {
    /// Foreground pixel count, in mask resolution.
    pub area: u32,
    /// `[min_x, min_y, max_x, max_y]` in mask coordinates.
    pub bbox: [usize; 4],
    /// Topmost, then leftmost pixel; the boundary trace starts here.
    pub seed: (usize, usize),
}

struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    fn new() -> Self {
        // slot 0 stays unused so label 0 can mean background
        Self { parent: vec![0] }
    }

    fn make(&mut self) -> u32 {
        let id = self.parent.len() as u32;
        self.parent.push(id);
        id
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            let grand = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grand;
            x = grand;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[hi as usize] = lo;
    }
}

/// Two-pass 8-connected labeling. Returns regions with at least
/// `min_area` mask pixels whose bounding box lies strictly inside the
/// mask; regions touching the border would trace a clipped outline.
pub fn find_components(bin: &BinaryImage, min_area: u32) -> Vec<Component> {
    let (w, h) = (bin.width, bin.height);
    let mut labels = vec![0u32; w * h];
    let mut uf = UnionFind::new();

    for y in 0..h {
        for x in 0..w {
            if !bin.is_set(x, y) {
                continue;
            }
            let mut label = 0u32;
            let mut consider = |l: u32, uf: &mut UnionFind| {
                if l == 0 {
                    return;
                }
                if label == 0 {
                    label = l;
                } else if label != l {
                    uf.union(label, l);
                    label = label.min(l);
                }
            };
            if x > 0 {
                consider(labels[y * w + x - 1], &mut uf);
            }
            if y > 0 {
                if x > 0 {
                    consider(labels[(y - 1) * w + x - 1], &mut uf);
                }
                consider(labels[(y - 1) * w + x], &mut uf);
                if x + 1 < w {
                    consider(labels[(y - 1) * w + x + 1], &mut uf);
                }
            }
            if label == 0 {
                label = uf.make();
            }
            labels[y * w + x] = label;
        }
    }

    let mut index: HashMap<u32, usize> = HashMap::new();
    let mut out: Vec<Component> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let l = labels[y * w + x];
            if l == 0 {
                continue;
            }
            let root = uf.find(l);
            match index.get(&root) {
                Some(&i) => {
                    let c = &mut out[i];
                    c.area += 1;
                    c.bbox[0] = c.bbox[0].min(x);
                    c.bbox[1] = c.bbox[1].min(y);
                    c.bbox[2] = c.bbox[2].max(x);
                    c.bbox[3] = c.bbox[3].max(y);
                }
                None => {
                    index.insert(root, out.len());
                    out.push(Component {
                        area: 1,
                        bbox: [x, y, x, y],
                        seed: (x, y),
                    });
                }
            }
        }
    }

    out.retain(|c| {
        c.area >= min_area
            && c.bbox[0] > 0
            && c.bbox[1] > 0
            && c.bbox[2] < w - 1
            && c.bbox[3] < h - 1
    });
    out
}

// Clockwise Moore neighbourhood in screen coordinates (y down).
const DIRS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

const fn dir_index(dx: i32, dy: i32) -> usize {
    match (dx, dy) {
        (1, 0) => 0,
        (1, 1) => 1,
        (0, 1) => 2,
        (-1, 1) => 3,
        (-1, 0) => 4,
        (-1, -1) => 5,
        (0, -1) => 6,
        _ => 7,
    }
}

/// Moore-neighbour trace of the outer boundary, starting at the
/// component seed. Returns the closed chain in clockwise screen order;
/// the seed is the first element and is not repeated at the end.
///
/// The seed must be the topmost-leftmost pixel of its region so the
/// initial backtrack direction (west) points at background.
pub fn trace_boundary(bin: &BinaryImage, start: (usize, usize), area: u32) -> Vec<(usize, usize)> {
    let start_i = (start.0 as i32, start.1 as i32);
    let mut chain = vec![start];
    let mut cur = start_i;
    let mut back_dir = 4usize;
    let max_steps = area as usize * 4 + 16;

    for _ in 0..max_steps {
        let mut advanced = false;
        for i in 0..8 {
            let j = (back_dir + 1 + i) & 7;
            let next = (cur.0 + DIRS[j].0, cur.1 + DIRS[j].1);
            if !bin.get(next.0, next.1) {
                continue;
            }
            // background cell probed just before the hit
            let prev = (j + 7) & 7;
            let white = (cur.0 + DIRS[prev].0, cur.1 + DIRS[prev].1);
            back_dir = dir_index(white.0 - next.0, white.1 - next.1);
            cur = next;
            advanced = true;
            break;
        }
        if !advanced {
            // isolated pixel
            return chain;
        }
        if cur == start_i && back_dir == 4 {
            return chain;
        }
        chain.push((cur.0 as usize, cur.1 as usize));
    }
    chain
}
