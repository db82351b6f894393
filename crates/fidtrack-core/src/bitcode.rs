//! Self-identifying binary markers.
//!
//! A binary marker carries a 6x6 bit grid holding four copies of a 9-bit
//! id, each copy XOR-scrambled with its own mask so that a rotated or
//! partly corrupted read cannot masquerade as a clean one. Decoding
//! enumerates the four orientations and takes a majority vote over the
//! copies; ids need no registered pattern at all.

use crate::pattern::PatternMatch;
use crate::Real;

/// Side length of the embedded bit grid.
pub const BITCODE_GRID: usize = 6;
/// Cell count of the embedded bit grid.
pub const BITCODE_CELLS: usize = BITCODE_GRID * BITCODE_GRID;
/// Number of distinct binary-marker ids.
pub const BITCODE_IDS: usize = 512;

const ID_BITS: usize = 9;
const COPIES: usize = 4;
const COPY_MASKS: [u32; COPIES] = [0x000, 0x17a, 0x0ed, 0x1b3];
const MIN_VOTES: u32 = 3;

/// The 36-bit code of a marker id, row major, bit set meaning a dark
/// cell. `None` for ids outside `0..512`.
pub fn encode(id: u32) -> Option<u64> {
    if id >= BITCODE_IDS as u32 {
        return None;
    }
    let mut code = 0u64;
    for (j, &mask) in COPY_MASKS.iter().enumerate() {
        code |= (((id ^ mask) & 0x1ff) as u64) << (ID_BITS * j);
    }
    Some(code)
}

fn rotate_cw(code: u64) -> u64 {
    let n = BITCODE_GRID;
    let mut out = 0u64;
    for r in 0..n {
        for c in 0..n {
            if code >> ((n - 1 - c) * n + r) & 1 == 1 {
                out |= 1u64 << (r * n + c);
            }
        }
    }
    out
}

fn rotate_ccw(code: u64) -> u64 {
    let n = BITCODE_GRID;
    let mut out = 0u64;
    for r in 0..n {
        for c in 0..n {
            if code >> (c * n + (n - 1 - r)) & 1 == 1 {
                out |= 1u64 << (r * n + c);
            }
        }
    }
    out
}

/// Cell values (0 dark, 255 light) of marker `id` turned `rotation`
/// quarter turns clockwise. The inverse of [`decode_cells`].
pub fn cells_for(id: u32, rotation: u8) -> Option<[u8; BITCODE_CELLS]> {
    let mut code = encode(id)?;
    for _ in 0..rotation % 4 {
        code = rotate_cw(code);
    }
    let mut cells = [255u8; BITCODE_CELLS];
    for (i, cell) in cells.iter_mut().enumerate() {
        if code >> i & 1 == 1 {
            *cell = 0;
        }
    }
    Some(cells)
}

fn decode_code(code: u64) -> Option<(u32, u32)> {
    let mut ids = [0u32; COPIES];
    for (j, id) in ids.iter_mut().enumerate() {
        *id = (((code >> (ID_BITS * j)) & 0x1ff) as u32) ^ COPY_MASKS[j];
    }
    let mut best_id = ids[0];
    let mut best_votes = 0u32;
    for &cand in &ids {
        let votes = ids.iter().filter(|&&v| v == cand).count() as u32;
        if votes > best_votes {
            best_votes = votes;
            best_id = cand;
        }
    }
    (best_votes >= MIN_VOTES).then_some((best_id, best_votes))
}

/// Decode a sampled 6x6 cell grid with a fixed per-bit threshold; a cell
/// below `threshold` reads as a set bit. Returns the id, the clockwise
/// rotation of the observed grid relative to canonical, and the vote
/// fraction as confidence. Ambiguous reads (two orientations decoding
/// equally well) return `None`.
pub fn decode_cells(cells: &[u8; BITCODE_CELLS], threshold: u8) -> Option<PatternMatch> {
    let mut code = 0u64;
    for (i, &c) in cells.iter().enumerate() {
        if c < threshold {
            code |= 1u64 << i;
        }
    }
    let mut best: Option<(PatternMatch, u32)> = None;
    let mut ambiguous = false;
    for rot in 0..4u8 {
        if let Some((id, votes)) = decode_code(code) {
            match &best {
                Some((_, best_votes)) if votes > *best_votes => {
                    best = Some((
                        PatternMatch {
                            id,
                            rotation: rot,
                            confidence: votes as Real / COPIES as Real,
                        },
                        votes,
                    ));
                    ambiguous = false;
                }
                Some((_, best_votes)) if votes == *best_votes => ambiguous = true,
                Some(_) => {}
                None => {
                    best = Some((
                        PatternMatch {
                            id,
                            rotation: rot,
                            confidence: votes as Real / COPIES as Real,
                        },
                        votes,
                    ));
                }
            }
        }
        code = rotate_ccw(code);
    }
    if ambiguous {
        return None;
    }
    best.map(|(m, _)| m)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_turns_compose_to_identity() {
        let code = encode(261).unwrap();
        assert_eq!(rotate_ccw(rotate_cw(code)), code);
        let full = rotate_cw(rotate_cw(rotate_cw(rotate_cw(code))));
        assert_eq!(full, code);
    }

    #[test]
    fn round_trip_all_rotations() {
        for &id in &[0u32, 1, 37, 300, 511] {
            for rotation in 0..4u8 {
                let cells = cells_for(id, rotation).unwrap();
                let m = decode_cells(&cells, 128).unwrap();
                assert_eq!(m.id, id, "id {id} rot {rotation}");
                assert_eq!(m.rotation, rotation, "id {id} rot {rotation}");
                assert_eq!(m.confidence, 1.0);
            }
        }
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        assert!(encode(512).is_none());
        assert!(cells_for(700, 0).is_none());
    }

    #[test]
    fn single_corrupt_copy_still_decodes() {
        let mut cells = cells_for(37, 1).unwrap();
        // flip one cell; at most one id copy is damaged
        cells[4] = 255 - cells[4];
        let m = decode_cells(&cells, 128).unwrap();
        assert_eq!(m.id, 37);
        assert_eq!(m.rotation, 1);
        assert_eq!(m.confidence, 0.75);
    }

    #[test]
    fn heavy_corruption_fails() {
        let cells = [128u8; BITCODE_CELLS];
        assert!(decode_cells(&cells, 128).is_none());
        let mut cells = cells_for(37, 0).unwrap();
        // damage two different copies
        cells[0] = 255 - cells[0];
        cells[30] = 255 - cells[30];
        assert!(decode_cells(&cells, 128).is_none());
    }
}
