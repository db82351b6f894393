//! Template pattern storage and rotation-enumerated matching.
//!
//! Registered patterns are reduced to a 16x16 grid and kept zero-mean,
//! unit-norm in all four 90 degree rotations, so matching one probe is
//! four dot products per pattern. A match score is plain normalized
//! cross-correlation; rotation invariance comes from the explicit
//! enumeration, never from the metric.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Real;

/// Side length of the reduced pattern grid.
pub const PATTERN_GRID: usize = 16;
/// Cell count of the reduced pattern grid.
pub const PATTERN_CELLS: usize = PATTERN_GRID * PATTERN_GRID;

const MIN_CONTRAST: Real = 1e-6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternStoreError {
    #[error("all {capacity} pattern slots are taken")]
    TableFull { capacity: usize },
    #[error("pattern id {id} is not allocated")]
    UnknownId { id: u32 },
    #[error("pattern side {side} must be a positive multiple of {PATTERN_GRID}")]
    BadSize { side: usize },
    #[error("pattern data holds {got} bytes, expected {expected}")]
    BadData { expected: usize, got: usize },
    #[error("pattern has no contrast")]
    FlatPattern,
}

/// A 16x16 grayscale grid, the common currency between the sampler and
/// the matcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatternGrid {
    cells: [u8; PATTERN_CELLS],
}

impl PatternGrid {
    pub fn from_cells(cells: [u8; PATTERN_CELLS]) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[u8; PATTERN_CELLS] {
        &self.cells
    }

    /// The grid rotated a quarter turn clockwise.
    pub fn rotated_cw(&self) -> Self {
        let n = PATTERN_GRID;
        let mut out = [0u8; PATTERN_CELLS];
        for r in 0..n {
            for c in 0..n {
                out[r * n + c] = self.cells[(n - 1 - c) * n + r];
            }
        }
        Self { cells: out }
    }

    /// Zero-mean, unit-norm copy; `None` when the grid is flat.
    pub fn normalized(&self) -> Option<[Real; PATTERN_CELLS]> {
        let mean =
            self.cells.iter().map(|&v| v as Real).sum::<Real>() / PATTERN_CELLS as Real;
        let mut out = [0.0 as Real; PATTERN_CELLS];
        let mut norm2 = 0.0;
        for (o, &v) in out.iter_mut().zip(self.cells.iter()) {
            *o = v as Real - mean;
            norm2 += *o * *o;
        }
        let norm = norm2.sqrt();
        if norm < MIN_CONTRAST {
            return None;
        }
        for o in &mut out {
            *o /= norm;
        }
        Some(out)
    }
}

/// Best (pattern, rotation) pair for one sampled patch.
///
/// `rotation` counts quarter turns clockwise from the registered pattern
/// to the observed patch; equivalently it is the index, in the sampled
/// corner order, of the marker's canonical top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub id: u32,
    pub rotation: u8,
    pub confidence: Real,
}

#[derive(Clone, Debug)]
struct StoredPattern {
    rotations: [[Real; PATTERN_CELLS]; 4],
}

/// Fixed-capacity pattern table. Slot index doubles as the pattern id;
/// freed slots are reused by later registrations.
#[derive(Clone, Debug)]
pub struct PatternStore {
    slots: Vec<Option<StoredPattern>>,
}

impl PatternStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a square grayscale pattern of `side` x `side` pixels.
    /// `side` must be a positive multiple of [`PATTERN_GRID`]; the data
    /// is reduced by block averaging. Returns the allocated id.
    pub fn add(&mut self, data: &[u8], side: usize) -> Result<u32, PatternStoreError> {
        if side == 0 || side % PATTERN_GRID != 0 {
            return Err(PatternStoreError::BadSize { side });
        }
        let expected = side * side;
        if data.len() != expected {
            return Err(PatternStoreError::BadData {
                expected,
                got: data.len(),
            });
        }
        let block = side / PATTERN_GRID;
        let mut cells = [0u8; PATTERN_CELLS];
        for r in 0..PATTERN_GRID {
            for c in 0..PATTERN_GRID {
                let mut acc = 0u32;
                for y in r * block..(r + 1) * block {
                    for x in c * block..(c + 1) * block {
                        acc += data[y * side + x] as u32;
                    }
                }
                cells[r * PATTERN_GRID + c] = (acc / (block * block) as u32) as u8;
            }
        }

        let mut rotations = [[0.0 as Real; PATTERN_CELLS]; 4];
        let mut grid = PatternGrid::from_cells(cells);
        for slot in &mut rotations {
            *slot = grid.normalized().ok_or(PatternStoreError::FlatPattern)?;
            grid = grid.rotated_cw();
        }

        let free = self.slots.iter().position(|s| s.is_none());
        match free {
            Some(i) => {
                self.slots[i] = Some(StoredPattern { rotations });
                Ok(i as u32)
            }
            None => Err(PatternStoreError::TableFull {
                capacity: self.slots.len(),
            }),
        }
    }

    pub fn free(&mut self, id: u32) -> Result<(), PatternStoreError> {
        match self.slots.get_mut(id as usize) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(PatternStoreError::UnknownId { id }),
        }
    }

    /// Correlate the probe against every registered pattern in all four
    /// rotations. Returns the single best pair, or `None` when the store
    /// is empty or the probe is flat. Confidence thresholds are the
    /// caller's business.
    pub fn match_grid(&self, grid: &PatternGrid) -> Option<PatternMatch> {
        let probe = grid.normalized()?;
        let mut best: Option<PatternMatch> = None;
        for (id, slot) in self.slots.iter().enumerate() {
            let Some(stored) = slot else { continue };
            for (r, reference) in stored.rotations.iter().enumerate() {
                let score: Real = probe
                    .iter()
                    .zip(reference.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                if best.as_ref().map_or(true, |b| score > b.confidence) {
                    best = Some(PatternMatch {
                        id: id as u32,
                        rotation: r as u8,
                        confidence: score,
                    });
                }
            }
        }
        best.map(|mut m| {
            m.confidence = m.confidence.clamp(0.0, 1.0);
            m
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_cells() -> [u8; PATTERN_CELLS] {
        let mut cells = [0u8; PATTERN_CELLS];
        for (i, c) in cells.iter_mut().enumerate() {
            *c = i as u8;
        }
        cells
    }

    #[test]
    fn rotation_moves_cells_clockwise() {
        let mut cells = [0u8; PATTERN_CELLS];
        cells[1] = 200; // row 0, col 1
        let rot = PatternGrid::from_cells(cells).rotated_cw();
        // lands on row 1, last column
        assert_eq!(rot.cells()[PATTERN_GRID + PATTERN_GRID - 1], 200);
        // four turns come back around
        let full = rot.rotated_cw().rotated_cw().rotated_cw();
        assert_eq!(full.cells(), &cells);
    }

    #[test]
    fn match_recovers_id_and_rotation() {
        let mut store = PatternStore::with_capacity(8);
        let id = store.add(&ramp_cells(), PATTERN_GRID).unwrap();
        let mut probe = PatternGrid::from_cells(ramp_cells());
        for rotation in 0..4u8 {
            let m = store.match_grid(&probe).unwrap();
            assert_eq!(m.id, id);
            assert_eq!(m.rotation, rotation);
            assert!(m.confidence > 0.999);
            probe = probe.rotated_cw();
        }
    }

    #[test]
    fn block_reduction_matches_direct_registration() {
        let side = 2 * PATTERN_GRID;
        let mut big = vec![0u8; side * side];
        for y in 0..side {
            for x in 0..side {
                big[y * side + x] = ramp_cells()[(y / 2) * PATTERN_GRID + x / 2];
            }
        }
        let mut store = PatternStore::with_capacity(2);
        store.add(&big, side).unwrap();
        let m = store.match_grid(&PatternGrid::from_cells(ramp_cells())).unwrap();
        assert!(m.confidence > 0.999);
        assert_eq!(m.rotation, 0);
    }

    #[test]
    fn flat_pattern_is_rejected() {
        let mut store = PatternStore::with_capacity(2);
        let err = store.add(&[128u8; PATTERN_CELLS], PATTERN_GRID).unwrap_err();
        assert_eq!(err, PatternStoreError::FlatPattern);
        assert!(store.is_empty());
    }

    #[test]
    fn bad_sizes_are_rejected() {
        let mut store = PatternStore::with_capacity(2);
        assert_eq!(
            store.add(&[0u8; 100], 10).unwrap_err(),
            PatternStoreError::BadSize { side: 10 }
        );
        assert_eq!(
            store.add(&[0u8; 100], PATTERN_GRID).unwrap_err(),
            PatternStoreError::BadData {
                expected: PATTERN_CELLS,
                got: 100
            }
        );
    }

    #[test]
    fn exhaustion_leaves_table_unchanged() {
        let mut store = PatternStore::with_capacity(2);
        let a = store.add(&ramp_cells(), PATTERN_GRID).unwrap();
        let mut second = [0u8; PATTERN_CELLS];
        for (i, c) in second.iter_mut().enumerate() {
            *c = (i as u8).wrapping_mul(37);
        }
        let b = store.add(&second, PATTERN_GRID).unwrap();
        assert_eq!((a, b), (0, 1));
        let err = store.add(&ramp_cells(), PATTERN_GRID).unwrap_err();
        assert_eq!(err, PatternStoreError::TableFull { capacity: 2 });
        assert_eq!(store.len(), 2);
        let m = store.match_grid(&PatternGrid::from_cells(ramp_cells())).unwrap();
        assert_eq!(m.id, a);
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut store = PatternStore::with_capacity(2);
        let a = store.add(&ramp_cells(), PATTERN_GRID).unwrap();
        store.free(a).unwrap();
        assert_eq!(store.free(a).unwrap_err(), PatternStoreError::UnknownId { id: a });
        assert_eq!(store.free(99).unwrap_err(), PatternStoreError::UnknownId { id: 99 });
        let again = store.add(&ramp_cells(), PATTERN_GRID).unwrap();
        assert_eq!(again, a);
    }
}
