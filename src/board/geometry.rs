//! Physical-to-logical coordinate mapping.
//!
//! The sensor matrix can be mounted in any of four orientations, and the
//! wiring may mirror it. Rather than rotating whole matrices after the
//! fact, each physical (i, j) pair is mapped to its logical coordinate as
//! it is sampled.

use crate::board::SIZE;

/// Board orientation, fixed for the life of the process.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    rotation: u8,
    flip: bool,
}

impl Geometry {
    /// `rotation` is the number of quarter turns clockwise, 0-3. Values are
    /// validated at configuration time; out-of-range input here wraps.
    pub fn new(rotation: u8, flip: bool) -> Self {
        Self {
            rotation: rotation % 4,
            flip,
        }
    }

    /// Maps physical mux indices to the logical board coordinate.
    ///
    /// Applies the quarter turns first, then mirrors the first coordinate
    /// when `flip` is set.
    pub fn transform(&self, i: usize, j: usize) -> (usize, usize) {
        let (mut x, mut y) = (i, j);
        for _ in 0..self.rotation {
            (x, y) = (y, SIZE - 1 - x);
        }
        if self.flip {
            x = SIZE - 1 - x;
        }
        (x, y)
    }

    /// True when every physical cell lands on a distinct logical cell.
    pub fn is_bijective(&self) -> bool {
        let mut seen = [[false; SIZE]; SIZE];
        for i in 0..SIZE {
            for j in 0..SIZE {
                let (x, y) = self.transform(i, j);
                if x >= SIZE || y >= SIZE || seen[x][y] {
                    return false;
                }
                seen[x][y] = true;
            }
        }
        true
    }
}
