//! Gray-code multiplexer address sequencing.
//!
//! Selecting mux inputs in plain binary order flips up to four control lines
//! per step, and every flip is an electrical transition that has to settle
//! before the analog read. Visiting the inputs in Gray-code order flips
//! exactly one line per step, which is the minimum possible for a full
//! traversal.

use crate::hal::{HwError, SelectPin};

/// Number of addressable inputs on a 4-line analog mux.
pub const MUX_INPUTS: usize = 16;

/// One step of the cyclic 4-bit Gray traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrayStep {
    /// Mux input selected once this step's line write lands.
    pub code: u8,
    /// Control line (0-3) that flips relative to the previous step.
    pub line: u8,
    /// Level the flipped line ends up at.
    pub high: bool,
}

const fn gray(k: usize) -> u8 {
    (k ^ (k >> 1)) as u8
}

const fn build_sequence() -> [GrayStep; MUX_INPUTS] {
    let mut seq = [GrayStep {
        code: 0,
        line: 0,
        high: false,
    }; MUX_INPUTS];
    let mut k = 0;
    while k < MUX_INPUTS {
        let code = gray(k);
        // The traversal is cyclic: entry 0 records the wrap from the final
        // code (8) back to 0, so back-to-back passes also cost one flip per
        // step.
        let prev = gray((k + MUX_INPUTS - 1) % MUX_INPUTS);
        let diff = code ^ prev;
        seq[k] = GrayStep {
            code,
            line: diff.trailing_zeros() as u8,
            high: code & diff != 0,
        };
        k += 1;
    }
    seq
}

/// Traversal order for one scan axis: 0,1,3,2,6,7,5,4,12,13,15,14,10,11,9,8.
///
/// Consecutive entries differ in exactly one control line, including the
/// wrap from the last entry back to the first.
pub const GRAY_SEQUENCE: [GrayStep; MUX_INPUTS] = build_sequence();

/// Four control lines driving one analog multiplexer.
///
/// Tracks the currently selected code and only writes the lines that
/// differ, so a Gray-ordered traversal costs exactly one write per step.
/// The row and column muxes are separate instances sharing no state.
pub struct Mux<P: SelectPin> {
    lines: [P; 4],
    code: u8,
}

impl<P: SelectPin> Mux<P> {
    /// Takes ownership of the select lines and drives them to a known state
    /// (input 0 selected).
    pub fn new(lines: [P; 4]) -> Result<Self, HwError> {
        let mut mux = Self { lines, code: 0 };
        for bit in 0..4 {
            mux.lines[bit].set(false)?;
        }
        Ok(mux)
    }

    /// Selects `code`, writing only the control lines that change.
    pub fn select(&mut self, code: u8) -> Result<(), HwError> {
        debug_assert!((code as usize) < MUX_INPUTS);
        let diff = self.code ^ code;
        for bit in 0..4 {
            if diff & (1 << bit) != 0 {
                self.lines[bit].set(code & (1 << bit) != 0)?;
            }
        }
        self.code = code;
        Ok(())
    }

    /// The currently selected mux input.
    pub fn code(&self) -> u8 {
        self.code
    }
}
