//! Simulated board hardware.
//!
//! The simulated ADC decodes the selected cell from the live control-line
//! levels, so a wrong addressing sequence reads the wrong cell rather than
//! silently passing. Tests and the demo binary script stone placements by
//! writing cell values through the shared handle while a scan runs.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::board::SIZE;
use crate::hal::{AnalogPin, HwError, SelectPin};

/// Backing state shared by all simulated pins. Lines 0-3 are the row
/// select, 4-7 the column select.
pub struct SimState {
    levels: [bool; 8],
    /// Raw sensor values by physical (i, j).
    pub cells: [[u16; SIZE]; SIZE],
    /// When nonzero, that many upcoming reads fail before service resumes.
    pub fail_reads: usize,
    /// Total successful reads served.
    pub reads: usize,
}

/// Shared handle onto the simulated hardware.
pub type SimHandle = Arc<Mutex<SimState>>;

impl SimState {
    fn selected(&self) -> (usize, usize) {
        let decode = |levels: &[bool]| {
            levels
                .iter()
                .enumerate()
                .fold(0usize, |code, (bit, &high)| code | (usize::from(high) << bit))
        };
        (decode(&self.levels[..4]), decode(&self.levels[4..]))
    }

    /// Scripts the raw value one physical cell will read.
    pub fn set_cell(&mut self, i: usize, j: usize, value: u16) {
        self.cells[i][j] = value;
    }
}

/// One simulated mux control line.
pub struct SimPin {
    sim: SimHandle,
    index: usize,
}

impl SelectPin for SimPin {
    fn set(&mut self, high: bool) -> Result<(), HwError> {
        self.sim.lock().levels[self.index] = high;
        Ok(())
    }
}

/// The simulated analog input.
pub struct SimAdc {
    sim: SimHandle,
}

impl AnalogPin for SimAdc {
    fn read_u16(&mut self) -> Result<u16, HwError> {
        let mut sim = self.sim.lock();
        if sim.fail_reads > 0 {
            sim.fail_reads -= 1;
            return Err(HwError::AdcRead);
        }
        let (i, j) = sim.selected();
        if i >= SIZE || j >= SIZE {
            // No sensor behind this mux address; a read here is an
            // addressing bug in the caller.
            return Err(HwError::AdcRead);
        }
        sim.reads += 1;
        Ok(sim.cells[i][j])
    }
}

/// Builds a simulated board with every cell at `seed`, along with the
/// analog input and the two sets of select lines the scanner needs.
pub fn sim_board(seed: u16) -> (SimHandle, SimAdc, [SimPin; 4], [SimPin; 4]) {
    let sim: SimHandle = Arc::new(Mutex::new(SimState {
        levels: [false; 8],
        cells: [[seed; SIZE]; SIZE],
        fail_reads: 0,
        reads: 0,
    }));
    let pin = |index| SimPin {
        sim: Arc::clone(&sim),
        index,
    };
    let rows = [pin(0), pin(1), pin(2), pin(3)];
    let cols = [pin(4), pin(5), pin(6), pin(7)];
    let adc = SimAdc {
        sim: Arc::clone(&sim),
    };
    (sim, adc, rows, cols)
}
