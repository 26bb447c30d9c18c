//! The sensing core: matrix scanning, calibration, change detection and the
//! scan scheduler.
//!
//! A [`Board`] owns the analog input, both mux sequencers and every matrix.
//! Nothing outside the scanner mutates that state; consumers either receive
//! owned [`StoneChange`] records through registered observers or read the
//! occupancy copy published between scans.

pub mod geometry;
pub mod gray;
pub mod stone;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering::SeqCst};
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::cfg::BoardConfig;
use crate::hal::{AnalogPin, HwError, SelectPin};
use self::geometry::Geometry;
use self::gray::{GRAY_SEQUENCE, Mux};
use self::stone::{Stone, StoneChange, Thresholds};

/// Width and height of the sensor grid.
pub const SIZE: usize = 15;

/// Raw and calibration matrices start out at the idle mid-scale reading of
/// the sensor chain, so an uncalibrated board reads as all empty.
pub const DEFAULT_BASELINE: u16 = 31800;

/// Occupancy of the whole board, indexed by logical (row, col).
pub type OccupancyGrid = [[Stone; SIZE]; SIZE];

/// Change observers receive each record by value, in registration order.
/// Dispatch runs with the scanner locked, so a callback must not call back
/// into it.
pub type ChangeObserver = Box<dyn FnMut(StoneChange) -> Result<()> + Send>;

/// Errors produced by the scanning core.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The cycle's acquisition failed. The cycle is dropped and the
    /// scheduler retries on the next period.
    #[error("analog acquisition failed: {0}")]
    Read(#[from] HwError),
    /// Calibration was requested while a scan held the matrices.
    #[error("calibration is unavailable while a scan is in flight")]
    CalibrationBusy,
    #[error("observer `{0}` is already registered")]
    DuplicateObserver(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Scheduler states.
///
/// `Stopped` is terminal; a stopped scheduler is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Scanning = 1,
    Dispatching = 2,
    Waiting = 3,
    Stopped = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Idle,
            1 => Phase::Scanning,
            2 => Phase::Dispatching,
            3 => Phase::Waiting,
            _ => Phase::Stopped,
        }
    }
}

/// Lock-free view of the scheduler state, readable while a scan holds the
/// board lock.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn new() -> Self {
        Self(AtomicU8::new(Phase::Idle as u8))
    }

    fn set(&self, phase: Phase) {
        self.0.store(phase as u8, SeqCst);
    }

    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(SeqCst))
    }
}

/// Control handle onto the scheduler, cloneable and usable from any thread.
#[derive(Clone)]
pub struct MonitorHandle {
    phase: Arc<PhaseCell>,
    stop: Arc<AtomicBool>,
    period_ms: Arc<AtomicU64>,
}

impl MonitorHandle {
    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Requests a graceful stop, honored at the scheduler's next suspension
    /// point. An in-progress scan or dispatch always runs to completion.
    pub fn stop_monitoring(&self) {
        self.stop.store(true, SeqCst);
    }

    /// Adjusts the inter-scan delay. Takes effect before the next wait.
    pub fn set_scan_period(&self, period: Duration) {
        self.period_ms.store(period.as_millis() as u64, SeqCst);
    }
}

/// Cloneable handle serving full-board snapshots. Reads the copy published
/// between scans, so it never observes a half-updated board and never
/// contends with an in-flight scan.
#[derive(Clone)]
pub struct SnapshotView(Arc<Mutex<OccupancyGrid>>);

impl SnapshotView {
    pub fn get(&self) -> OccupancyGrid {
        *self.0.lock()
    }
}

#[derive(Clone, Copy)]
struct Sample {
    x: usize,
    y: usize,
    raw: u16,
}

pub struct Board<P: SelectPin, A: AnalogPin> {
    /// Analog input the muxes route the selected sensor onto.
    adc: A,
    /// Row (individual) mux sequencer.
    row_mux: Mux<P>,
    /// Column (main) mux sequencer.
    col_mux: Mux<P>,
    geometry: Geometry,
    thresholds: Thresholds,
    /// Settling time paid between a line write and the following read.
    settle: Duration,
    /// Raw readings by logical coordinate.
    raw: [[u16; SIZE]; SIZE],
    /// Per-cell baseline captured by the calibration pass.
    calibration: [[u16; SIZE]; SIZE],
    /// raw minus calibration, kept signed so near-zero drift cannot wrap.
    corrected: [[i32; SIZE]; SIZE],
    /// Occupancy derived from corrected values and thresholds.
    stones: OccupancyGrid,
    /// Registered observers in registration order.
    observers: Vec<(String, ChangeObserver)>,
    /// Reusable acquisition buffer, to save a per-cycle allocation.
    scratch: Vec<Sample>,
    /// Change records of the current cycle, in scan-traversal order.
    pending: Vec<StoneChange>,
    /// Occupancy copy swapped in between scans.
    published: Arc<Mutex<OccupancyGrid>>,
    phase: Arc<PhaseCell>,
    stop_requested: Arc<AtomicBool>,
    /// Inter-scan delay in milliseconds, adjustable while running.
    period_ms: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl<P: SelectPin, A: AnalogPin> Board<P, A> {
    /// Builds the scanner from its hardware and a validated configuration.
    /// Both muxes are driven to a known state; the matrices start at the
    /// default baseline so the board reads as empty until calibrated.
    pub fn new(adc: A, row_lines: [P; 4], col_lines: [P; 4], cfg: &BoardConfig) -> Result<Self> {
        cfg.validate()?;
        let row_mux = Mux::new(row_lines)?;
        let col_mux = Mux::new(col_lines)?;
        Ok(Self {
            adc,
            row_mux,
            col_mux,
            geometry: cfg.geometry(),
            thresholds: cfg.thresholds(),
            settle: cfg.settle(),
            raw: [[DEFAULT_BASELINE; SIZE]; SIZE],
            calibration: [[DEFAULT_BASELINE; SIZE]; SIZE],
            corrected: [[0; SIZE]; SIZE],
            stones: [[Stone::Empty; SIZE]; SIZE],
            observers: Vec::new(),
            scratch: Vec::with_capacity(SIZE * SIZE),
            pending: Vec::new(),
            published: Arc::new(Mutex::new([[Stone::Empty; SIZE]; SIZE])),
            phase: Arc::new(PhaseCell::new()),
            stop_requested: Arc::new(AtomicBool::new(false)),
            period_ms: Arc::new(AtomicU64::new(cfg.scan_period_ms)),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Builds the scanner wrapped in an `Arc<Mutex<_>>`, ready to hand to
    /// the scheduler.
    pub fn new_arc(
        adc: A,
        row_lines: [P; 4],
        col_lines: [P; 4],
        cfg: &BoardConfig,
    ) -> Result<Arc<Mutex<Self>>> {
        Ok(Arc::new(Mutex::new(Self::new(
            adc, row_lines, col_lines, cfg,
        )?)))
    }

    /// Registers a change observer under `name`. Observers are invoked in
    /// registration order and are never unregistered.
    pub fn register_observer(
        &mut self,
        name: &str,
        observer: ChangeObserver,
    ) -> Result<(), ScanError> {
        if self.observers.iter().any(|(n, _)| n == name) {
            return Err(ScanError::DuplicateObserver(name.to_owned()));
        }
        self.observers.push((name.to_owned(), observer));
        Ok(())
    }

    /// Adjusts classification thresholds. Takes effect on the next scan.
    pub fn set_thresholds(&mut self, black: i32, white: i32) -> Result<(), ScanError> {
        if black <= 0 || white <= 0 {
            return Err(ScanError::InvalidConfig(format!(
                "stone thresholds must be positive, got black {black} / white {white}"
            )));
        }
        self.thresholds = Thresholds { black, white };
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn monitor_handle(&self) -> MonitorHandle {
        MonitorHandle {
            phase: Arc::clone(&self.phase),
            stop: Arc::clone(&self.stop_requested),
            period_ms: Arc::clone(&self.period_ms),
        }
    }

    pub fn snapshot_view(&self) -> SnapshotView {
        SnapshotView(Arc::clone(&self.published))
    }

    /// Current occupancy by value, from the copy published between scans.
    pub fn snapshot(&self) -> OccupancyGrid {
        *self.published.lock()
    }

    /// Raw reading at a logical coordinate, from the last completed pass.
    /// Useful when tuning thresholds against a live board.
    pub fn raw_value(&self, row: usize, col: usize) -> u16 {
        self.raw[row][col]
    }

    /// Baseline-corrected reading at a logical coordinate.
    pub fn corrected_value(&self, row: usize, col: usize) -> i32 {
        self.corrected[row][col]
    }

    /// One full Gray-ordered traversal of both muxes. All 225 cells are
    /// read into the scratch buffer without touching the matrices, so a
    /// failed read leaves every matrix exactly as the previous cycle left
    /// it.
    fn acquire_pass(&mut self) -> Result<(), ScanError> {
        self.scratch.clear();
        for row_step in GRAY_SEQUENCE {
            self.row_mux.select(row_step.code)?;
            if usize::from(row_step.code) >= SIZE {
                // Valid mux address with no sensor behind it: the line
                // write keeps the sequence single-transition, but there is
                // nothing to settle for or to read.
                continue;
            }
            for col_step in GRAY_SEQUENCE {
                self.col_mux.select(col_step.code)?;
                if usize::from(col_step.code) >= SIZE {
                    continue;
                }
                if !self.settle.is_zero() {
                    std::thread::sleep(self.settle);
                }
                let raw = self.adc.read_u16()?;
                let (x, y) = self
                    .geometry
                    .transform(row_step.code.into(), col_step.code.into());
                self.scratch.push(Sample { x, y, raw });
            }
        }
        Ok(())
    }

    /// One full scan cycle: acquisition, then matrix update and change
    /// detection. Transitions are appended to the pending queue in
    /// traversal order; occupancy is always recomputed from raw, baseline
    /// and thresholds, never carried over.
    pub fn scan_cycle(&mut self) -> Result<(), ScanError> {
        self.acquire_pass()?;
        for k in 0..self.scratch.len() {
            let Sample { x, y, raw } = self.scratch[k];
            let corrected = i32::from(raw) - i32::from(self.calibration[x][y]);
            let new = self.thresholds.classify(corrected);
            let old = self.stones[x][y];
            self.raw[x][y] = raw;
            self.corrected[x][y] = corrected;
            self.stones[x][y] = new;
            if new != old {
                debug!("stone     ({x}, {y}) {old:?} -> {new:?}");
                self.pending.push(StoneChange {
                    row: x,
                    col: y,
                    old,
                    new,
                });
            }
        }
        Ok(())
    }

    /// Re-baselines every cell from a fresh acquisition pass. Occupancy is
    /// forced to empty and no change records are produced, whatever the
    /// previous state was.
    pub fn calibrate(&mut self) -> Result<(), ScanError> {
        self.acquire_pass()?;
        for k in 0..self.scratch.len() {
            let Sample { x, y, raw } = self.scratch[k];
            self.raw[x][y] = raw;
            self.calibration[x][y] = raw;
            self.corrected[x][y] = 0;
            self.stones[x][y] = Stone::Empty;
        }
        self.pending.clear();
        self.publish();
        info!("calibration pass complete");
        Ok(())
    }

    /// Calibrates through the shared handle, failing fast instead of
    /// blocking while a scan is in flight. The scheduler holds the lock for
    /// the whole scanning and dispatch span, so winning the lock here means
    /// the scheduler is idle, waiting or stopped.
    pub fn request_calibration(board: &Arc<Mutex<Self>>) -> Result<(), ScanError> {
        match board.try_lock() {
            Some(mut guard) => guard.calibrate(),
            None => Err(ScanError::CalibrationBusy),
        }
    }

    /// Delivers pending records record-major: every observer sees a record
    /// before the next record goes out. A failing observer is logged and
    /// skipped for that record only.
    pub(crate) fn dispatch_pending(&mut self) {
        for change in self.pending.drain(..) {
            for (name, observer) in self.observers.iter_mut() {
                if let Err(e) = observer(change) {
                    warn!("observer `{name}` failed on {change:?}: {e}");
                }
            }
        }
    }

    /// Swaps the published occupancy copy. Only called between scans, so
    /// snapshot readers always see a complete board.
    pub(crate) fn publish(&self) {
        *self.published.lock() = self.stones;
    }
}

impl<P, A> Board<P, A>
where
    P: SelectPin + Send + 'static,
    A: AnalogPin + Send + 'static,
{
    /// Starts the scan scheduler on a background thread and returns a
    /// control handle. A no-op when already running, and a stopped
    /// scheduler stays stopped.
    pub fn start_monitoring(board: Arc<Mutex<Self>>, period: Duration) -> MonitorHandle {
        let (handle, running) = {
            let b = board.lock();
            b.period_ms.store(period.as_millis() as u64, SeqCst);
            (b.monitor_handle(), Arc::clone(&b.running))
        };
        if running.swap(true, SeqCst) {
            warn!("scan scheduler already started, ignoring");
            return handle;
        }
        info!("entering the scan loop");
        std::thread::spawn(move || Self::scan_loop(board));
        handle
    }

    fn scan_loop(board: Arc<Mutex<Self>>) {
        let (phase, stop, period_ms) = {
            let b = board.lock();
            (
                Arc::clone(&b.phase),
                Arc::clone(&b.stop_requested),
                Arc::clone(&b.period_ms),
            )
        };
        loop {
            if stop.load(SeqCst) {
                break;
            }
            {
                let mut b = board.lock();
                phase.set(Phase::Scanning);
                match b.scan_cycle() {
                    Ok(()) => {
                        phase.set(Phase::Dispatching);
                        b.dispatch_pending();
                        b.publish();
                    }
                    Err(e) => {
                        // Transient electrical noise is expected. The
                        // half-read pass is dropped and nothing is
                        // reported; the next period retries.
                        warn!("scan cycle failed, skipping: {e}");
                    }
                }
                phase.set(Phase::Waiting);
            }
            let period = Duration::from_millis(period_ms.load(SeqCst));
            if period.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(period);
            }
        }
        phase.set(Phase::Stopped);
        info!("scan loop stopped");
    }
}
