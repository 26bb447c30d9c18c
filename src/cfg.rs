//! Board configuration: control-line assignments, orientation, thresholds
//! and scan timing.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::board::geometry::Geometry;
use crate::board::stone::Thresholds;

pub const DEFAULT_BLACK_THRESHOLD: i32 = 600;
pub const DEFAULT_WHITE_THRESHOLD: i32 = 600;

/// Everything the scanner consumes from the environment, read once at
/// startup. Thresholds and the scan period remain adjustable between scans;
/// the line assignments and geometry are fixed for the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardConfig {
    /// Individual (row) mux select lines S0-S3.
    pub select_lines: [u8; 4],
    /// Main (column) mux select lines M0-M3.
    pub main_lines: [u8; 4],
    /// Analog input carrying the muxed sensor signal.
    pub analog_line: u8,
    /// Quarter turns clockwise applied to physical coordinates, 0-3.
    pub rotation: u8,
    /// Mirror the first logical coordinate after rotation.
    pub flip: bool,
    pub black_threshold: i32,
    pub white_threshold: i32,
    /// Delay between scan cycles in milliseconds. Zero scans back to back.
    pub scan_period_ms: u64,
    /// Settling time paid after a line write before the analog read.
    pub settle_micros: u64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            select_lines: [10, 11, 12, 13],
            main_lines: [4, 5, 6, 7],
            analog_line: 26,
            rotation: 0,
            flip: true,
            black_threshold: DEFAULT_BLACK_THRESHOLD,
            white_threshold: DEFAULT_WHITE_THRESHOLD,
            scan_period_ms: 100,
            settle_micros: 10,
        }
    }
}

impl BoardConfig {
    /// Loads and validates a JSON configuration file. Missing fields fall
    /// back to the defaults; unknown fields are rejected.
    pub fn new_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        let cfg: Self = serde_json::from_str(&text)
            .with_context(|| format!("could not parse config file {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Startup validation. A configuration that fails here is a wiring or
    /// programming error and monitoring refuses to start.
    pub fn validate(&self) -> Result<()> {
        if self.rotation > 3 {
            bail!("rotation must be 0-3, got {}", self.rotation);
        }
        if self.black_threshold <= 0 || self.white_threshold <= 0 {
            bail!(
                "stone thresholds must be positive, got black {} / white {}",
                self.black_threshold,
                self.white_threshold
            );
        }
        let mut lines: Vec<u8> = Vec::with_capacity(9);
        lines.extend_from_slice(&self.select_lines);
        lines.extend_from_slice(&self.main_lines);
        lines.push(self.analog_line);
        lines.sort_unstable();
        for pair in lines.windows(2) {
            if pair[0] == pair[1] {
                bail!("line {} is assigned more than once", pair[0]);
            }
        }
        if !self.geometry().is_bijective() {
            bail!(
                "rotation {} with flip {} does not map the board one to one",
                self.rotation,
                self.flip
            );
        }
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.rotation, self.flip)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            black: self.black_threshold,
            white: self.white_threshold,
        }
    }

    pub fn scan_period(&self) -> Duration {
        Duration::from_millis(self.scan_period_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_micros(self.settle_micros)
    }
}
