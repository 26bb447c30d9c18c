use std::path::PathBuf;

pub mod board;
pub mod cfg;
pub mod hal;
pub mod sim;

pub use board::*;

#[cfg(test)]
mod tests;

/// Configuration files probed when no explicit path is given.
pub fn default_cfg() -> Vec<PathBuf> {
    let mut cfgs = Vec::new();

    let default = PathBuf::from("stoneboard.json");
    if default.is_file() {
        cfgs.push(default);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let fallback = config_dir.join("stoneboard").join("stoneboard.json");
        if fallback.is_file() {
            cfgs.push(fallback);
        }
    }

    cfgs
}
