use anyhow::Result;
use clap::Parser;
use log::info;
use simplelog::*;

use std::path::PathBuf;
use std::time::Duration;

use stoneboard::board::stone::StoneChange;
use stoneboard::board::{Board, DEFAULT_BASELINE, Phase, stone};
use stoneboard::cfg::BoardConfig;
use stoneboard::sim;

#[derive(Parser, Debug)]
#[command(author, version, verbatim_doc_comment)]
/// stoneboard: sensing core for a 15x15 stone-board controller
///
/// Scans the board's sensor matrix through its two multiplexers, classifies
/// every cell as empty, black or white against a calibrated baseline, and
/// reports each change as one JSON line on stdout. This binary drives the
/// simulated board; real hardware plugs in behind the same pin traits.
struct Args {
    /// Configuration file to use. If not specified, defaults to
    /// stoneboard.json in the current working directory and in the user
    /// configuration directory, falling back to built-in defaults.
    #[arg(short, long, verbatim_doc_comment)]
    cfg: Option<PathBuf>,

    /// Override the inter-scan period, in milliseconds. Zero scans back to
    /// back.
    #[arg(short, long)]
    period: Option<u64>,

    /// How long to run before stopping, in seconds.
    #[arg(long, default_value_t = 4)]
    run_for: u64,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging; implies --debug as well.
    #[arg(short, long)]
    trace: bool,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

struct ValidatedArgs {
    cfg: BoardConfig,
    run_for: Duration,
}

/// Parse CLI arguments and initialize logging.
fn cli_init() -> Result<ValidatedArgs> {
    let args = Args::parse();

    let log_lvl = match (args.debug, args.trace) {
        (_, true) => LevelFilter::Trace,
        (true, false) => LevelFilter::Debug,
        (false, false) => LevelFilter::Info,
    };

    let mut log_cfg = ConfigBuilder::new();
    if let Err(e) = log_cfg.set_time_offset_to_local() {
        eprintln!("WARNING: could not set log TZ to local: {e:?}");
    };
    log_cfg.set_time_format_rfc3339();
    CombinedLogger::init(vec![TermLogger::new(
        log_lvl,
        log_cfg.build(),
        TerminalMode::Mixed,
        ColorChoice::AlwaysAnsi,
    )])
    .expect("logger can init");
    log::info!("stoneboard v{} starting", env!("CARGO_PKG_VERSION"));

    let cfg_path = args.cfg.or_else(|| stoneboard::default_cfg().into_iter().next());
    let mut cfg = match cfg_path {
        Some(path) => {
            info!("using configuration file {}", path.display());
            BoardConfig::new_from_file(&path)?
        }
        None => BoardConfig::default(),
    };
    if let Some(period) = args.period {
        cfg.scan_period_ms = period;
    }
    cfg.validate()?;

    if args.check {
        log::info!("configuration is valid, exiting");
        std::process::exit(0);
    }

    Ok(ValidatedArgs {
        cfg,
        run_for: Duration::from_secs(args.run_for),
    })
}

fn main_impl() -> Result<()> {
    let args = cli_init()?;
    let cfg = args.cfg;

    info!(
        "select lines S0-S3 {:?}, main lines M0-M3 {:?}, analog input {}",
        cfg.select_lines, cfg.main_lines, cfg.analog_line
    );

    let (sim, adc, row_lines, col_lines) = sim::sim_board(DEFAULT_BASELINE);
    let board = Board::new_arc(adc, row_lines, col_lines, &cfg)?;

    // Baseline the sensors before anything can observe the board.
    board.lock().calibrate()?;

    board.lock().register_observer(
        "stdout",
        Box::new(|change: StoneChange| -> Result<()> {
            println!("{}", serde_json::to_string(&change)?);
            Ok(())
        }),
    )?;

    let snapshot = board.lock().snapshot_view();
    let handle = Board::start_monitoring(board.clone(), cfg.scan_period());

    // Script a short opening onto the simulated sensors.
    let moves: &[(usize, usize, i32)] = &[(7, 7, 900), (8, 8, -900), (3, 11, 900)];
    let pause = args.run_for / (moves.len() as u32 + 1);
    for &(i, j, offset) in moves {
        std::thread::sleep(pause);
        let value = (i32::from(DEFAULT_BASELINE) + offset) as u16;
        sim.lock().set_cell(i, j, value);
        info!("placed a simulated stone at physical ({i}, {j})");
    }
    std::thread::sleep(pause);

    handle.stop_monitoring();
    while handle.phase() != Phase::Stopped {
        std::thread::sleep(Duration::from_millis(10));
    }

    println!("{}", stone::render(&snapshot.get()));
    Ok(())
}

fn main() -> Result<()> {
    let ret = main_impl();
    if let Err(ref e) = ret {
        log::error!("{e}\n");
    }
    ret
}
