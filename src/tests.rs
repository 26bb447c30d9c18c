//! Scenario tests driving the scheduler over the simulated board.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::board::stone::{Stone, StoneChange};
use crate::board::{Board, DEFAULT_BASELINE, Phase, ScanError};
use crate::cfg::BoardConfig;
use crate::sim::{SimAdc, SimHandle, SimPin, sim_board};

type SimBoard = Board<SimPin, SimAdc>;

fn init_log() {
    use simplelog::*;
    use std::sync::OnceLock;
    static LOG_INIT: OnceLock<()> = OnceLock::new();
    LOG_INIT.get_or_init(|| {
        let mut log_cfg = ConfigBuilder::new();
        if let Err(e) = log_cfg.set_time_offset_to_local() {
            eprintln!("WARNING: could not set log TZ to local: {e:?}");
        };
        log_cfg.set_time_format_rfc3339();
        CombinedLogger::init(vec![TermLogger::new(
            // Note: set to a different level to see logs in tests.
            LevelFilter::Off,
            log_cfg.build(),
            TerminalMode::Stderr,
            ColorChoice::AlwaysAnsi,
        )])
        .expect("logger can init");
    });
}

fn test_cfg() -> BoardConfig {
    BoardConfig {
        scan_period_ms: 1,
        settle_micros: 0,
        ..BoardConfig::default()
    }
}

fn new_board() -> (SimHandle, Arc<Mutex<SimBoard>>) {
    let (sim, adc, rows, cols) = sim_board(DEFAULT_BASELINE);
    let board = Board::new_arc(adc, rows, cols, &test_cfg()).expect("board builds");
    (sim, board)
}

fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

fn stone_value(offset: i32) -> u16 {
    (i32::from(DEFAULT_BASELINE) + offset) as u16
}

#[test]
fn placed_stone_appears_at_the_transformed_coordinate() {
    init_log();
    let (sim, board) = new_board();
    let mut b = board.lock();
    b.calibrate().expect("calibration succeeds");
    let (tx, rx) = mpsc::sync_channel(64);
    b.register_observer(
        "collector",
        Box::new(move |change| {
            tx.send(change).expect("collector channel accepts");
            Ok(())
        }),
    )
    .expect("observer registers");

    // Physical (0, 0) reads 700 over the baseline; with the default
    // orientation (no rotation, flipped) that is logical (14, 0).
    sim.lock().set_cell(0, 0, 32500);
    b.scan_cycle().expect("scan succeeds");
    b.dispatch_pending();
    b.publish();
    assert_eq!(
        rx.try_recv().expect("placement is delivered"),
        StoneChange {
            row: 14,
            col: 0,
            old: Stone::Empty,
            new: Stone::Black,
        }
    );
    assert!(rx.try_recv().is_err(), "exactly one record per transition");
    assert_eq!(b.snapshot()[14][0], Stone::Black);

    // A steady board scans quietly.
    b.scan_cycle().expect("scan succeeds");
    b.dispatch_pending();
    assert!(rx.try_recv().is_err(), "steady board produces no records");

    // Back under the threshold counts as removal.
    sim.lock().set_cell(0, 0, stone_value(100));
    b.scan_cycle().expect("scan succeeds");
    b.dispatch_pending();
    assert_eq!(
        rx.try_recv().expect("removal is delivered"),
        StoneChange {
            row: 14,
            col: 0,
            old: Stone::Black,
            new: Stone::Empty,
        }
    );
}

#[test]
fn records_follow_scan_traversal_order() {
    init_log();
    let (sim, board) = new_board();
    let mut b = board.lock();
    b.calibrate().expect("calibration succeeds");
    let (tx, rx) = mpsc::sync_channel(64);
    b.register_observer(
        "collector",
        Box::new(move |change| {
            tx.send(change).expect("collector channel accepts");
            Ok(())
        }),
    )
    .expect("observer registers");

    // Columns are visited in Gray order, so physical j = 3 is read before
    // j = 2 and the records must arrive that way round.
    sim.lock().set_cell(0, 2, stone_value(900));
    sim.lock().set_cell(0, 3, stone_value(900));
    b.scan_cycle().expect("scan succeeds");
    b.dispatch_pending();

    let delivered: Vec<StoneChange> = rx.try_iter().collect();
    let coords: Vec<(usize, usize)> = delivered.iter().map(|c| (c.row, c.col)).collect();
    assert_eq!(coords, vec![(14, 3), (14, 2)]);
}

#[test]
fn monitoring_delivers_changes_in_the_background() {
    init_log();
    let (sim, board) = new_board();
    board.lock().calibrate().expect("calibration succeeds");
    let (tx, rx) = mpsc::sync_channel(64);
    board
        .lock()
        .register_observer(
            "collector",
            Box::new(move |change| {
                tx.send(change).expect("collector channel accepts");
                Ok(())
            }),
        )
        .expect("observer registers");
    let snapshot = board.lock().snapshot_view();

    let handle = Board::start_monitoring(board.clone(), Duration::from_millis(1));
    sim.lock().set_cell(7, 7, stone_value(900));

    let change = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("change is delivered by the scheduler");
    assert_eq!(
        change,
        StoneChange {
            row: 7,
            col: 7,
            old: Stone::Empty,
            new: Stone::Black,
        }
    );
    wait_for("snapshot publication", || {
        snapshot.get()[7][7] == Stone::Black
    });

    handle.stop_monitoring();
    wait_for("graceful stop", || handle.phase() == Phase::Stopped);
}

#[test]
fn slow_observer_backpressures_the_scheduler() {
    init_log();
    let (sim, board) = new_board();
    board.lock().calibrate().expect("calibration succeeds");

    let (gate_tx, gate_rx) = mpsc::sync_channel::<()>(16);
    let (tx, rx) = mpsc::sync_channel(64);
    board
        .lock()
        .register_observer(
            "slow",
            Box::new(move |change| {
                tx.send(change).expect("collector channel accepts");
                gate_rx.recv()?;
                Ok(())
            }),
        )
        .expect("observer registers");

    sim.lock().set_cell(0, 2, stone_value(900));
    sim.lock().set_cell(0, 3, stone_value(900));

    let handle = Board::start_monitoring(board.clone(), Duration::from_millis(1));
    wait_for("dispatch to begin", || handle.phase() == Phase::Dispatching);

    // While the observer sits on the first record the scheduler must not
    // move on, and in particular must not start another scan.
    for _ in 0..5 {
        assert_eq!(
            handle.phase(),
            Phase::Dispatching,
            "scheduler must stay in dispatch while an observer is busy"
        );
        std::thread::sleep(Duration::from_millis(20));
    }

    gate_tx.send(()).expect("gate accepts");
    gate_tx.send(()).expect("gate accepts");
    wait_for("dispatch to drain", || handle.phase() != Phase::Dispatching);

    // Both records arrive, in traversal order, with nothing dropped.
    let first = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("first record");
    let second = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("second record");
    assert_eq!((first.row, first.col), (14, 3));
    assert_eq!((second.row, second.col), (14, 2));
    assert!(
        rx.recv_timeout(Duration::from_millis(100)).is_err(),
        "no further records for a steady board"
    );

    handle.stop_monitoring();
    wait_for("graceful stop", || handle.phase() == Phase::Stopped);
}

#[test]
fn calibration_is_rejected_mid_dispatch() {
    init_log();
    let (sim, board) = new_board();
    board.lock().calibrate().expect("calibration succeeds");

    let (gate_tx, gate_rx) = mpsc::sync_channel::<()>(16);
    board
        .lock()
        .register_observer(
            "slow",
            Box::new(move |_| {
                gate_rx.recv()?;
                Ok(())
            }),
        )
        .expect("observer registers");

    sim.lock().set_cell(4, 9, stone_value(900));
    let handle = Board::start_monitoring(board.clone(), Duration::from_millis(1));
    wait_for("dispatch to begin", || handle.phase() == Phase::Dispatching);

    let err = Board::request_calibration(&board).expect_err("calibration must be rejected");
    assert!(matches!(err, ScanError::CalibrationBusy));

    gate_tx.send(()).expect("gate accepts");
    handle.stop_monitoring();
    wait_for("graceful stop", || handle.phase() == Phase::Stopped);

    Board::request_calibration(&board).expect("calibration is allowed once stopped");
}

#[test]
fn stopped_scheduler_never_restarts() {
    init_log();
    let (_sim, board) = new_board();
    board.lock().calibrate().expect("calibration succeeds");

    let handle = Board::start_monitoring(board.clone(), Duration::from_millis(1));
    // A second start is a no-op rather than a second scan loop.
    let again = Board::start_monitoring(board.clone(), Duration::from_millis(1));

    again.stop_monitoring();
    wait_for("graceful stop", || handle.phase() == Phase::Stopped);

    let after = Board::start_monitoring(board.clone(), Duration::from_millis(1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        after.phase(),
        Phase::Stopped,
        "a stopped scheduler stays stopped"
    );
}

#[test]
fn period_can_drop_to_zero_at_runtime() {
    init_log();
    let (sim, board) = new_board();
    board.lock().calibrate().expect("calibration succeeds");

    let handle = Board::start_monitoring(board.clone(), Duration::from_millis(50));
    wait_for("first pass", || sim.lock().reads >= 225);

    // Back-to-back scanning, applied between scans without a restart.
    handle.set_scan_period(Duration::ZERO);
    wait_for("several full passes", || sim.lock().reads > 2000);

    handle.stop_monitoring();
    wait_for("graceful stop", || handle.phase() == Phase::Stopped);
}
