//! Corner probing against a simulated machine
//!
//! The simulated firmware acknowledges every line, tracks the tool position
//! through relative moves and stops `G38.2` moves at the workpiece edges.

mod common;

use common::{connected, sync_config, Wire};
use grblstream_communication::{GrblController, ProbeParams, ProbeSession};
use grblstream_core::{ControllerError, ControllerState, Error};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const X_EDGE: f64 = 7.0;
const Y_EDGE: f64 = 5.0;

fn value(word: &str) -> f64 {
    word[1..].parse().unwrap_or(0.0)
}

/// Plays the firmware until the link goes away
fn simulate(wire: &Wire, contact: bool) -> JoinHandle<Vec<String>> {
    let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
    wire.tap(tx);
    let wire = wire.clone();

    thread::spawn(move || {
        let (mut x, mut y) = (0.0_f64, 0.0_f64);
        let mut received = Vec::new();

        while let Ok(bytes) = rx.recv() {
            if bytes == b"?" {
                wire.reply(&format!("<Idle|MPos:{:.3},{:.3},0.000|FS:0,0>\n", x, y));
                continue;
            }
            if bytes.len() == 1 {
                continue;
            }

            let line = String::from_utf8_lossy(&bytes).trim_end().to_string();
            let words: Vec<&str> = line.split_whitespace().collect();
            let mut reply = String::new();

            if words.first() == Some(&"G38.2") {
                if contact {
                    match words.get(1) {
                        Some(w) if w.starts_with('X') => x = X_EDGE,
                        Some(w) if w.starts_with('Y') => y = Y_EDGE,
                        _ => {}
                    }
                    reply.push_str(&format!("[PRB:{:.3},{:.3},0.000:1]\n", x, y));
                } else {
                    reply.push_str(&format!("[PRB:{:.3},{:.3},0.000:0]\n", x, y));
                }
            } else if words.contains(&"G0") {
                for word in &words {
                    match word.chars().next() {
                        Some('X') => x += value(word),
                        Some('Y') => y += value(word),
                        _ => {}
                    }
                }
            }

            reply.push_str("ok\n");
            received.push(line);
            wire.reply(&reply);
        }

        received
    })
}

fn session() -> ProbeSession {
    ProbeSession::new(ProbeParams {
        x_spacing: 10.0,
        y_spacing: 10.0,
        feed_rate: 200.0,
    })
    .with_poll_interval(Duration::from_millis(5))
    .with_timeout(Duration::from_secs(10))
}

fn finish(controller: GrblController, simulator: JoinHandle<Vec<String>>) -> Vec<String> {
    controller.disconnect();
    drop(controller);
    simulator.join().unwrap()
}

#[test]
fn test_finds_corner() {
    let (controller, wire, _log) = connected(sync_config());
    let simulator = simulate(&wire, true);

    let result = session().run(&controller).unwrap();
    assert_eq!(result.corner(), (X_EDGE, Y_EDGE));
    assert_eq!(controller.state(), ControllerState::Idle);

    let lines = finish(controller, simulator);
    assert_eq!(lines.first().map(String::as_str), Some("G91 G21 G0 X10.000"));
    assert_eq!(
        lines.iter().filter(|l| l.starts_with("G38.2")).count(),
        4
    );
    assert!(lines.contains(&"G38.2 Y10.000 F100.000".to_string()));
    assert!(lines.contains(&"G38.2 X10.000 F100.000".to_string()));
    assert_eq!(lines.last().map(String::as_str), Some("G90"));
}

#[test]
fn test_missed_probe_fails() {
    let (controller, wire, _log) = connected(sync_config());
    let simulator = simulate(&wire, false);

    let err = session().run(&controller).unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::ProbeFailed { .. })
    ));

    finish(controller, simulator);
}

#[test]
fn test_requires_idle_controller() {
    let (controller, _wire, _log) = connected(sync_config());
    controller.enqueue_program(["G0 X1"]).unwrap();
    assert_eq!(controller.state(), ControllerState::Run);

    let err = session().run(&controller).unwrap_err();
    assert!(err.is_invalid_state());
}
