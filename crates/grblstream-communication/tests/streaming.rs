//! End-to-end streaming through `GrblController` with a scripted firmware

mod common;

use common::{connected, sync_config, Wire};
use grblstream_communication::{
    CommunicatorConfig, ConnectionDriver, ConnectionParams, ErrorPolicy, GrblController,
};
use grblstream_core::{CommandOutcome, CommunicatorEvent, ControllerState, DispatchMode};
use std::sync::Arc;
use std::time::Duration;

fn small_buffer() -> CommunicatorConfig {
    CommunicatorConfig {
        buffer_size: Some(20),
        ..sync_config()
    }
}

fn completed(log: &common::EventLog) -> Vec<(String, Option<CommandOutcome>)> {
    log.events()
        .into_iter()
        .filter_map(|e| match e {
            CommunicatorEvent::CommandComplete(cmd) => Some((cmd.text().to_string(), cmd.outcome())),
            _ => None,
        })
        .collect()
}

#[test]
fn test_third_command_waits_for_buffer_space() {
    let (controller, wire, log) = connected(small_buffer());

    controller
        .enqueue_program(["G0 X10", "G0 X20", "G0 X30"])
        .unwrap();
    assert_eq!(wire.lines(), vec!["G0 X10", "G0 X20"]);
    assert_eq!(controller.outstanding_bytes(), 14);
    assert_eq!(controller.pending_count(), 1);
    assert_eq!(controller.state(), ControllerState::Run);

    wire.reply("ok\n");
    assert_eq!(wire.lines(), vec!["G0 X10", "G0 X20", "G0 X30"]);
    assert_eq!(controller.outstanding_bytes(), 14);
    assert_eq!(controller.active_command_summary(), "G0 X20, G0 X30");

    wire.reply("ok\nok\n");
    assert_eq!(controller.outstanding_count(), 0);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(log.stream_completions(), vec![true]);
    assert!(!controller.is_streaming());
}

#[test]
fn test_acks_split_across_reads() {
    let (controller, wire, log) = connected(sync_config());

    controller.enqueue_program(["G1 X1 F100", "G1 X2"]).unwrap();
    wire.reply("ok\r");
    assert_eq!(controller.outstanding_count(), 2);
    wire.reply("\nok\n");

    assert_eq!(
        completed(&log),
        vec![
            ("G1 X1 F100".to_string(), Some(CommandOutcome::Ok)),
            ("G1 X2".to_string(), Some(CommandOutcome::Ok)),
        ]
    );
}

#[test]
fn test_error_response_retires_command() {
    let (controller, wire, log) = connected(sync_config());

    controller.send_command("G0 X1").unwrap();
    wire.reply("error: 9\n");

    assert_eq!(
        completed(&log),
        vec![("G0 X1".to_string(), Some(CommandOutcome::Error(Some(9))))]
    );
    assert_eq!(controller.outstanding_count(), 0);
    assert_eq!(controller.state(), ControllerState::Idle);
    // single commands never complete a stream
    assert!(log.stream_completions().is_empty());
}

#[test]
fn test_error_with_continue_policy_keeps_sending() {
    let (controller, wire, log) = connected(CommunicatorConfig {
        error_policy: ErrorPolicy::Continue,
        single_step: true,
        ..sync_config()
    });

    controller.enqueue_program(["G0 X1", "G5 X2", "G0 X3"]).unwrap();
    wire.reply("ok\nerror:20\n");
    assert_eq!(wire.lines(), vec!["G0 X1", "G5 X2", "G0 X3"]);

    wire.reply("ok\n");
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(log.stream_completions(), vec![false]);
}

#[test]
fn test_error_with_pause_policy_holds_until_resumed() {
    let (controller, wire, log) = connected(CommunicatorConfig {
        single_step: true,
        ..sync_config()
    });

    controller.enqueue_program(["G0 X1", "G0 X2"]).unwrap();
    wire.reply("error:33\n");

    assert_eq!(controller.state(), ControllerState::Hold);
    assert!(controller.is_paused());
    assert_eq!(log.count(|e| *e == CommunicatorEvent::Paused), 1);
    assert_eq!(wire.lines(), vec!["G0 X1"]);

    controller.resume_send().unwrap();
    assert_eq!(wire.realtime(), vec![b'~']);
    assert_eq!(wire.lines(), vec!["G0 X1", "G0 X2"]);
    assert_eq!(controller.state(), ControllerState::Run);

    wire.reply("ok\n");
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(log.stream_completions(), vec![false]);
}

#[test]
fn test_error_with_abort_policy_drops_pending() {
    let (controller, wire, log) = connected(CommunicatorConfig {
        error_policy: ErrorPolicy::Abort,
        single_step: true,
        ..sync_config()
    });

    controller
        .enqueue_program(["G0 X1", "G0 X2", "G0 X3"])
        .unwrap();
    wire.reply("error:2\n");

    assert_eq!(wire.lines(), vec!["G0 X1"]);
    assert_eq!(controller.pending_count(), 0);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(log.stream_completions(), vec![false]);
}

#[test]
fn test_cancel_clears_both_queues() {
    let (controller, wire, log) = connected(CommunicatorConfig {
        single_step: true,
        ..sync_config()
    });

    controller
        .enqueue_program(["G0 X1", "G0 X2", "G0 X3"])
        .unwrap();
    assert_eq!(controller.outstanding_count(), 1);
    assert_eq!(controller.pending_count(), 2);

    controller.cancel().unwrap();
    assert_eq!(controller.pending_count(), 0);
    assert_eq!(controller.outstanding_count(), 0);
    assert_eq!(controller.outstanding_bytes(), 0);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(log.stream_completions(), vec![false]);
    assert_eq!(wire.realtime(), vec![b'!', 0x18]);

    // a late ack for the dropped command is reported but matches nothing
    wire.reply("ok\n");
    assert_eq!(log.stream_completions(), vec![false]);
    assert!(log
        .events()
        .contains(&CommunicatorEvent::RawResponse { line: "ok".into() }));

    // cancelling again does nothing
    controller.cancel().unwrap();
    assert_eq!(wire.realtime(), vec![b'!', 0x18]);
    assert_eq!(log.stream_completions(), vec![false]);
}

#[test]
fn test_pause_and_resume() {
    let (controller, wire, log) = connected(small_buffer());

    controller
        .enqueue_program(["G0 X10", "G0 X20", "G0 X30", "G0 X40"])
        .unwrap();
    controller.pause_send().unwrap();
    assert_eq!(controller.state(), ControllerState::Hold);
    assert_eq!(wire.realtime(), vec![b'!']);
    assert_eq!(log.count(|e| *e == CommunicatorEvent::Paused), 1);

    wire.reply("ok\nok\n");
    assert_eq!(wire.lines().len(), 2);
    assert_eq!(controller.pending_count(), 2);

    controller.resume_send().unwrap();
    assert_eq!(wire.realtime(), vec![b'!', b'~']);
    assert_eq!(wire.lines().len(), 4);

    wire.reply("ok\nok\n");
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(log.stream_completions(), vec![true]);
}

#[test]
fn test_cancel_after_paused_stream_drained() {
    let (controller, wire, log) = connected(sync_config());

    controller.enqueue_program(["G0 X1"]).unwrap();
    controller.pause_send().unwrap();
    wire.reply("ok\n");
    assert_eq!(controller.state(), ControllerState::Hold);
    assert_eq!(controller.outstanding_count(), 0);
    assert!(controller.can_cancel());

    controller.cancel().unwrap();
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(wire.realtime(), vec![b'!', b'!', 0x18]);
    assert_eq!(log.stream_completions(), vec![true]);

    controller.cancel().unwrap();
    assert_eq!(wire.realtime(), vec![b'!', b'!', 0x18]);
}

#[test]
fn test_cancel_firmware_hold_with_nothing_queued() {
    let (controller, wire, log) = connected(sync_config());

    wire.reply("<Hold:0|MPos:0.000,0.000,0.000|FS:0,0>\n");
    assert_eq!(controller.state(), ControllerState::Hold);

    controller.cancel().unwrap();
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(wire.realtime(), vec![b'!', 0x18]);
    assert!(log.stream_completions().is_empty());
}

#[test]
fn test_cancel_jog_sends_jog_cancel_only() {
    let (controller, wire, _log) = connected(sync_config());

    controller.send_command("$J=G91 X10 F500").unwrap();
    wire.reply("<Jog|MPos:2.000,0.000,0.000|FS:500,0>\n");
    assert_eq!(controller.state(), ControllerState::Run);

    controller.cancel().unwrap();
    assert_eq!(wire.realtime(), vec![0x85]);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.outstanding_count(), 0);
}

#[test]
fn test_error_in_check_mode_pauses_until_resumed() {
    let (controller, wire, log) = connected(CommunicatorConfig {
        single_step: true,
        ..sync_config()
    });

    wire.reply("[MSG:Enabled]\n");
    assert_eq!(controller.state(), ControllerState::Check);

    controller
        .enqueue_program(["G0 X1", "G1 X2 F0", "G0 X3"])
        .unwrap();
    wire.reply("ok\nerror:22\n");
    assert_eq!(controller.state(), ControllerState::Check);
    assert_eq!(controller.pending_count(), 1);
    assert_eq!(log.count(|e| *e == CommunicatorEvent::Paused), 1);

    controller.resume_send().unwrap();
    assert_eq!(wire.realtime(), vec![b'~']);
    assert_eq!(wire.lines(), vec!["G0 X1", "G1 X2 F0", "G0 X3"]);

    wire.reply("ok\n");
    assert_eq!(controller.state(), ControllerState::Check);
    assert_eq!(log.stream_completions(), vec![false]);
}

#[test]
fn test_firmware_feed_hold_stops_sending() {
    let (controller, wire, log) = connected(small_buffer());

    controller
        .enqueue_program(["G0 X10", "G0 X20", "G0 X30", "G0 X40"])
        .unwrap();
    wire.reply("<Hold:0|MPos:1.000,0.000,0.000|FS:0,0>\n");
    assert!(controller.is_paused());
    assert_eq!(log.count(|e| *e == CommunicatorEvent::Paused), 1);

    wire.reply("ok\n");
    assert_eq!(wire.lines(), vec!["G0 X10", "G0 X20"]);
    assert_eq!(controller.pending_count(), 2);

    // cycle start pressed on the machine
    wire.reply("<Run|MPos:2.000,0.000,0.000|FS:500,0>\n");
    assert_eq!(controller.state(), ControllerState::Run);
    assert_eq!(wire.lines(), vec!["G0 X10", "G0 X20", "G0 X30"]);

    wire.reply("ok\nok\nok\n");
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(log.stream_completions(), vec![true]);
    assert!(wire.realtime().is_empty());
}

#[test]
fn test_firmware_feed_hold_released_by_resume_send() {
    let (controller, wire, log) = connected(small_buffer());

    controller
        .enqueue_program(["G0 X10", "G0 X20", "G0 X30"])
        .unwrap();
    wire.reply("<Hold:0|MPos:1.000,0.000,0.000|FS:0,0>\nok\n");
    assert_eq!(wire.lines().len(), 2);

    controller.resume_send().unwrap();
    assert_eq!(wire.realtime(), vec![b'~']);
    assert_eq!(wire.lines().len(), 3);

    wire.reply("ok\nok\n");
    assert_eq!(log.stream_completions(), vec![true]);
}

#[test]
fn test_undecodable_line_is_reported_raw() {
    let (controller, wire, log) = connected(sync_config());

    controller.send_command("G0 X1").unwrap();
    wire.reply_bytes(b"ok\xff\n");
    assert_eq!(controller.outstanding_count(), 1);
    assert!(log.events().contains(&CommunicatorEvent::RawResponse {
        line: "ok\u{fffd}".into()
    }));

    wire.reply("ok\n");
    assert_eq!(controller.outstanding_count(), 0);
}

#[test]
fn test_comments_and_status_queries_in_programs() {
    let (controller, wire, log) = connected(sync_config());

    controller
        .enqueue_program(["(setup)", "G21", "?", "G0 X1"])
        .unwrap();
    assert_eq!(wire.lines(), vec!["G21", "G0 X1"]);
    assert_eq!(wire.realtime(), vec![b'?']);
    assert_eq!(controller.outstanding_bytes(), 4 + 6);
    assert_eq!(
        log.count(|e| matches!(e, CommunicatorEvent::CommandSkipped(_))),
        1
    );

    wire.reply("ok\nok\n");
    assert_eq!(log.stream_completions(), vec![true]);
}

#[test]
fn test_event_order_for_one_command() {
    let (controller, wire, log) = connected(sync_config());

    controller.enqueue_program(["G0 X1"]).unwrap();
    wire.reply("ok\n");

    let kinds: Vec<String> = log
        .events()
        .iter()
        .map(|e| match e {
            CommunicatorEvent::CommandSent(_) => "sent".to_string(),
            CommunicatorEvent::CommandComplete(_) => "complete".to_string(),
            CommunicatorEvent::RawResponse { line } => format!("raw {}", line),
            CommunicatorEvent::StreamComplete { success } => format!("stream {}", success),
            CommunicatorEvent::StateChanged { from, to } => format!("{:?}->{:?}", from, to),
            other => format!("{:?}", other),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "sent",
            "Idle->Run",
            "raw ok",
            "complete",
            "stream true",
            "Run->Idle",
        ]
    );
}

#[test]
fn test_status_report_leaves_queue_alone() {
    let (controller, wire, log) = connected(sync_config());

    controller.send_command("G0 X5").unwrap();
    wire.reply("<Idle,MPos:1.0,2.0,3.0,WPos:0.0,0.0,0.0>\n");

    let status = controller.controller_status();
    assert_eq!(status.state, ControllerState::Idle);
    assert_eq!(
        (status.machine_coord.x, status.machine_coord.y, status.machine_coord.z),
        (1.0, 2.0, 3.0)
    );
    assert_eq!(
        (status.work_coord.x, status.work_coord.y, status.work_coord.z),
        (0.0, 0.0, 0.0)
    );
    assert_eq!(controller.outstanding_count(), 1);
    assert_eq!(controller.state(), ControllerState::Run);
    assert_eq!(
        log.count(|e| matches!(e, CommunicatorEvent::StatusUpdated(_))),
        1
    );
    assert_eq!(
        log.count(|e| matches!(e, CommunicatorEvent::RawResponse { .. })),
        0
    );
}

#[test]
fn test_firmware_hold_and_idle_reports() {
    let (controller, wire, _log) = connected(sync_config());

    wire.reply("<Hold:0|MPos:0.000,0.000,0.000|FS:0,0>\n");
    assert_eq!(controller.state(), ControllerState::Hold);

    wire.reply("<Idle|MPos:0.000,0.000,0.000|FS:0,0>\n");
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn test_alarm_drops_queues_until_unlocked() {
    let (controller, wire, log) = connected(sync_config());

    controller.enqueue_program(["G0 X1", "G0 X2"]).unwrap();
    wire.reply("ALARM:1\n");

    assert_eq!(controller.state(), ControllerState::Alarm);
    assert_eq!(controller.outstanding_count(), 0);
    assert_eq!(log.stream_completions(), vec![false]);
    assert!(log.events().iter().any(|e| matches!(
        e,
        CommunicatorEvent::Alarm { code: 1, description } if description.contains("limit")
    )));
    assert!(controller
        .enqueue_program(["G0 X3"])
        .unwrap_err()
        .is_invalid_state());

    wire.clear();
    controller.unlock().unwrap();
    assert_eq!(wire.lines(), vec!["$X"]);
    assert_eq!(controller.state(), ControllerState::Idle);
    wire.reply("ok\n");
    assert_eq!(controller.outstanding_count(), 0);
}

#[test]
fn test_welcome_banner_resets_stream() {
    let (controller, wire, log) = connected(sync_config());

    controller.enqueue_program(["G0 X1"]).unwrap();
    wire.reply("\r\nGrbl 1.1h ['$' for help]\r\n");

    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(controller.outstanding_count(), 0);
    assert_eq!(log.stream_completions(), vec![false]);
}

#[test]
fn test_unrecognised_lines_are_raw_responses() {
    let (controller, wire, log) = connected(sync_config());

    wire.reply("[MSG:Pgm End]\nsomething odd\n$130=200.000\n");
    assert_eq!(
        log.count(|e| matches!(e, CommunicatorEvent::RawResponse { .. })),
        3
    );
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn test_write_failure_moves_to_error() {
    let (controller, wire, log) = connected(sync_config());

    wire.fail_writes(true);
    let err = controller.enqueue_program(["G0 X1"]).unwrap_err();
    assert!(err.is_io_error());
    assert_eq!(controller.state(), ControllerState::Error);
    assert_eq!(
        log.count(|e| matches!(e, CommunicatorEvent::ConnectionError { .. })),
        1
    );
    assert_eq!(log.stream_completions(), vec![false]);
    assert!(!controller.can_send());
}

#[test]
fn test_link_closed_by_peer() {
    let (controller, wire, log) = connected(sync_config());

    controller.enqueue_program(["G0 X1"]).unwrap();
    wire.close("device vanished");

    assert_eq!(controller.state(), ControllerState::Disconnected);
    assert!(log.events().contains(&CommunicatorEvent::ConnectionError {
        reason: "device vanished".into()
    }));
    assert_eq!(log.stream_completions(), vec![false]);

    // late bytes are dropped
    wire.reply("ok\n");
    assert_eq!(controller.state(), ControllerState::Disconnected);
}

#[test]
fn test_oversized_command_is_rejected_up_front() {
    let (controller, wire, _log) = connected(small_buffer());

    let long = format!("G1 X1 ({})", "x".repeat(30));
    let err = controller.enqueue_program(["G0 X1", long.as_str()]).unwrap_err();
    assert!(err.to_string().contains("holds 20"));
    assert!(wire.writes().is_empty());
    assert_eq!(controller.state(), ControllerState::Idle);
}

#[test]
fn test_async_dispatch_delivers_in_order() {
    let wire = Wire::new();
    let config = CommunicatorConfig {
        dispatch_mode: DispatchMode::Async,
        ..CommunicatorConfig::default()
    };
    let controller = GrblController::new(&config, wire.transport());
    let (tx, rx) = crossbeam_channel::unbounded();
    controller.add_listener(Arc::new(move |event: &CommunicatorEvent| {
        let _ = tx.send(event.clone());
    }));
    controller
        .connect(&ConnectionParams {
            driver: ConnectionDriver::NoOp,
            ..ConnectionParams::default()
        })
        .unwrap();

    controller
        .enqueue_program(["G0 X1", "G0 X2", "G0 X3"])
        .unwrap();
    wire.reply("ok\nok\nok\n");

    let mut completed = Vec::new();
    loop {
        match rx.recv_timeout(Duration::from_secs(2)).expect("stream never completed") {
            CommunicatorEvent::CommandComplete(cmd) => completed.push(cmd.seq()),
            CommunicatorEvent::StreamComplete { success } => {
                assert!(success);
                break;
            }
            _ => {}
        }
    }

    assert_eq!(completed.len(), 3);
    assert!(completed.windows(2).all(|w| w[0] < w[1]));
}
