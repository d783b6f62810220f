use stratopib::config::PibConfig;
use stratopib::controller::PibController;
use stratopib::mode::{FlightState, ManualState};
use stratopib::protocol::{
    AckKind, BinaryPayload, DeviceMessage, McbAsciiId, McbBinaryId, McbCommand, McbCommandId, Outbound, PuAsciiId, PuBinaryId,
    PuCommand, Severity, TelecommandKind,
};
use stratopib::session::MotionKind;
use stratopib::sim::ScriptedBench;
use stratopib::telemetry::TelemetryKind;

const EPOCH: u32 = 1_700_000_000;
const STATUS: &str = "1234, 3.70, 0.25, -10.5, -12.0, 1";

fn manual_bench() -> ScriptedBench {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, false);
    assert_eq!(bench.controller.flight_state(), FlightState::Manual);
    bench
}

fn ra_sent(controller: &PibController) -> u32 {
    controller.supervisor().get_stats().ra_sent
}

fn manual_state(controller: &PibController) -> ManualState {
    controller.engine().flight().manual().state()
}

fn in_error(controller: &PibController) -> bool {
    controller.engine().flight().in_error()
}

fn reports(outbound: &[Outbound], severity: Severity) -> Vec<String> {
    outbound
        .iter()
        .filter_map(|message| match message {
            Outbound::Report { severity: s, message } if *s == severity => Some(message.clone()),
            _ => None,
        })
        .collect()
}

fn motion_commands(bench: &ScriptedBench) -> usize {
    bench
        .mcb
        .sent()
        .iter()
        .filter(|command| {
            matches!(
                command,
                McbCommand::ReelIn { .. }
                    | McbCommand::ReelOut { .. }
                    | McbCommand::Dock { .. }
                    | McbCommand::InNoLatch { .. }
            )
        })
        .count()
}

fn authorize(bench: &mut ScriptedBench) {
    let before = ra_sent(&bench.controller);
    assert!(bench.run_until(5, |c| ra_sent(c) > before), "RA never sent");
    bench.ack(AckKind::RequestAuthorization, true);
}

fn await_motion_command(bench: &mut ScriptedBench, kind: MotionKind) {
    assert!(
        bench.run_until(10, |c| c.mcb().motion().kind == kind && !c.mcb().motion_ongoing()),
        "{:?} never commanded",
        kind
    );
}

fn drive_to_monitor(bench: &mut ScriptedBench, telecommand: TelecommandKind, kind: MotionKind, id: McbCommandId) {
    bench.telecommand(telecommand);
    authorize(bench);
    await_motion_command(bench, kind);
    bench.mcb_ack(id, true);
    assert!(bench.run_until(5, |c| c.mcb().motion_ongoing()));
}

fn finish_motion(bench: &mut ScriptedBench, kind: MotionKind, id: McbCommandId) {
    await_motion_command(bench, kind);
    bench.mcb_ack(id, true);
    assert!(bench.run_until(5, |c| c.mcb().motion_ongoing()));
    bench.mcb_ascii(McbAsciiId::MotionFinished, "");
    assert!(bench.run_until(5, |c| !c.mcb().motion_ongoing()));
}

#[test]
fn test_manual_deploy_end_to_end() {
    let mut bench = manual_bench();
    bench.drain_outbound();

    drive_to_monitor(
        &mut bench,
        TelecommandKind::Deploy { length: 10.0 },
        MotionKind::ReelOut,
        McbCommandId::ReelOut,
    );
    assert_eq!(
        bench.mcb.sent(),
        vec![McbCommand::ReelOut {
            length: 10.0,
            velocity: 250.0
        }]
    );
    // reeling out takes the PU off the dock
    assert!(!bench.controller.config().pu_docked);
    assert!(!bench.discretes.snapshot().pu_power);

    bench.mcb_ascii(McbAsciiId::MotionFinished, "");
    bench.tick();
    assert_eq!(bench.controller.supervisor().get_stats().telemetry_sent, 1);

    bench.ack(AckKind::Telemetry, true);
    bench.tick();
    assert_eq!(manual_state(&bench.controller), ManualState::Idle);

    let outbound = bench.drain_outbound();
    assert!(reports(&outbound, Severity::Nominal)
        .iter()
        .any(|r| r == "Reeling out 10.0 revs at 250.0 rpm"));
    let tm = outbound.iter().find_map(|m| match m {
        Outbound::Telemetry(record) => Some(record.clone()),
        _ => None,
    });
    let tm = tm.expect("motion TM sent");
    assert_eq!(tm.kind, TelemetryKind::Motion);
    assert_eq!(tm.summary, "Finished commanded manual motion");
    assert!(!in_error(&bench.controller));
}

#[test]
fn test_motion_tm_nak_resends_once() {
    let mut bench = manual_bench();
    drive_to_monitor(
        &mut bench,
        TelecommandKind::Retract { length: 4.0 },
        MotionKind::ReelIn,
        McbCommandId::ReelIn,
    );
    bench.mcb_ascii(McbAsciiId::MotionFinished, "");
    bench.tick();

    bench.ack(AckKind::Telemetry, false);
    bench.tick();
    assert_eq!(bench.controller.supervisor().get_stats().telemetry_resent, 1);
    assert_eq!(manual_state(&bench.controller), ManualState::Idle);

    bench.run(120);
    assert_eq!(bench.controller.supervisor().get_stats().telemetry_resent, 1);
}

#[test]
fn test_ra_timeout_resends_exactly_once() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::Deploy { length: 10.0 });

    assert!(bench.run_until(5, |c| ra_sent(c) == 1));
    assert!(bench.run_until(70, |c| ra_sent(c) == 2));
    assert!(bench.run_until(70, |c| manual_state(c) == ManualState::Idle));

    let outbound = bench.drain_outbound();
    assert!(reports(&outbound, Severity::Warning).contains(&"Never received RA ACK".to_string()));

    bench.run(300);
    assert_eq!(ra_sent(&bench.controller), 2);
    assert_eq!(motion_commands(&bench), 0);
    assert!(!in_error(&bench.controller));
}

#[test]
fn test_ra_nak_spends_the_resend() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::Dock { length: 3.0 });

    assert!(bench.run_until(5, |c| ra_sent(c) == 1));
    bench.ack(AckKind::RequestAuthorization, false);
    assert!(bench.run_until(5, |c| ra_sent(c) == 2));
    bench.ack(AckKind::RequestAuthorization, false);
    assert!(bench.run_until(5, |c| manual_state(c) == ManualState::Idle));

    let outbound = bench.drain_outbound();
    assert!(reports(&outbound, Severity::Warning).contains(&"Cannot perform motion, RA NAK".to_string()));
    assert_eq!(motion_commands(&bench), 0);
}

#[test]
fn test_unconfirmed_motion_resends_once_then_errors() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::Deploy { length: 10.0 });
    authorize(&mut bench);
    await_motion_command(&mut bench, MotionKind::ReelOut);
    assert_eq!(motion_commands(&bench), 1);

    let mcb = bench.mcb.clone();
    assert!(bench.run_until(40, |_| mcb.sent_count() == 2));
    assert!(!in_error(&bench.controller));
    assert!(bench.run_until(40, in_error));

    bench.run(100);
    assert_eq!(motion_commands(&bench), 2);
    let outbound = bench.drain_outbound();
    assert!(reports(&outbound, Severity::Warning).contains(&"MCB never confirmed motion".to_string()));
}

#[test]
fn test_mcb_nak_spends_the_resend() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::Deploy { length: 10.0 });
    authorize(&mut bench);
    await_motion_command(&mut bench, MotionKind::ReelOut);

    bench.mcb_ack(McbCommandId::ReelOut, false);
    let mcb = bench.mcb.clone();
    assert!(bench.run_until(5, |_| mcb.sent_count() == 2));

    bench.mcb_ack(McbCommandId::ReelOut, false);
    assert!(bench.run_until(5, in_error));
    assert_eq!(motion_commands(&bench), 2);
}

#[test]
fn test_motion_while_ongoing_forces_flight_error() {
    let cases = [
        TelecommandKind::Deploy { length: 10.0 },
        TelecommandKind::Retract { length: 10.0 },
        TelecommandKind::Dock { length: 10.0 },
    ];

    for telecommand in cases {
        let mut bench = manual_bench();
        drive_to_monitor(
            &mut bench,
            TelecommandKind::Deploy { length: 50.0 },
            MotionKind::ReelOut,
            McbCommandId::ReelOut,
        );

        // stop tracking the motion without the MCB finishing it
        bench.telecommand(TelecommandKind::CancelMotion);
        assert!(bench.run_until(5, |c| manual_state(c) == ManualState::Idle));
        assert!(bench.controller.mcb().motion_ongoing());
        bench.drain_outbound();

        bench.telecommand(telecommand.clone());
        authorize(&mut bench);
        assert!(bench.run_until(5, in_error), "{:?} did not error", telecommand);

        let outbound = bench.drain_outbound();
        assert!(reports(&outbound, Severity::Warning).contains(&"Motion commanded while motion ongoing".to_string()));
        assert_eq!(motion_commands(&bench), 1, "{:?} reached the MCB", telecommand);
    }
}

#[test]
fn test_redock_while_ongoing_forces_flight_error() {
    let mut bench = manual_bench();
    drive_to_monitor(
        &mut bench,
        TelecommandKind::Deploy { length: 50.0 },
        MotionKind::ReelOut,
        McbCommandId::ReelOut,
    );
    bench.telecommand(TelecommandKind::CancelMotion);
    assert!(bench.run_until(5, |c| manual_state(c) == ManualState::Idle));

    bench.telecommand(TelecommandKind::RetryDock {
        out_revs: 5.0,
        in_revs: 10.0,
    });
    assert!(bench.run_until(5, in_error));
    assert_eq!(motion_commands(&bench), 1);
}

#[test]
fn test_fault_during_monitor() {
    let mut bench = manual_bench();
    drive_to_monitor(
        &mut bench,
        TelecommandKind::Deploy { length: 10.0 },
        MotionKind::ReelOut,
        McbCommandId::ReelOut,
    );
    bench.drain_outbound();

    bench.mcb_ascii(McbAsciiId::MotionFault, "8001,0,0,0,0,0,0,0");
    bench.tick();

    assert!(!bench.controller.mcb().motion_ongoing());
    assert!(in_error(&bench.controller));
    assert_eq!(bench.controller.engine().flight().error_count(), 1);
    assert_eq!(
        bench.controller.mcb().last_motion_fault(),
        Some([0x8001, 0, 0, 0, 0, 0, 0, 0])
    );

    bench.run(5);
    let critical = reports(&bench.drain_outbound(), Severity::Critical);
    assert_eq!(critical.len(), 1);
    assert!(critical[0].contains("8001"));
    assert_eq!(bench.controller.flight_state(), FlightState::ErrorLoop);
    assert_eq!(bench.controller.get_stats().device_faults, 1);
}

#[test]
fn test_mcb_error_frame_forces_flight_error() {
    let mut bench = manual_bench();
    bench.mcb_ascii(McbAsciiId::Error, "overcurrent");
    bench.tick();
    assert!(in_error(&bench.controller));

    let critical = reports(&bench.drain_outbound(), Severity::Critical);
    assert_eq!(critical, vec!["MCB error: overcurrent".to_string()]);
}

#[test]
fn test_mcb_error_during_monitor_ends_motion() {
    let mut bench = manual_bench();
    drive_to_monitor(
        &mut bench,
        TelecommandKind::Deploy { length: 10.0 },
        MotionKind::ReelOut,
        McbCommandId::ReelOut,
    );

    bench.mcb_ascii(McbAsciiId::Error, "stall");
    bench.tick();
    assert!(!bench.controller.mcb().motion_ongoing());
    assert!(in_error(&bench.controller));

    bench.telecommand(TelecommandKind::ExitError);
    assert!(bench.run_until(5, |c| c.flight_state() == FlightState::Manual));
    bench.drain_outbound();

    // the operator can move the reel again after the error
    bench.telecommand(TelecommandKind::Deploy { length: 10.0 });
    authorize(&mut bench);
    await_motion_command(&mut bench, MotionKind::ReelOut);
    assert_eq!(motion_commands(&bench), 2);
    assert!(!in_error(&bench.controller));
    assert!(!reports(&bench.drain_outbound(), Severity::Warning)
        .contains(&"Motion commanded while motion ongoing".to_string()));
}

#[test]
fn test_device_fault_survives_a_full_tick_of_frames() {
    let mut bench = manual_bench();
    for _ in 0..32 {
        bench.mcb.push(DeviceMessage::Binary {
            id: McbBinaryId::MotionTm,
            bytes: BinaryPayload::from_slice(&[0u8; 8]).unwrap(),
        });
    }
    bench.pu_ascii(PuAsciiId::Error, "heater");
    bench.tick();

    assert!(in_error(&bench.controller));
    assert_eq!(bench.controller.get_stats().device_faults, 1);
    assert_eq!(bench.controller.get_stats().protocol_faults, 32);
    let critical = reports(&bench.drain_outbound(), Severity::Critical);
    assert_eq!(critical, vec!["PU error: heater".to_string()]);
}

#[test]
fn test_exit_error_returns_to_manual() {
    let mut bench = manual_bench();
    bench.mcb_ascii(McbAsciiId::Error, "overcurrent");
    bench.run(2);
    assert_eq!(bench.controller.flight_state(), FlightState::ErrorLoop);
    // the landing puts the MCB in low power
    assert!(bench.mcb.sent().contains(&McbCommand::GoLowPower));

    bench.run(50);
    assert_eq!(bench.controller.flight_state(), FlightState::ErrorLoop);

    bench.telecommand(TelecommandKind::ExitError);
    assert!(bench.run_until(5, |c| c.flight_state() == FlightState::Manual));
}

#[test]
fn test_motion_timeout_cancels_motion() {
    let mut bench = manual_bench();
    // 10 revs at 250 rpm is 3 s, plus the 30 s motion timeout
    drive_to_monitor(
        &mut bench,
        TelecommandKind::Deploy { length: 10.0 },
        MotionKind::ReelOut,
        McbCommandId::ReelOut,
    );

    bench.run(30);
    assert!(!in_error(&bench.controller));
    assert!(bench.run_until(10, in_error));
    assert!(bench.mcb.sent().contains(&McbCommand::CancelMotion));
    assert!(reports(&bench.drain_outbound(), Severity::Warning)
        .contains(&"Motion timeout, cancelling motion".to_string()));
}

#[test]
fn test_cancel_motion_stops_manual_motion() {
    let mut bench = manual_bench();
    drive_to_monitor(
        &mut bench,
        TelecommandKind::Deploy { length: 10.0 },
        MotionKind::ReelOut,
        McbCommandId::ReelOut,
    );
    bench.drain_outbound();

    bench.telecommand(TelecommandKind::CancelMotion);
    bench.tick();
    assert_eq!(manual_state(&bench.controller), ManualState::Idle);
    assert!(!bench.controller.scheduler().is_pending(stratopib::ActionId::MotionTimeout));

    let outbound = bench.drain_outbound();
    assert!(reports(&outbound, Severity::Nominal).contains(&"Commanded motion stop".to_string()));
    assert!(!in_error(&bench.controller));
}

#[test]
fn test_check_pu_reports_status() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::GetPuStatus);
    let pu = bench.pu.clone();
    assert!(bench.run_until(5, |_| pu.sent().contains(&PuCommand::SendStatus)));

    bench.pu_ascii(PuAsciiId::Status, STATUS);
    bench.tick();
    assert_eq!(manual_state(&bench.controller), ManualState::Idle);
    assert!(bench.controller.config().pu_docked);

    let nominal = reports(&bench.drain_outbound(), Severity::Nominal);
    assert!(nominal.iter().any(|r| r.starts_with("PU status: 1234, 3.70")));
}

#[test]
fn test_check_pu_gives_up_after_one_resend() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::GetPuStatus);
    assert!(bench.run_until(80, |c| manual_state(c) == ManualState::CheckPu));
    assert!(bench.run_until(80, |c| manual_state(c) == ManualState::Idle));

    let requests = bench.pu.sent().iter().filter(|c| **c == PuCommand::SendStatus).count();
    assert_eq!(requests, 2);
    assert!(reports(&bench.drain_outbound(), Severity::Warning)
        .contains(&"PU not responding to status request".to_string()));
}

#[test]
fn test_tsen_request_forwards_record() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::RequestTsen);
    let pu = bench.pu.clone();
    assert!(bench.run_until(5, |_| pu.sent().contains(&PuCommand::SendTsenRecord)));

    bench.pu.push(DeviceMessage::Binary {
        id: PuBinaryId::TsenRecord,
        bytes: BinaryPayload::from_slice(&[7u8; 24]).unwrap(),
    });
    bench.tick();
    assert!(bench.pu.sent().contains(&PuCommand::RecordAck {
        record: PuBinaryId::TsenRecord,
        ok: true
    }));

    bench.ack(AckKind::Telemetry, true);
    bench.tick();
    assert_eq!(manual_state(&bench.controller), ManualState::Idle);

    let tm = bench
        .drain_outbound()
        .into_iter()
        .find_map(|m| match m {
            Outbound::Telemetry(record) => Some(record),
            _ => None,
        })
        .expect("TSEN TM sent");
    assert_eq!(tm.kind, TelemetryKind::Tsen);
    assert_eq!(tm.payload, vec![7u8; 24]);
}

#[test]
fn test_offload_until_no_more_records() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::OffloadProfileRecords);
    let pu = bench.pu.clone();

    for _ in 0..2 {
        let before = pu.sent().iter().filter(|c| **c == PuCommand::SendProfileRecord).count();
        assert!(bench.run_until(5, |_| {
            pu.sent().iter().filter(|c| **c == PuCommand::SendProfileRecord).count() > before
        }));
        bench.pu.push(DeviceMessage::Binary {
            id: PuBinaryId::ProfileRecord,
            bytes: BinaryPayload::from_slice(&[1u8; 128]).unwrap(),
        });
        bench.tick();
        bench.ack(AckKind::Telemetry, true);
        bench.tick();
    }

    assert!(bench.run_until(5, |_| {
        pu.sent().iter().filter(|c| **c == PuCommand::SendProfileRecord).count() == 3
    }));
    bench.pu_ascii(PuAsciiId::NoMoreRecords, "");
    bench.tick();
    assert_eq!(manual_state(&bench.controller), ManualState::Idle);
    assert_eq!(bench.controller.supervisor().get_stats().telemetry_sent, 2);
    assert!(reports(&bench.drain_outbound(), Severity::Nominal)
        .contains(&"PU has no more profile records (2 sent)".to_string()));
}

#[test]
fn test_short_profile_record_is_refused() {
    let mut bench = manual_bench();
    bench.pu.push(DeviceMessage::Binary {
        id: PuBinaryId::ProfileRecord,
        bytes: BinaryPayload::from_slice(&[1u8; 20]).unwrap(),
    });
    bench.tick();

    assert!(bench.pu.sent().contains(&PuCommand::RecordAck {
        record: PuBinaryId::ProfileRecord,
        ok: false
    }));
    assert_eq!(bench.controller.get_stats().protocol_faults, 1);
    assert!(!in_error(&bench.controller));
}

#[test]
fn test_manual_redock_marks_pu_docked() {
    let mut bench = manual_bench();
    bench.telecommand(TelecommandKind::RetryDock {
        out_revs: 5.0,
        in_revs: 10.0,
    });

    finish_motion(&mut bench, MotionKind::ReelOut, McbCommandId::ReelOut);
    finish_motion(&mut bench, MotionKind::InNoLatch, McbCommandId::InNoLatch);

    let pu = bench.pu.clone();
    assert!(bench.run_until(5, |_| pu.sent().contains(&PuCommand::SendStatus)));
    bench.pu_ascii(PuAsciiId::Status, STATUS);
    bench.tick();

    assert_eq!(manual_state(&bench.controller), ManualState::Idle);
    assert!(bench.mcb.sent().contains(&McbCommand::ZeroReel));
    assert!(bench.mcb.sent().contains(&McbCommand::InNoLatch {
        length: 10.0,
        velocity: 80.0
    }));
    assert!(bench.controller.config().pu_docked);
    assert!(bench.discretes.snapshot().pu_power);
}
