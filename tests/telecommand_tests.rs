use stratopib::config::PibConfig;
use stratopib::mode::FlightState;
use stratopib::protocol::{AckKind, McbAsciiId, McbCommand, McbCommandId, Outbound, Severity, TelecommandKind};
use stratopib::sim::ScriptedBench;

const EPOCH: u32 = 1_700_000_000;

fn tc_ack(outbound: &[Outbound], id: u32) -> Option<bool> {
    outbound.iter().find_map(|message| match message {
        Outbound::TelecommandAck { id: acked, ack } if *acked == id => Some(*ack),
        _ => None,
    })
}

fn warnings(outbound: &[Outbound]) -> Vec<String> {
    outbound
        .iter()
        .filter_map(|message| match message {
            Outbound::Report {
                severity: Severity::Warning,
                message,
            } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Send one telecommand and return its ACK value plus everything sent upstream.
fn command(bench: &mut ScriptedBench, kind: TelecommandKind) -> (bool, Vec<Outbound>) {
    bench.drain_outbound();
    let id = bench.telecommand(kind);
    let outbound = bench.drain_outbound();
    let ack = tc_ack(&outbound, id).expect("every telecommand is answered");
    (ack, outbound)
}

fn start_manual_motion(bench: &mut ScriptedBench) {
    bench.telecommand(TelecommandKind::Deploy { length: 10.0 });
    assert!(bench.run_until(5, |c| c.supervisor().get_stats().ra_sent == 1));
    bench.ack(AckKind::RequestAuthorization, true);
    assert!(bench.run_until(5, |c| c.mcb().motion().length_revs == 10.0));
    bench.mcb_ack(McbCommandId::ReelOut, true);
    assert!(bench.run_until(5, |c| c.mcb().motion_ongoing()));
}

#[test]
fn test_every_telecommand_is_answered_once() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.drain_outbound();

    let first = bench.telecommand(TelecommandKind::SetDwellTime { seconds: 600 });
    let second = bench.telecommand(TelecommandKind::Deploy { length: -1.0 });
    let outbound = bench.drain_outbound();

    let acks: Vec<_> = outbound
        .iter()
        .filter(|m| matches!(m, Outbound::TelecommandAck { .. }))
        .collect();
    assert_eq!(acks.len(), 2);
    assert_eq!(tc_ack(&outbound, first), Some(true));
    assert_eq!(tc_ack(&outbound, second), Some(false));

    let stats = bench.controller.dispatch_stats();
    assert_eq!((stats.received, stats.accepted, stats.rejected), (2, 1, 1));
    let supervisor = bench.controller.supervisor().get_stats();
    assert_eq!(supervisor.telecommands_acked, 1);
    assert_eq!(supervisor.telecommands_naked, 1);
}

#[test]
fn test_config_write_is_visible_immediately() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    let (ack, outbound) = command(&mut bench, TelecommandKind::SetDwellTime { seconds: 600 });

    assert!(ack);
    assert_eq!(bench.controller.config().dwell_time, 600);
    assert!(outbound.iter().any(|m| matches!(
        m,
        Outbound::Report { severity: Severity::Nominal, message } if message == "Set DwellTime: 600"
    )));
}

#[test]
fn test_invalid_config_value_is_refused() {
    let mut bench = ScriptedBench::new(PibConfig::default());

    let (ack, outbound) = command(&mut bench, TelecommandKind::SetNumProfiles { count: 0 });
    assert!(!ack);
    assert_eq!(bench.controller.config().num_profiles, 3);
    assert!(warnings(&outbound)[0].starts_with("Error setting NumProfiles"));

    let (ack, _) = command(&mut bench, TelecommandKind::DockVelocity { velocity: 0.0 });
    assert!(!ack);
    assert_eq!(bench.controller.config().dock_velocity, 80.0);

    let (ack, _) = command(&mut bench, TelecommandKind::SetSzaMinimum { degrees: 200.0 });
    assert!(!ack);
}

#[test]
fn test_redock_parameters_set_together() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    let (ack, _) = command(
        &mut bench,
        TelecommandKind::SetRedockParameters {
            out_revs: 7.5,
            in_revs: 12.0,
            attempts: 4,
        },
    );

    assert!(ack);
    let config = bench.controller.config();
    assert_eq!(config.redock_out, 7.5);
    assert_eq!(config.redock_in, 12.0);
    assert_eq!(config.num_redock, 4);
}

#[test]
fn test_reel_lengths_stay_consistent() {
    let mut bench = ScriptedBench::new(PibConfig::default());

    let refused = [
        TelecommandKind::SetProfileSize { revs: 0.0 },
        TelecommandKind::SetProfileSize { revs: 100.0 },
        TelecommandKind::SetDockAmount { revs: 9000.0 },
    ];
    for kind in refused {
        let (ack, outbound) = command(&mut bench, kind.clone());
        assert!(!ack, "{:?} accepted", kind);
        assert!(warnings(&outbound)[0].starts_with("Error setting"));
    }

    let config = bench.controller.config();
    assert_eq!(config.profile_size, 8000.0);
    assert_eq!(config.dock_amount, 200.0);

    // shrinking the dock first makes room for a short profile
    assert!(command(&mut bench, TelecommandKind::SetDockAmount { revs: 20.0 }).0);
    assert!(command(&mut bench, TelecommandKind::SetProfileSize { revs: 100.0 }).0);
}

#[test]
fn test_redock_parameters_all_or_nothing() {
    let mut bench = ScriptedBench::new(PibConfig::default());

    for (out_revs, in_revs) in [(0.0, 12.0), (7.5, 0.0)] {
        let (ack, outbound) = command(
            &mut bench,
            TelecommandKind::SetRedockParameters {
                out_revs,
                in_revs,
                attempts: 4,
            },
        );
        assert!(!ack);
        assert!(warnings(&outbound)[0].starts_with("Error setting redock parameters"));
    }

    let config = bench.controller.config();
    assert_eq!((config.redock_out, config.redock_in, config.num_redock), (5.0, 10.0, 3));
}

#[test]
fn test_trigger_selection() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    assert!(command(&mut bench, TelecommandKind::UseSzaTrigger).0);
    assert!(bench.controller.config().sza_trigger);
    assert!(command(&mut bench, TelecommandKind::UseTimeTrigger).0);
    assert!(!bench.controller.config().sza_trigger);
}

#[test]
fn test_time_trigger_in_the_past_is_refused() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, false);
    let now = EPOCH + 3;

    let (ack, outbound) = command(&mut bench, TelecommandKind::SetTimeTrigger { epoch: now - 10 });
    assert!(!ack);
    assert!(warnings(&outbound)[0].contains("is in the past"));
    assert_eq!(bench.controller.config().time_trigger, u32::MAX);

    let (ack, _) = command(&mut bench, TelecommandKind::SetTimeTrigger { epoch: now + 100 });
    assert!(ack);
    assert_eq!(bench.controller.config().time_trigger, now + 100);
}

#[test]
fn test_time_trigger_accepted_without_time_reference() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    let (ack, _) = command(&mut bench, TelecommandKind::SetTimeTrigger { epoch: 5 });
    assert!(ack);
    assert_eq!(bench.controller.config().time_trigger, 5);
}

#[test]
fn test_manual_only_commands_refused_in_autonomous() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, true);

    let refused = [
        TelecommandKind::Deploy { length: 10.0 },
        TelecommandKind::Retract { length: 10.0 },
        TelecommandKind::Dock { length: 10.0 },
        TelecommandKind::RetryDock {
            out_revs: 5.0,
            in_revs: 10.0,
        },
        TelecommandKind::GetPuStatus,
        TelecommandKind::OffloadProfileRecords,
    ];
    for kind in refused {
        let (ack, outbound) = command(&mut bench, kind.clone());
        assert!(!ack, "{:?} accepted in autonomous", kind);
        assert!(warnings(&outbound)[0].ends_with("refused in autonomous mode"));
    }

    // TSEN requests are shared by both branches
    assert!(command(&mut bench, TelecommandKind::RequestTsen).0);

    bench.run(5);
    assert_eq!(bench.controller.supervisor().get_stats().ra_sent, 0);
    assert_eq!(bench.mcb.sent_count(), 0);
}

#[test]
fn test_invalid_motion_length_is_refused() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, false);

    for length in [0.0, -4.0, f32::NAN, f32::INFINITY] {
        let (ack, _) = command(&mut bench, TelecommandKind::Deploy { length });
        assert!(!ack, "length {} accepted", length);
    }
    bench.run(5);
    assert_eq!(bench.controller.supervisor().get_stats().ra_sent, 0);
}

#[test]
fn test_zero_reel_refused_during_motion() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, false);

    let (ack, _) = command(&mut bench, TelecommandKind::ZeroReel);
    assert!(ack);
    assert_eq!(bench.mcb.take_sent(), vec![McbCommand::ZeroReel]);

    start_manual_motion(&mut bench);
    let (ack, outbound) = command(&mut bench, TelecommandKind::ZeroReel);
    assert!(!ack);
    assert_eq!(warnings(&outbound), vec!["Cannot zero reel during motion".to_string()]);
    assert!(!bench.mcb.sent().contains(&McbCommand::ZeroReel));
}

#[test]
fn test_branch_switch_refused_during_motion() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, false);
    start_manual_motion(&mut bench);

    let (ack, _) = command(&mut bench, TelecommandKind::SetAutonomous);
    assert!(!ack);
    assert!(!bench.controller.engine().flight().is_autonomous());

    bench.mcb_ascii(McbAsciiId::MotionFinished, "");
    bench.tick();
    let (ack, _) = command(&mut bench, TelecommandKind::SetAutonomous);
    assert!(ack);
    assert!(bench.controller.engine().flight().is_autonomous());
}

#[test]
fn test_branch_switch_restarts_flight() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, true);
    assert_eq!(bench.controller.flight_state(), FlightState::Autonomous);

    assert!(command(&mut bench, TelecommandKind::SetManual).0);
    assert!(bench.run_until(5, |c| c.flight_state() == FlightState::Manual));
    // autonomous timers do not survive the switch
    assert!(!bench.controller.scheduler().is_pending(stratopib::ActionId::RequestTsen));
}

#[test]
fn test_acceleration_goes_straight_to_mcb() {
    let mut bench = ScriptedBench::new(PibConfig::default());

    assert!(command(&mut bench, TelecommandKind::DeployAcceleration { acceleration: 5.0 }).0);
    assert!(command(&mut bench, TelecommandKind::RetractAcceleration { acceleration: 4.0 }).0);
    assert!(command(&mut bench, TelecommandKind::DockAcceleration { acceleration: 2.0 }).0);
    assert!(!command(&mut bench, TelecommandKind::DockAcceleration { acceleration: -1.0 }).0);

    assert_eq!(
        bench.mcb.sent(),
        vec![
            McbCommand::SetOutAcceleration(5.0),
            McbCommand::SetInAcceleration(4.0),
            McbCommand::SetDockAcceleration(2.0),
        ]
    );
}

#[test]
fn test_refused_send_naks_device_command() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.mcb.set_link_up(false);

    assert!(!command(&mut bench, TelecommandKind::ZeroReel).0);
    assert!(!command(&mut bench, TelecommandKind::CancelMotion).0);
    assert_eq!(bench.controller.mcb().get_stats().send_failures, 2);
}

#[test]
fn test_pu_power_discretes() {
    let mut bench = ScriptedBench::new(PibConfig::default());

    assert!(command(&mut bench, TelecommandKind::PuPowerOn).0);
    assert!(bench.discretes.snapshot().pu_power);
    assert!(command(&mut bench, TelecommandKind::PuPowerOff).0);

    let state = bench.discretes.snapshot();
    assert!(!state.pu_power);
    assert_eq!(state.pu_power_edges, 2);
}

#[test]
fn test_exit_error_outside_error_loop_ages_out() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, false);

    assert!(command(&mut bench, TelecommandKind::ExitError).0);
    bench.run(3);
    assert!(!bench.controller.actions().is_raised(stratopib::ActionId::ExitError));

    // a later fault still lands in the error loop
    bench.mcb_ascii(McbAsciiId::Error, "stall");
    bench.run(3);
    assert_eq!(bench.controller.flight_state(), FlightState::ErrorLoop);
}
