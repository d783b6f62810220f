use stratopib::action::ActionId;
use stratopib::config::PibConfig;
use stratopib::controller::PibController;
use stratopib::mode::{AutonomousState, FlightState};
use stratopib::protocol::{
    AckKind, BinaryPayload, DeviceMessage, McbAsciiId, McbCommand, McbCommandId, Outbound, PuAsciiId, PuBinaryId,
    PuCommand, PuCommandId, Severity, SupervisorMessage,
};
use stratopib::sequence::ProfileState;
use stratopib::session::MotionKind;
use stratopib::sim::{PuScript, ScriptedBench};

const EPOCH: u32 = 1_700_000_000;
// 800 s before the next quarter hour, so the TSEN timer stays out of the way
const QUIET_EPOCH: u32 = 1_000_000;
const STATUS: &str = "1234, 3.70, 0.25, -10.5, -12.0, 1";

fn autonomous_state(controller: &PibController) -> AutonomousState {
    controller.engine().flight().autonomous().state()
}

fn profile_state(controller: &PibController) -> ProfileState {
    controller.engine().flight().autonomous().profile().state()
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

fn status_request_count(pu: &PuScript) -> usize {
    pu.sent().iter().filter(|c| **c == PuCommand::SendStatus).count()
}

fn warmup_count(pu: &PuScript) -> usize {
    pu.sent().iter().filter(|c| matches!(c, PuCommand::WarmUp(_))).count()
}

/// Tick until the PU gets a fresh status request.
fn await_status_request(bench: &mut ScriptedBench) {
    let pu = bench.pu.clone();
    let before = status_request_count(&pu);
    assert!(bench.run_until(5, |_| status_request_count(&pu) > before));
}

fn short_profile_config() -> PibConfig {
    PibConfig {
        num_profiles: 1,
        puwarmup_time: 5,
        preprofile_time: 5,
        dwell_time: 5,
        time_trigger: QUIET_EPOCH + 2,
        ..PibConfig::default()
    }
}

/// Run one reel motion of the given kind to completion.
fn complete_motion(bench: &mut ScriptedBench, kind: MotionKind, id: McbCommandId) {
    assert!(
        bench.run_until(100, |c| c.mcb().motion().kind == kind && !c.mcb().motion_ongoing()),
        "{:?} never commanded",
        kind
    );
    bench.mcb_ack(id, true);
    assert!(bench.run_until(5, |c| c.mcb().motion_ongoing()));
    bench.mcb_ascii(McbAsciiId::MotionFinished, "");
    assert!(bench.run_until(5, |c| !c.mcb().motion_ongoing()));
}

/// Drive a profile from the trigger through the dock motion.
fn profile_to_dock(bench: &mut ScriptedBench) {
    assert!(bench.run_until(20, |c| c.supervisor().get_stats().ra_sent == 1));
    bench.ack(AckKind::RequestAuthorization, true);

    let pu = bench.pu.clone();
    assert!(bench.run_until(5, |_| pu.sent().iter().any(|c| matches!(c, PuCommand::WarmUp(_)))));
    bench.pu_ack(PuCommandId::WarmUp, true);

    assert!(bench.run_until(15, |_| pu.sent().contains(&PuCommand::SendTsenRecord)));
    bench.pu.push(DeviceMessage::Binary {
        id: PuBinaryId::TsenRecord,
        bytes: BinaryPayload::from_slice(&[3u8; 24]).unwrap(),
    });
    assert!(bench.run_until(5, |c| c.supervisor().get_stats().telemetry_sent == 1));
    bench.ack(AckKind::Telemetry, true);

    assert!(bench.run_until(5, |_| pu.sent().iter().any(|c| matches!(c, PuCommand::Profile(_)))));
    bench.pu_ack(PuCommandId::Profile, true);

    complete_motion(bench, MotionKind::ReelOut, McbCommandId::ReelOut);
    complete_motion(bench, MotionKind::ReelIn, McbCommandId::ReelIn);
    complete_motion(bench, MotionKind::Dock, McbCommandId::Dock);
    assert_eq!(profile_state(&bench.controller), ProfileState::VerifyDock);
}

fn redock_motions(bench: &mut ScriptedBench) {
    complete_motion(bench, MotionKind::ReelOut, McbCommandId::ReelOut);
    complete_motion(bench, MotionKind::InNoLatch, McbCommandId::InNoLatch);
}

#[test]
fn test_time_trigger_schedules_profiles() {
    let config = PibConfig {
        num_profiles: 2,
        profile_period: 300,
        time_trigger: EPOCH + 2,
        ..PibConfig::default()
    };
    let mut bench = ScriptedBench::new(config);
    bench.enter_flight(EPOCH, true);

    assert!(bench.run_until(10, |c| c.engine().flight().autonomous().trigger_ms().is_some()));
    let trigger_ms = bench.controller.engine().flight().autonomous().trigger_ms().unwrap();
    assert_eq!(
        bench.controller.scheduler().deadline(ActionId::BeginProfile),
        Some(trigger_ms + 5_000)
    );
    // the trigger is one-shot
    assert_eq!(bench.controller.config().time_trigger, u32::MAX);
    assert_eq!(autonomous_state(&bench.controller), AutonomousState::ProfileWait);

    assert!(bench.run_until(10, |c| c.profiles_remaining() == 1));
    assert_eq!(
        bench.controller.scheduler().deadline(ActionId::BeginProfile),
        Some(trigger_ms + 5_000 + 300_000)
    );

    // nobody answers the RA, so the first profile gives up and waits
    assert!(bench.run_until(200, |c| autonomous_state(c) == AutonomousState::ProfileWait));
    assert_eq!(bench.controller.supervisor().get_stats().ra_sent, 2);
    assert!(!bench.controller.engine().flight().in_error());

    assert!(bench.run_until(400, |c| c.profiles_remaining() == 0));
    assert!(!bench.controller.scheduler().is_pending(ActionId::BeginProfile));
    assert!(bench.run_until(200, |c| c.supervisor().get_stats().ra_sent == 4));
}

#[test]
fn test_two_profiles_two_hours_apart() {
    let config = PibConfig {
        num_profiles: 2,
        profile_period: 7200,
        time_trigger: EPOCH + 2,
        ..PibConfig::default()
    };
    let mut bench = ScriptedBench::new(config);
    bench.enter_flight(EPOCH, true);
    let trigger_ms = bench
        .controller
        .engine()
        .flight()
        .autonomous()
        .trigger_ms()
        .expect("trigger fired");

    let mut firings = Vec::new();
    let mut remaining = vec![bench.controller.profiles_remaining()];
    while bench.now_ms < trigger_ms + 7_300_000 {
        bench.tick();
        // raised at the end of the tick, consumed by the next mode step
        if bench.controller.actions().is_raised(ActionId::BeginProfile) {
            firings.push(bench.now_ms - trigger_ms);
        }
        let now_remaining = bench.controller.profiles_remaining();
        if remaining.last() != Some(&now_remaining) {
            remaining.push(now_remaining);
        }
    }

    assert_eq!(firings, vec![5_000, 7_205_000]);
    assert_eq!(remaining, vec![2, 1, 0]);
    assert!(!bench.controller.engine().flight().in_error());
}

#[test]
fn test_no_trigger_without_time_trigger() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, true);
    bench.run(50);

    assert_eq!(autonomous_state(&bench.controller), AutonomousState::Idle);
    assert!(bench.controller.engine().flight().autonomous().trigger_ms().is_none());
    assert!(!bench.controller.scheduler().is_pending(ActionId::BeginProfile));
}

#[test]
fn test_periodic_tsen_request() {
    let mut bench = ScriptedBench::new(PibConfig::default());
    bench.enter_flight(EPOCH, true);
    // 1_700_000_000 is 800 s past a quarter hour
    let deadline = bench.controller.scheduler().deadline(ActionId::RequestTsen).unwrap();
    assert!(deadline <= 100_000 + 3_000);

    let pu = bench.pu.clone();
    assert!(bench.run_until(110, |_| pu.sent().contains(&PuCommand::SendTsenRecord)));
    assert_eq!(autonomous_state(&bench.controller), AutonomousState::Tsen);
    // the next quarter hour is already armed
    let next = bench.controller.scheduler().deadline(ActionId::RequestTsen).unwrap();
    assert!(next > deadline + 800_000);

    bench.pu.push(DeviceMessage::Binary {
        id: PuBinaryId::TsenRecord,
        bytes: BinaryPayload::from_slice(&[9u8; 24]).unwrap(),
    });
    assert!(bench.run_until(5, |c| c.supervisor().get_stats().telemetry_sent == 1));
    bench.ack(AckKind::Telemetry, true);
    assert!(bench.run_until(5, |c| autonomous_state(c) == AutonomousState::Idle));
}

#[test]
fn test_profile_completes_with_first_dock_check() {
    let mut bench = ScriptedBench::new(short_profile_config());
    bench.enter_flight(QUIET_EPOCH, true);
    profile_to_dock(&mut bench);

    await_status_request(&mut bench);
    bench.pu_ascii(PuAsciiId::Status, STATUS);
    let mcb = bench.mcb.clone();
    assert!(bench.run_until(5, |_| mcb.sent().contains(&McbCommand::GoLowPower)));
    bench.mcb_ack(McbCommandId::GoLowPower, true);
    assert!(bench.run_until(5, |c| autonomous_state(c) == AutonomousState::ProfileWait));

    let outbound = bench.drain_outbound();
    assert!(reports(&outbound, Severity::Nominal).contains(&"Profile 1 complete".to_string()));
    assert!(bench.mcb.sent().contains(&McbCommand::ZeroReel));
    assert!(bench.controller.config().pu_docked);
    assert!(bench.discretes.snapshot().pu_power);
    assert_eq!(bench.controller.engine().flight().autonomous().profile().completed(), 1);

    assert!(bench.run_until(5, |c| autonomous_state(c) == AutonomousState::Idle));
}

#[test]
fn test_motion_tm_sent_for_each_profile_leg() {
    let mut bench = ScriptedBench::new(short_profile_config());
    bench.enter_flight(QUIET_EPOCH, true);
    profile_to_dock(&mut bench);

    let summaries: Vec<String> = bench
        .drain_outbound()
        .into_iter()
        .filter_map(|m| match m {
            Outbound::Telemetry(record) => Some(record.summary),
            _ => None,
        })
        .collect();
    assert_eq!(
        summaries,
        vec![
            "PU TSEN: 0, 0.00, 0.00, 0.00, 0.00, 0".to_string(),
            "Finished autonomous reel out".to_string(),
            "Finished autonomous reel in".to_string(),
            "Finished autonomous dock".to_string(),
        ]
    );
}

#[test]
fn test_redock_recovers_after_two_failures() {
    let mut bench = ScriptedBench::new(short_profile_config());
    bench.enter_flight(QUIET_EPOCH, true);
    profile_to_dock(&mut bench);

    // first check goes unanswered
    assert!(bench.run_until(100, |c| c.redock_count() == 1));
    assert_eq!(profile_state(&bench.controller), ProfileState::Redock);
    assert_eq!(status_request_count(&bench.pu), 2);
    redock_motions(&mut bench);

    assert!(bench.run_until(100, |c| c.redock_count() == 2));
    redock_motions(&mut bench);

    await_status_request(&mut bench);
    bench.pu_ascii(PuAsciiId::Status, STATUS);
    bench.tick();
    assert_eq!(bench.controller.redock_count(), 0);
    assert_eq!(profile_state(&bench.controller), ProfileState::ConfirmMcbLowPower);

    bench.mcb_ack(McbCommandId::GoLowPower, true);
    assert!(bench.run_until(5, |c| autonomous_state(c) != AutonomousState::Profile));

    let outbound = bench.drain_outbound();
    let warnings = reports(&outbound, Severity::Warning);
    assert!(warnings.contains(&"Dock not confirmed, re-dock attempt 1".to_string()));
    assert!(warnings.contains(&"Dock not confirmed, re-dock attempt 2".to_string()));
    assert!(reports(&outbound, Severity::Nominal).contains(&"Profile 1 complete".to_string()));
    assert!(!bench.controller.engine().flight().in_error());
    assert!(bench.mcb.sent().contains(&McbCommand::InNoLatch {
        length: 10.0,
        velocity: 80.0
    }));
}

#[test]
fn test_redock_exhaustion_forces_flight_error() {
    let mut bench = ScriptedBench::new(short_profile_config());
    bench.enter_flight(QUIET_EPOCH, true);
    profile_to_dock(&mut bench);

    for attempt in 1..=2u8 {
        assert!(bench.run_until(100, |c| c.redock_count() == attempt));
        redock_motions(&mut bench);
    }

    assert!(bench.run_until(100, |c| c.engine().flight().in_error()));
    let critical = reports(&bench.drain_outbound(), Severity::Critical);
    assert_eq!(critical, vec!["Dock not confirmed after 3 attempts".to_string()]);

    bench.run(2);
    assert_eq!(bench.controller.flight_state(), FlightState::ErrorLoop);
    assert_eq!(autonomous_state(&bench.controller), AutonomousState::Idle);
    assert!(!bench.controller.scheduler().is_pending(ActionId::BeginProfile));
    assert!(!bench.controller.scheduler().is_pending(ActionId::RequestTsen));
}

#[test]
fn test_pu_warmup_nak_spends_the_resend() {
    let mut bench = ScriptedBench::new(short_profile_config());
    bench.enter_flight(QUIET_EPOCH, true);

    assert!(bench.run_until(20, |c| c.supervisor().get_stats().ra_sent == 1));
    bench.ack(AckKind::RequestAuthorization, true);

    let pu = bench.pu.clone();
    assert!(bench.run_until(5, |_| warmup_count(&pu) == 1));
    bench.pu_ack(PuCommandId::WarmUp, false);
    assert!(bench.run_until(5, |_| warmup_count(&pu) == 2));
    bench.pu_ack(PuCommandId::WarmUp, false);
    assert!(bench.run_until(5, |c| autonomous_state(c) == AutonomousState::ProfileWait));

    let warnings = reports(&bench.drain_outbound(), Severity::Warning);
    assert!(warnings.contains(&"PU not responding to warmup command".to_string()));
    assert_eq!(warmup_count(&bench.pu), 2);
    assert_eq!(bench.mcb.sent_count(), 0);
}

#[test]
fn test_sza_trigger_arms_once_per_night() {
    let config = PibConfig {
        sza_trigger: true,
        num_profiles: 1,
        ..PibConfig::default()
    };
    let mut bench = ScriptedBench::new(config);
    bench.enter_flight(QUIET_EPOCH, true);

    let gps = |bench: &mut ScriptedBench, sza: f32| {
        let epoch = QUIET_EPOCH + (bench.now_ms / 1000) as u32;
        bench.send(SupervisorMessage::Gps { epoch, sza });
        bench.tick();
    };

    bench.run(5);
    assert!(bench.controller.engine().flight().autonomous().trigger_ms().is_none());

    gps(&mut bench, 110.0);
    let first = bench.controller.engine().flight().autonomous().trigger_ms();
    assert!(first.is_some());
    assert!(!bench.controller.engine().flight().autonomous().sza_armed());

    // the unanswered profile runs out, and the sun is still down
    assert!(bench.run_until(300, |c| autonomous_state(c) == AutonomousState::Idle
        && c.profiles_remaining() == 0
        && c.supervisor().get_stats().ra_sent == 2));
    gps(&mut bench, 112.0);
    bench.run(5);
    assert_eq!(bench.controller.engine().flight().autonomous().trigger_ms(), first);

    // daylight re-arms, the next night fires again
    gps(&mut bench, 60.0);
    assert!(bench.controller.engine().flight().autonomous().sza_armed());
    gps(&mut bench, 109.0);
    let second = bench.controller.engine().flight().autonomous().trigger_ms();
    assert!(second > first);
}
