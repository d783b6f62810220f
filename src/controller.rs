use serde::{Deserialize, Serialize};

use crate::action::ActionRegistry;
use crate::config::{ConfigField, ConfigValue, PibConfig, Settings};
use crate::context::Context;
use crate::hardware::Discretes;
use crate::mode::{FlightState, Mode, ModeEngine};
use crate::protocol::{Outbound, Severity, SupervisorMessage};
use crate::scheduler::ActionScheduler;
use crate::session::{McbSession, PuSession, SessionEvent, SessionEvents};
use crate::supervisor::SupervisorLink;
use crate::telecommand::{DispatchStats, TelecommandDispatcher};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ControllerStats {
    pub ticks: u64,
    pub last_tick_ms: u64,
    pub device_faults: u32,
    pub protocol_faults: u32,
    pub supervisor_messages: u32,
}

/// Snapshot of the controller for displays and the ground link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub mode: Mode,
    pub substate: alloc::string::String,
    pub autonomous: bool,
    pub motion_ongoing: bool,
    pub reel_position: Option<f32>,
    pub profiles_remaining: u8,
    pub redock_count: u8,
    pub pu_docked: bool,
    pub epoch: Option<u32>,
    pub scheduled_actions: usize,
}

/// The flight core: owns every component and runs the control-loop tick.
///
/// One tick drains the MCB then the PU link, runs one mode step, sweeps
/// stale flags and finally advances the scheduler, so a timer that fires
/// is visible to the next two mode steps.
pub struct PibController {
    actions: ActionRegistry,
    scheduler: ActionScheduler,
    mcb: McbSession,
    pu: PuSession,
    supervisor: SupervisorLink,
    settings: Box<dyn Settings + Send>,
    discretes: Box<dyn Discretes + Send>,
    engine: ModeEngine,
    dispatcher: TelecommandDispatcher,
    stats: ControllerStats,
}

impl core::fmt::Debug for PibController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PibController")
            .field("mode", &self.engine.current())
            .field("mcb", &self.mcb)
            .field("pu", &self.pu)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl PibController {
    pub fn new(
        mcb: McbSession,
        pu: PuSession,
        settings: Box<dyn Settings + Send>,
        discretes: Box<dyn Discretes + Send>,
    ) -> Self {
        Self {
            actions: ActionRegistry::new(),
            scheduler: ActionScheduler::new(),
            mcb,
            pu,
            supervisor: SupervisorLink::new(),
            settings,
            discretes,
            engine: ModeEngine::new(Mode::Standby),
            dispatcher: TelecommandDispatcher::new(),
            stats: ControllerStats::default(),
        }
    }

    /// `config_valid` is `false` when the settings store was reset to defaults.
    pub fn start(&mut self, now_ms: u64, config_valid: bool) {
        self.scheduler.clear_all_scheduled();
        self.actions.clear_all();
        self.scheduler.set_time(now_ms);
        if !config_valid {
            self.supervisor
                .report(Severity::Warning, "Settings store invalid, reset to defaults");
        }
        self.supervisor
            .report(Severity::Nominal, "PIB flight core started");
    }

    pub fn handle_supervisor_message(&mut self, message: SupervisorMessage, now_ms: u64) {
        self.stats.supervisor_messages += 1;
        match message {
            SupervisorMessage::SetMode { mode } => self.engine.request_mode(mode),
            SupervisorMessage::ShutdownWarning => self.engine.shutdown_warning(),
            SupervisorMessage::Ack { kind, ack } => self.supervisor.handle_ack(kind, ack),
            SupervisorMessage::Gps { epoch, sza } => self.supervisor.set_gps(epoch, sza, now_ms),
            SupervisorMessage::Telecommand(telecommand) => {
                let Self {
                    actions,
                    scheduler,
                    mcb,
                    pu,
                    supervisor,
                    settings,
                    discretes,
                    engine,
                    dispatcher,
                    ..
                } = self;
                let mut ctx = Context {
                    now_ms,
                    actions,
                    scheduler,
                    mcb,
                    pu,
                    supervisor,
                    settings: &mut **settings,
                    discretes: &mut **discretes,
                };
                dispatcher.dispatch(&telecommand, engine, &mut ctx);
            }
        }
    }

    pub fn tick(&mut self, now_ms: u64) {
        let Self {
            actions,
            scheduler,
            mcb,
            pu,
            supervisor,
            settings,
            discretes,
            engine,
            stats,
            ..
        } = self;

        stats.ticks += 1;
        stats.last_tick_ms = now_ms;
        scheduler.set_time(now_ms);

        let mut events = SessionEvents::new();
        let epoch = supervisor.epoch(now_ms).unwrap_or(0);
        mcb.poll(now_ms, epoch, &mut events);
        pu.poll(&mut events);

        let mut ctx = Context {
            now_ms,
            actions,
            scheduler,
            mcb,
            pu,
            supervisor,
            settings: &mut **settings,
            discretes: &mut **discretes,
        };

        for event in events {
            handle_event(event, engine, &mut ctx, stats);
        }

        engine.step(&mut ctx);

        ctx.actions.sweep();
        ctx.scheduler.tick(now_ms, ctx.actions);
    }

    pub fn pop_outbound(&mut self) -> Option<Outbound> {
        self.supervisor.pop_outbound()
    }

    pub fn mode(&self) -> Mode {
        self.engine.current()
    }

    pub fn flight_state(&self) -> FlightState {
        self.engine.flight().state()
    }

    pub fn engine(&self) -> &ModeEngine {
        &self.engine
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn scheduler(&self) -> &ActionScheduler {
        &self.scheduler
    }

    pub fn mcb(&self) -> &McbSession {
        &self.mcb
    }

    pub fn pu(&self) -> &PuSession {
        &self.pu
    }

    pub fn supervisor(&self) -> &SupervisorLink {
        &self.supervisor
    }

    pub fn config(&self) -> PibConfig {
        self.settings.snapshot()
    }

    pub fn profiles_remaining(&self) -> u8 {
        self.engine.flight().autonomous().profiles_remaining()
    }

    pub fn redock_count(&self) -> u8 {
        self.engine.flight().autonomous().profile().redock_count()
    }

    pub fn dispatch_stats(&self) -> &DispatchStats {
        self.dispatcher.get_stats()
    }

    pub fn get_stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn status(&self) -> ControllerStatus {
        let config = self.settings.snapshot();
        ControllerStatus {
            mode: self.engine.current(),
            substate: self.engine.substate(),
            autonomous: self.engine.flight().is_autonomous(),
            motion_ongoing: self.mcb.motion_ongoing(),
            reel_position: self.mcb.reel_position(),
            profiles_remaining: self.profiles_remaining(),
            redock_count: self.redock_count(),
            pu_docked: config.pu_docked,
            epoch: self.supervisor.epoch(self.stats.last_tick_ms),
            scheduled_actions: self.scheduler.get_scheduled_actions().len(),
        }
    }
}

fn handle_event(event: SessionEvent, engine: &mut ModeEngine, ctx: &mut Context<'_>, stats: &mut ControllerStats) {
    match event {
        SessionEvent::DeviceFault { device, detail } => {
            stats.device_faults += 1;
            ctx.report(Severity::Critical, detail.as_str());
            if !engine.force_error() {
                tracing::debug!("{} fault outside flight, no error path", device);
            }
        }
        SessionEvent::ProtocolFault { device, detail } => {
            stats.protocol_faults += 1;
            tracing::debug!("{} protocol fault", device);
            ctx.report(Severity::Warning, detail.as_str());
        }
        SessionEvent::PuStatus(_) => {
            if !ctx.config().pu_docked {
                ctx.write_setting(ConfigField::PuDocked, ConfigValue::Bool(true));
            }
        }
        SessionEvent::DockDetected => tracing::info!("PU dock detected by MCB"),
        other => tracing::trace!("Session event {:?}", other),
    }
}
