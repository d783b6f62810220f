//! # StratoPIB flight core
//!
//! Flight-control core of the Profiler Interface Board (PIB) on a
//! stratospheric balloon winch. The PIB drives a motor-control board (MCB)
//! that moves the reel and a profiling unit (PU) that rides the line, and
//! answers to a supervising flight computer.
//!
//! ## Features
//!
//! - **Mode engine**: standby, flight, low power, safety and end of flight,
//!   each a sum-type substate machine stepped once per tick
//! - **Autonomous profiles**: time or solar-zenith-angle trigger, PU warm-up,
//!   reel out, dwell, reel in, dock and bounded re-dock
//! - **Action scheduler**: one-shot timers raising typed action flags, with
//!   stale flags swept after two ticks
//! - **Device sessions**: MCB and PU frame classification, owner-scoped
//!   acknowledgment tracking and motion telemetry framing
//! - **Bounded memory**: fixed-capacity queues and tables in the control loop
//!
//! ## Quick Start
//!
//! ```rust
//! use stratopib::config::PibConfig;
//! use stratopib::mode::Mode;
//! use stratopib::protocol::SupervisorMessage;
//! use stratopib::sim::ScriptedBench;
//!
//! let mut bench = ScriptedBench::new(PibConfig::default());
//! bench.send(SupervisorMessage::SetMode { mode: Mode::Safety });
//! bench.tick();
//! assert_eq!(bench.controller.mode(), Mode::Safety);
//! ```
//!
//! ## Architecture
//!
//! - [`controller`] - owns every component and runs the control-loop tick
//! - [`mode`] - mode engine and the flight sub-machine
//! - [`sequence`] - nested sequencers (motion, RA, profile, re-dock)
//! - [`session`] - MCB and PU device sessions
//! - [`action`] / [`scheduler`] - action flags and timers
//! - [`telecommand`] - telecommand dispatch
//! - [`sim`] - scripted and modelled devices

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod ack;
pub mod action;
pub mod config;
pub mod context;
pub mod controller;
pub mod hardware;
pub mod mode;
pub mod protocol;
pub mod scheduler;
pub mod sequence;
pub mod session;
pub mod sim;
pub mod supervisor;
pub mod telecommand;
pub mod telemetry;

// Re-export main public types for convenience
pub use action::{ActionId, ActionRegistry};
pub use config::{PibConfig, Settings};
pub use controller::PibController;
pub use mode::Mode;
pub use protocol::{Outbound, SupervisorMessage, TelecommandKind};
pub use scheduler::{ActionScheduler, Deadline};
