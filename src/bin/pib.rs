use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use stratopib::mode::Mode;
use stratopib::protocol::{AckKind, Outbound, Severity, SupervisorCodec, SupervisorMessage, Telecommand, TelecommandKind};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";

const TELECOMMANDS: &[&str] = &[
    "deploy",
    "deploy-velocity",
    "deploy-acceleration",
    "retract",
    "retract-velocity",
    "retract-acceleration",
    "dock",
    "dock-velocity",
    "dock-acceleration",
    "cancel-motion",
    "zero-reel",
    "set-autonomous",
    "set-manual",
    "sza-minimum",
    "profile-size",
    "dock-amount",
    "dock-overshoot",
    "dwell-time",
    "profile-period",
    "num-profiles",
    "time-trigger",
    "use-sza-trigger",
    "use-time-trigger",
    "pu-warmup-time",
    "preprofile-time",
    "motion-timeout",
    "dock-wait-time",
    "redock-parameters",
    "retry-dock",
    "pu-status",
    "request-tsen",
    "offload-records",
    "exit-error",
    "pu-power-on",
    "pu-power-off",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pib")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🎈 Supervisor console for the Profiler Interface Board simulator")
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("SECONDS")
                .help("How long to print replies after sending")
                .takes_value(true)
                .default_value("3")
                .global(true),
        )
        .arg(
            Arg::with_name("json")
                .long("json")
                .help("Print raw JSON lines")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("mode")
                .about("🔀 Request a mode change")
                .arg(
                    Arg::with_name("mode")
                        .help("Target mode")
                        .required(true)
                        .possible_values(&["standby", "flight", "low-power", "safety", "end-of-flight"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("tc")
                .about("📨 Send a telecommand")
                .arg(
                    Arg::with_name("name")
                        .help("Telecommand name")
                        .required(true)
                        .possible_values(TELECOMMANDS),
                )
                .arg(
                    Arg::with_name("values")
                        .help("Telecommand parameters")
                        .multiple(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("ack")
                .about("✅ Answer a pending request")
                .arg(
                    Arg::with_name("kind")
                        .help("Request being answered")
                        .required(true)
                        .possible_values(&["ra", "safety", "tm"]),
                )
                .arg(
                    Arg::with_name("nak")
                        .long("nak")
                        .help("Send a NAK instead of an ACK"),
                ),
        )
        .subcommand(
            SubCommand::with_name("gps")
                .about("🛰️  Send a GPS time and solar zenith angle")
                .arg(
                    Arg::with_name("sza")
                        .help("Solar zenith angle in degrees")
                        .required(true),
                )
                .arg(
                    Arg::with_name("epoch")
                        .long("epoch")
                        .value_name("SECONDS")
                        .help("Epoch to send (default: now)")
                        .takes_value(true),
                ),
        )
        .subcommand(SubCommand::with_name("shutdown").about("⚠️  Send a shutdown warning"))
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📡 Print the outbound stream until interrupted"),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let listen = Duration::from_secs(matches.value_of("listen").unwrap_or("3").parse::<u64>()?);
    let raw = matches.is_present("json");

    let message = match matches.subcommand() {
        ("mode", Some(sub_matches)) => Some(SupervisorMessage::SetMode {
            mode: parse_mode(sub_matches.value_of("mode").unwrap_or_default())?,
        }),
        ("tc", Some(sub_matches)) => {
            let name = sub_matches.value_of("name").unwrap_or_default();
            let values: Vec<&str> = sub_matches.values_of("values").map(Iterator::collect).unwrap_or_default();
            Some(SupervisorMessage::Telecommand(Telecommand {
                id: current_timestamp() as u32,
                kind: parse_telecommand(name, &values)?,
            }))
        }
        ("ack", Some(sub_matches)) => Some(SupervisorMessage::Ack {
            kind: match sub_matches.value_of("kind") {
                Some("safety") => AckKind::Safety,
                Some("tm") => AckKind::Telemetry,
                _ => AckKind::RequestAuthorization,
            },
            ack: !sub_matches.is_present("nak"),
        }),
        ("gps", Some(sub_matches)) => Some(build_gps(sub_matches)?),
        ("shutdown", _) => Some(SupervisorMessage::ShutdownWarning),
        ("monitor", _) => None,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the simulator", "pib-simulator".bright_cyan());
            println!("  {} Send time and SZA", "pib gps 95".bright_cyan());
            println!("  {} Enter flight mode", "pib mode flight".bright_cyan());
            println!("  {} Watch the outbound stream", "pib monitor".bright_cyan());
            return Ok(());
        }
    };

    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    if let Some(message) = message {
        let line = SupervisorCodec::new().serialize_message(&message)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        println!("{} {}", "📤".bright_blue(), line.dimmed());
    } else {
        println!("{}", "📡 Monitoring PIB outbound stream (Press Ctrl+C to stop)...".bright_blue().bold());
    }

    let deadline = if matches.subcommand_name() == Some("monitor") {
        None
    } else {
        Some(tokio::time::Instant::now() + listen)
    };

    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, lines.next_line()).await {
                Ok(next) => next?,
                Err(_) => break,
            },
            None => lines.next_line().await?,
        };
        let Some(line) = next else {
            println!("{}", "🔌 Simulator closed the connection".yellow());
            break;
        };
        if raw {
            println!("{}", line);
        } else {
            print_outbound(&line);
        }
    }

    Ok(())
}

async fn connect(host: &str, port: u16) -> Result<TcpStream, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    match TcpStream::connect(&addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to PIB simulator at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Simulator is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin pib-simulator".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            Err(e.into())
        }
    }
}

fn parse_mode(name: &str) -> Result<Mode, Box<dyn std::error::Error>> {
    Ok(match name {
        "standby" => Mode::Standby,
        "flight" => Mode::Flight,
        "low-power" => Mode::LowPower,
        "safety" => Mode::Safety,
        "end-of-flight" => Mode::EndOfFlight,
        other => return Err(format!("Unknown mode {}", other).into()),
    })
}

fn build_gps(matches: &ArgMatches<'_>) -> Result<SupervisorMessage, Box<dyn std::error::Error>> {
    let sza = matches.value_of("sza").unwrap_or_default().parse::<f32>()?;
    let epoch = match matches.value_of("epoch") {
        Some(epoch) => epoch.parse::<u32>()?,
        None => (current_timestamp() / 1000) as u32,
    };
    Ok(SupervisorMessage::Gps { epoch, sza })
}

fn value<T: std::str::FromStr>(values: &[&str], index: usize, name: &str) -> Result<T, Box<dyn std::error::Error>> {
    values
        .get(index)
        .ok_or_else(|| format!("Missing parameter <{}>", name))?
        .parse::<T>()
        .map_err(|_| format!("Invalid parameter <{}>: {}", name, values[index]).into())
}

fn parse_telecommand(name: &str, values: &[&str]) -> Result<TelecommandKind, Box<dyn std::error::Error>> {
    use TelecommandKind as Tc;

    Ok(match name {
        "deploy" => Tc::Deploy { length: value(values, 0, "revs")? },
        "deploy-velocity" => Tc::DeployVelocity { velocity: value(values, 0, "rpm")? },
        "deploy-acceleration" => Tc::DeployAcceleration { acceleration: value(values, 0, "accel")? },
        "retract" => Tc::Retract { length: value(values, 0, "revs")? },
        "retract-velocity" => Tc::RetractVelocity { velocity: value(values, 0, "rpm")? },
        "retract-acceleration" => Tc::RetractAcceleration { acceleration: value(values, 0, "accel")? },
        "dock" => Tc::Dock { length: value(values, 0, "revs")? },
        "dock-velocity" => Tc::DockVelocity { velocity: value(values, 0, "rpm")? },
        "dock-acceleration" => Tc::DockAcceleration { acceleration: value(values, 0, "accel")? },
        "cancel-motion" => Tc::CancelMotion,
        "zero-reel" => Tc::ZeroReel,
        "set-autonomous" => Tc::SetAutonomous,
        "set-manual" => Tc::SetManual,
        "sza-minimum" => Tc::SetSzaMinimum { degrees: value(values, 0, "degrees")? },
        "profile-size" => Tc::SetProfileSize { revs: value(values, 0, "revs")? },
        "dock-amount" => Tc::SetDockAmount { revs: value(values, 0, "revs")? },
        "dock-overshoot" => Tc::SetDockOvershoot { revs: value(values, 0, "revs")? },
        "dwell-time" => Tc::SetDwellTime { seconds: value(values, 0, "seconds")? },
        "profile-period" => Tc::SetProfilePeriod { seconds: value(values, 0, "seconds")? },
        "num-profiles" => Tc::SetNumProfiles { count: value(values, 0, "count")? },
        "time-trigger" => Tc::SetTimeTrigger { epoch: value(values, 0, "epoch")? },
        "use-sza-trigger" => Tc::UseSzaTrigger,
        "use-time-trigger" => Tc::UseTimeTrigger,
        "pu-warmup-time" => Tc::SetPuWarmupTime { seconds: value(values, 0, "seconds")? },
        "preprofile-time" => Tc::SetPreprofileTime { seconds: value(values, 0, "seconds")? },
        "motion-timeout" => Tc::SetMotionTimeout { seconds: value(values, 0, "seconds")? },
        "dock-wait-time" => Tc::SetDockWaitTime { seconds: value(values, 0, "seconds")? },
        "redock-parameters" => Tc::SetRedockParameters {
            out_revs: value(values, 0, "out")?,
            in_revs: value(values, 1, "in")?,
            attempts: value(values, 2, "attempts")?,
        },
        "retry-dock" => Tc::RetryDock {
            out_revs: value(values, 0, "out")?,
            in_revs: value(values, 1, "in")?,
        },
        "pu-status" => Tc::GetPuStatus,
        "request-tsen" => Tc::RequestTsen,
        "offload-records" => Tc::OffloadProfileRecords,
        "exit-error" => Tc::ExitError,
        "pu-power-on" => Tc::PuPowerOn,
        "pu-power-off" => Tc::PuPowerOff,
        other => return Err(format!("Unknown telecommand {}", other).into()),
    })
}

fn print_outbound(line: &str) {
    let Ok(message) = serde_json::from_str::<Outbound>(line) else {
        println!("{} {}", "❓".yellow(), line);
        return;
    };

    match message {
        Outbound::Report { severity, message } => {
            let tag = match severity {
                Severity::Debug => "DEBUG".dimmed(),
                Severity::Nominal => "INFO ".bright_green(),
                Severity::Warning => "WARN ".yellow(),
                Severity::Critical => "CRIT ".bright_red().bold(),
            };
            println!("{} {}", tag, message);
        }
        Outbound::RequestAuthorization => {
            println!("{} {}", "🔐".bright_blue(), "Motion authorization requested (answer with 'pib ack ra')".bright_white());
        }
        Outbound::SafetyNotice => {
            println!("{} {}", "🛑".red(), "Entered safety mode (answer with 'pib ack safety')".bright_white());
        }
        Outbound::Telemetry(record) => {
            println!(
                "{} {} {}",
                "📦".bright_blue(),
                format!("{:?}", record.kind).bright_cyan(),
                record.summary.as_str()
            );
        }
        Outbound::TelecommandAck { id, ack } => {
            if ack {
                println!("{} Telecommand {} accepted", "✅".green(), id);
            } else {
                println!("{} Telecommand {} rejected", "❌".red(), id);
            }
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
