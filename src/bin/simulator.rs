use clap::{App, Arg};
use stratopib::config::JsonFileSettings;
use stratopib::controller::PibController;
use stratopib::hardware::SharedDiscretes;
use stratopib::protocol::SupervisorCodec;
use stratopib::session::{McbSession, PuSession};
use stratopib::sim::SimulatedBench;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_PORT: &str = "8080";
const DEFAULT_SETTINGS: &str = "pib_settings.json";
const OUTBOUND_BROADCAST_BUFFER_SIZE: usize = 256;

struct Simulation {
    controller: PibController,
    bench: SimulatedBench,
    codec: SupervisorCodec,
    started: Instant,
}

impl Simulation {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("pib-simulator")
        .version("0.1.0")
        .about("🎈 Profiler Interface Board simulator with modelled MCB and PU")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Supervisor link TCP port")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("settings")
                .short("s")
                .long("settings")
                .value_name("FILE")
                .help("Persistent settings store")
                .takes_value(true)
                .default_value(DEFAULT_SETTINGS),
        )
        .arg(
            Arg::with_name("rate")
                .short("r")
                .long("rate")
                .value_name("MS")
                .help("Control loop period in milliseconds")
                .takes_value(true)
                .default_value("1000")
                .validator(|v| match v.parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(()),
                    _ => Err("Rate must be a positive number of milliseconds".into()),
                }),
        )
        .get_matches();

    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let settings_path = matches.value_of("settings").unwrap_or(DEFAULT_SETTINGS);
    let rate_ms: u64 = matches.value_of("rate").unwrap_or("1000").parse()?;

    println!("🎈 StratoPIB Simulator");
    println!("======================");

    let (settings, config_valid) = JsonFileSettings::open(settings_path)?;
    info!("Settings loaded from {} (valid: {})", settings_path, config_valid);

    let bench = SimulatedBench::new();
    let mut controller = PibController::new(
        McbSession::new(Box::new(bench.mcb_transport())),
        PuSession::new(Box::new(bench.pu_transport())),
        Box::new(settings),
        Box::new(SharedDiscretes::new()),
    );
    controller.start(0, config_valid);

    let simulation = Arc::new(Mutex::new(Simulation {
        controller,
        bench,
        codec: SupervisorCodec::new(),
        started: Instant::now(),
    }));

    let (outbound_tx, _) = broadcast::channel(OUTBOUND_BROADCAST_BUFFER_SIZE);

    let tcp_simulation = Arc::clone(&simulation);
    let tcp_outbound_tx = outbound_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_simulation, tcp_outbound_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut interval = time::interval(Duration::from_millis(rate_ms));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let lines = {
            let mut guard = simulation.lock().await;
            let now_ms = guard.now_ms();
            guard.bench.advance(now_ms);
            guard.controller.tick(now_ms);

            let mut lines = Vec::new();
            while let Some(message) = guard.controller.pop_outbound() {
                match guard.codec.serialize_outbound(&message) {
                    Ok(line) => lines.push(line),
                    Err(e) => warn!("Dropping outbound message: {}", e),
                }
            }
            lines
        };

        for line in lines {
            info!("📡 {}", line);
            // No subscribers is not an error.
            let _ = outbound_tx.send(line);
        }
    }

    tcp_server.abort();
    {
        let guard = simulation.lock().await;
        let status = guard.controller.status();
        info!("Final status: {:?}", status);
    }
    println!("🎈 StratoPIB Simulator stopped");

    Ok(())
}

async fn start_tcp_server(
    port: u16,
    simulation: Arc<Mutex<Simulation>>,
    outbound_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("🌐 Supervisor link listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 Supervisor connected: {}", addr);
                let client_simulation = Arc::clone(&simulation);
                let client_outbound_rx = outbound_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_simulation, client_outbound_rx).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("🔌 Supervisor {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    simulation: Arc<Mutex<Simulation>>,
    mut outbound_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let outbound_writer = Arc::clone(&writer);
    let outbound_task = tokio::spawn(async move {
        loop {
            match outbound_rx.recv().await {
                Ok(line) => {
                    let mut writer_guard = outbound_writer.lock().await;
                    if let Err(e) = writer_guard.write_all(line.as_bytes()).await {
                        warn!("Failed to send outbound message: {}", e);
                        break;
                    }
                    if let Err(e) = writer_guard.write_all(b"\n").await {
                        warn!("Failed to send outbound newline: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Supervisor client lagging, skipped {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let mut guard = simulation.lock().await;
                match guard.codec.parse_message(trimmed) {
                    Ok(message) => {
                        info!("📨 Supervisor message: {:?}", message);
                        let now_ms = guard.now_ms();
                        guard.controller.handle_supervisor_message(message, now_ms);
                    }
                    Err(e) => {
                        error!("Failed to parse supervisor message: {}", e);
                        let error_response = serde_json::json!({
                            "status": "ParseError",
                            "message": format!("Invalid message format: {}", e),
                        });
                        drop(guard);
                        let mut writer_guard = writer.lock().await;
                        writer_guard.write_all(error_response.to_string().as_bytes()).await?;
                        writer_guard.write_all(b"\n").await?;
                    }
                }
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    outbound_task.abort();
    Ok(())
}
