use padspy::bus::QueueProbe;
use padspy::frame::Button;
use padspy::host::SpyHost;
use padspy::rig::{ConsoleRig, GlitchConfig};
use padspy::scheduler::{TickScheduler, DEFAULT_TICK_PERIOD_US};
use padspy::spy::SaturnSpy;
use padspy::wire::{parse_packet, CaptureSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const TCP_PORT: u16 = 7654;
const FRAME_BROADCAST_BUFFER_SIZE: usize = 256;

/// One decoded frame as broadcast to monitor clients, one JSON line each.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameMessage {
    seq: u64,
    console: String,
    buttons: Vec<String>,
    x: f32,
    y: f32,
    #[serde(with = "serde_bytes")]
    wire: Vec<u8>,
    decode_errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RigCommand {
    id: u32,
    command_type: RigCommandType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum RigCommandType {
    Ping,
    SetPad { buttons: Vec<String> },
    Press { button: String },
    Release { button: String },
    ReleaseAll,
    SetGlitch(GlitchConfig),
    Stats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RigResponse {
    id: u32,
    status: ResponseStatus,
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum ResponseStatus {
    Success,
    Error,
    InvalidCommand,
}

/// The spy host, the simulated console it taps, and broadcast bookkeeping.
struct RigService {
    host: SpyHost<QueueProbe, SaturnSpy>,
    rig: ConsoleRig,
    sink: CaptureSink,
    seq: u64,
}

impl RigService {
    fn new() -> Self {
        let mut host = SpyHost::new(QueueProbe::new(), SaturnSpy::new());
        host.start();
        Self {
            host,
            rig: ConsoleRig::new(),
            sink: CaptureSink::new(),
            seq: 0,
        }
    }

    /// One tick: the console polls the pad, the spy decodes what it saw.
    fn tick(&mut self) -> Vec<FrameMessage> {
        for event in self.rig.poll_cycle() {
            if !self.host.probe_mut().push_event(event) {
                warn!("edge queue saturated; decoder will resync");
            }
        }

        match self.host.update(&mut self.sink) {
            Ok(Some(debug_line)) => info!("🔍 {}", debug_line.as_str()),
            Ok(None) => {}
            Err(err) => error!("host error: {err}"),
        }

        let decode_errors = self.host.stats().decode_errors();
        let mut messages = Vec::new();
        for packet in self.sink.take_packets() {
            let Ok(pad) = parse_packet(&packet) else {
                continue;
            };
            self.seq += 1;
            messages.push(FrameMessage {
                seq: self.seq,
                console: "saturn".to_string(),
                buttons: Button::ALL
                    .iter()
                    .filter(|b| pad.pressed(**b))
                    .map(|b| b.label().to_string())
                    .collect(),
                x: pad.x,
                y: pad.y,
                wire: packet,
                decode_errors,
            });
        }
        messages
    }

    fn execute(&mut self, command: RigCommand) -> RigResponse {
        let (status, message) = match &command.command_type {
            RigCommandType::Ping => (ResponseStatus::Success, None),
            RigCommandType::SetPad { buttons } => match parse_button_list(buttons) {
                Ok(mask) => {
                    self.rig.set_held(mask);
                    (ResponseStatus::Success, None)
                }
                Err(name) => (
                    ResponseStatus::InvalidCommand,
                    Some(format!("unknown button: {name}")),
                ),
            },
            RigCommandType::Press { button } => match Button::from_name(button) {
                Some(b) => {
                    self.rig.press(b);
                    (ResponseStatus::Success, None)
                }
                None => (
                    ResponseStatus::InvalidCommand,
                    Some(format!("unknown button: {button}")),
                ),
            },
            RigCommandType::Release { button } => match Button::from_name(button) {
                Some(b) => {
                    self.rig.release(b);
                    (ResponseStatus::Success, None)
                }
                None => (
                    ResponseStatus::InvalidCommand,
                    Some(format!("unknown button: {button}")),
                ),
            },
            RigCommandType::ReleaseAll => {
                self.rig.release_all();
                (ResponseStatus::Success, None)
            }
            RigCommandType::SetGlitch(config) => {
                if config.drop_rate_percent > 100
                    || config.repeat_rate_percent > 100
                    || config.stall_rate_percent > 100
                {
                    (
                        ResponseStatus::InvalidCommand,
                        Some("glitch rates are percentages".to_string()),
                    )
                } else {
                    self.rig.set_glitch(*config);
                    (ResponseStatus::Success, None)
                }
            }
            RigCommandType::Stats => {
                let summary = serde_json::json!({
                    "spy": self.host.stats(),
                    "rig": self.rig.stats(),
                    "host": self.host.state(),
                });
                (ResponseStatus::Success, Some(summary.to_string()))
            }
        };

        RigResponse {
            id: command.id,
            status,
            message,
        }
    }
}

fn parse_button_list(names: &[String]) -> Result<u16, String> {
    let mut mask = 0u16;
    for name in names {
        match Button::from_name(name) {
            Some(button) => mask |= button.mask(),
            None => return Err(name.clone()),
        }
    }
    Ok(mask)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("🕹️  padspy bus rig");
    println!("==================");

    let service = Arc::new(Mutex::new(RigService::new()));
    let (frame_tx, _) = broadcast::channel(FRAME_BROADCAST_BUFFER_SIZE);

    let tcp_service = Arc::clone(&service);
    let tcp_frame_tx = frame_tx.clone();
    let _tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(tcp_service, tcp_frame_tx).await {
            error!("TCP server error: {e}");
        }
    });

    // Pace the wall clock at the pad poll rate; the scheduler decides how
    // many ticks are actually owed, so a stalled task catches up cleanly.
    let mut scheduler = TickScheduler::new(DEFAULT_TICK_PERIOD_US);
    let started = Instant::now();
    let mut interval = time::interval(Duration::from_micros(DEFAULT_TICK_PERIOD_US));

    loop {
        interval.tick().await;
        let now_us = started.elapsed().as_micros() as u64;

        let due = {
            let mut guard = service.lock().await;
            let due = scheduler.advance(now_us);
            for _ in 0..due {
                for message in guard.tick() {
                    match serde_json::to_string(&message) {
                        Ok(line) => {
                            let _ = frame_tx.send(line);
                        }
                        Err(e) => warn!("frame serialization failed: {e}"),
                    }
                }
            }
            due
        };

        if due > 1 {
            warn!("caught up {due} ticks after a stall");
        }
    }
}

async fn start_tcp_server(
    service: Arc<Mutex<RigService>>,
    frame_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{TCP_PORT}")).await?;
    info!("🌐 TCP server listening on port {TCP_PORT}");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 New client connected: {addr}");
                let client_service = Arc::clone(&service);
                let client_frame_rx = frame_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_service, client_frame_rx).await {
                        warn!("Client {addr} error: {e}");
                    }
                    info!("🔌 Client {addr} disconnected");
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {e}");
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    service: Arc<Mutex<RigService>>,
    mut frame_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    // Stream decoded frames to the client as they arrive.
    let frame_writer = Arc::clone(&writer);
    let frame_task = tokio::spawn(async move {
        while let Ok(line) = frame_rx.recv().await {
            let mut guard = frame_writer.lock().await;
            if guard.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if guard.write_all(b"\n").await.is_err() {
                break;
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

                let response = match serde_json::from_str::<RigCommand>(trimmed) {
                    Ok(command) => {
                        info!("📨 Received command: {command:?}");
                        let mut guard = service.lock().await;
                        guard.execute(command)
                    }
                    Err(e) => {
                        error!("Failed to parse command: {e}");
                        RigResponse {
                            id: 0,
                            status: ResponseStatus::Error,
                            message: Some(format!("invalid command format: {e}")),
                        }
                    }
                };

                let response_json = serde_json::to_string(&response)?;
                {
                    let mut guard = writer.lock().await;
                    guard.write_all(response_json.as_bytes()).await?;
                    guard.write_all(b"\n").await?;
                }
            }
            Err(e) => {
                error!("Error reading from client: {e}");
                break;
            }
        }
    }

    frame_task.abort();
    Ok(())
}
