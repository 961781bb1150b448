use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use padspy::bus::ReplayProbe;
use padspy::frame::Button;
use padspy::spy::{ControllerSpy, SaturnSpy};
use padspy::wire::{parse_packet, CaptureSink};
use std::process::Command;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7654";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("padspy")
        .version("0.1.0")
        .author("Console Instrumentation Team")
        .about("🕹️  Controller bus spy - live Saturn pad decoding and monitoring")
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Rig host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Rig port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("ping")
                .about("🏓 Test connection to the bus rig")
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📈 Monitor the live decoded frame stream")
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("FRAMES")
                        .help("Stop after this many frames (default: infinite)")
                        .takes_value(true)
                        .validator(|v| {
                            v.parse::<u64>()
                                .map(|_| ())
                                .map_err(|_| "count must be a number".into())
                        }),
                ),
        )
        .subcommand(
            SubCommand::with_name("pad")
                .about("🎮 Drive the simulated pad")
                .subcommand(
                    SubCommand::with_name("press").about("Press a button").arg(
                        Arg::with_name("button")
                            .help("Button name (up/down/left/right/a/b/c/x/y/z/l/r/start)")
                            .required(true),
                    ),
                )
                .subcommand(
                    SubCommand::with_name("release")
                        .about("Release a button")
                        .arg(Arg::with_name("button").help("Button name").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("set")
                        .about("Set the full held-button list")
                        .arg(
                            Arg::with_name("buttons")
                                .help("Button names")
                                .required(true)
                                .multiple(true),
                        ),
                )
                .subcommand(SubCommand::with_name("clear").about("Release every button")),
        )
        .subcommand(
            SubCommand::with_name("glitch")
                .about("⚡ Control bus glitch injection")
                .subcommand(
                    SubCommand::with_name("on")
                        .about("Enable glitch injection")
                        .arg(
                            Arg::with_name("drop")
                                .long("drop")
                                .value_name("PERCENT")
                                .help("Edge drop rate")
                                .takes_value(true)
                                .default_value("5"),
                        )
                        .arg(
                            Arg::with_name("repeat")
                                .long("repeat")
                                .value_name("PERCENT")
                                .help("Edge repeat rate")
                                .takes_value(true)
                                .default_value("0"),
                        )
                        .arg(
                            Arg::with_name("stall")
                                .long("stall")
                                .value_name("PERCENT")
                                .help("Mid-frame stall rate")
                                .takes_value(true)
                                .default_value("0"),
                        ),
                )
                .subcommand(SubCommand::with_name("off").about("Disable glitch injection")),
        )
        .subcommand(
            SubCommand::with_name("stats")
                .about("📊 Show decoder, rig and host statistics")
        )
        .subcommand(
            SubCommand::with_name("replay")
                .about("📼 Decode a bus capture file offline")
                .arg(
                    Arg::with_name("file")
                        .help("Capture file (<t_us> <th> <tr> <nibble-hex> per line)")
                        .required(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("rig")
                .about("🚀 Start the bus rig server")
                .arg(
                    Arg::with_name("background")
                        .short("b")
                        .long("background")
                        .help("Run the rig in the background"),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap();
    let port = matches.value_of("port").unwrap().parse::<u16>()?;
    let format = matches.value_of("format").unwrap();
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{}", "🕹️  padspy - controller bus spy".bright_blue().bold());
        println!("{} {}:{}", "Connecting to".dimmed(), host, port);
    }

    match matches.subcommand() {
        ("ping", _) => handle_ping(host, port, format).await?,
        ("monitor", Some(sub_matches)) => handle_monitor(sub_matches, host, port, format).await?,
        ("pad", Some(sub_matches)) => handle_pad_command(sub_matches, host, port, format).await?,
        ("glitch", Some(sub_matches)) => {
            handle_glitch_command(sub_matches, host, port, format).await?;
        }
        ("stats", _) => handle_stats(host, port, format).await?,
        ("replay", Some(sub_matches)) => handle_replay(sub_matches, format)?,
        ("rig", Some(sub_matches)) => handle_rig(sub_matches, port)?,
        _ => {
            println!(
                "{}",
                "No command specified. Use --help for usage information.".yellow()
            );
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the bus rig", "padspy rig".bright_cyan());
            println!("  {} Test connection", "padspy ping".bright_cyan());
            println!("  {} Watch decoded frames", "padspy monitor".bright_cyan());
        }
    }

    Ok(())
}

async fn handle_ping(
    host: &str,
    port: u16,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = send_command(host, port, create_command("Ping")).await?;

    match format {
        "json" => println!("{response}"),
        "compact" => println!("{}", "PONG".bright_green()),
        _ => {
            if response_succeeded(&response) {
                println!("{} {}", "✅".green(), "Bus rig is responsive".bright_green());
            } else {
                println!("{} {}", "❌".red(), "Ping failed".bright_red());
            }
        }
    }

    Ok(())
}

async fn handle_monitor(
    matches: &ArgMatches<'_>,
    host: &str,
    port: u16,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let limit = matches
        .value_of("count")
        .map(|v| v.parse::<u64>().unwrap());

    println!(
        "{}",
        "📡 Monitoring decoded frames (Press Ctrl+C to stop)..."
            .bright_blue()
            .bold()
    );

    if format == "table" {
        println!(
            "{}",
            "┌────────┬────────────┬──────────────────────────────────────────┐".bright_white()
        );
        println!(
            "{}",
            "│ seq    │ axis       │ buttons                                  │".bright_white()
        );
        println!(
            "{}",
            "├────────┼────────────┼──────────────────────────────────────────┤".bright_white()
        );
    }

    let stream = TcpStream::connect((host, port)).await?;
    let mut lines = BufReader::new(stream).lines();
    let mut seen = 0u64;

    while let Some(line) = lines.next_line().await? {
        let Ok(message) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        // Command responses share the stream with frames; skip them here.
        if message.get("seq").is_none() {
            continue;
        }

        match format {
            "json" => println!("{line}"),
            "compact" => {
                let seq = message["seq"].as_u64().unwrap_or(0);
                let buttons = button_summary(&message);
                println!("[{seq}] {buttons}");
            }
            _ => {
                let seq = message["seq"].as_u64().unwrap_or(0);
                let x = message["x"].as_f64().unwrap_or(0.0);
                let y = message["y"].as_f64().unwrap_or(0.0);
                let buttons = button_summary(&message);
                let errors = message["decode_errors"].as_u64().unwrap_or(0);

                let buttons_str = if errors > 0 {
                    format!("{buttons:<40}").yellow()
                } else {
                    format!("{buttons:<40}").bright_green()
                };
                println!(
                    "│ {:>6} │ {:>+4.1},{:>+4.1}  │ {} │",
                    seq, x, y, buttons_str
                );
            }
        }

        seen += 1;
        if limit.is_some_and(|l| seen >= l) {
            break;
        }
    }

    Ok(())
}

async fn handle_pad_command(
    matches: &ArgMatches<'_>,
    host: &str,
    port: u16,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match matches.subcommand() {
        ("press", Some(sub_matches)) => {
            let button = validate_button(sub_matches.value_of("button").unwrap())?;
            let response = send_command(
                host,
                port,
                create_payload_command("Press", serde_json::json!({ "button": button })),
            )
            .await?;
            print_command_result("Press", button, &response, format);
        }
        ("release", Some(sub_matches)) => {
            let button = validate_button(sub_matches.value_of("button").unwrap())?;
            let response = send_command(
                host,
                port,
                create_payload_command("Release", serde_json::json!({ "button": button })),
            )
            .await?;
            print_command_result("Release", button, &response, format);
        }
        ("set", Some(sub_matches)) => {
            let buttons: Vec<&str> = sub_matches.values_of("buttons").unwrap().collect();
            for button in &buttons {
                validate_button(button)?;
            }
            let response = send_command(
                host,
                port,
                create_payload_command("SetPad", serde_json::json!({ "buttons": buttons })),
            )
            .await?;
            print_command_result("Set pad", &buttons.join("+"), &response, format);
        }
        ("clear", _) => {
            let response = send_command(host, port, create_command("ReleaseAll")).await?;
            print_command_result("Clear pad", "all released", &response, format);
        }
        _ => {
            println!(
                "{}",
                "Pad subcommand required. Use 'padspy pad --help' for options.".yellow()
            );
        }
    }
    Ok(())
}

async fn handle_glitch_command(
    matches: &ArgMatches<'_>,
    host: &str,
    port: u16,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match matches.subcommand() {
        ("on", Some(sub_matches)) => {
            let drop: u8 = sub_matches.value_of("drop").unwrap().parse()?;
            let repeat: u8 = sub_matches.value_of("repeat").unwrap().parse()?;
            let stall: u8 = sub_matches.value_of("stall").unwrap().parse()?;
            let response = send_command(
                host,
                port,
                create_payload_command(
                    "SetGlitch",
                    serde_json::json!({
                        "enabled": true,
                        "drop_rate_percent": drop,
                        "repeat_rate_percent": repeat,
                        "stall_rate_percent": stall,
                    }),
                ),
            )
            .await?;
            print_command_result(
                "Glitch injection",
                &format!("drop {drop}% repeat {repeat}% stall {stall}%"),
                &response,
                format,
            );
        }
        ("off", _) => {
            let response = send_command(
                host,
                port,
                create_payload_command(
                    "SetGlitch",
                    serde_json::json!({
                        "enabled": false,
                        "drop_rate_percent": 0,
                        "repeat_rate_percent": 0,
                        "stall_rate_percent": 0,
                    }),
                ),
            )
            .await?;
            print_command_result("Glitch injection", "OFF", &response, format);
        }
        _ => {
            println!(
                "{}",
                "Glitch subcommand required. Use 'padspy glitch --help' for options.".yellow()
            );
        }
    }
    Ok(())
}

async fn handle_stats(
    host: &str,
    port: u16,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = send_command(host, port, create_command("Stats")).await?;

    match format {
        "json" => println!("{response}"),
        _ => {
            let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&response) else {
                println!("{} Failed to parse stats response", "❌".red());
                return Ok(());
            };
            let Some(message) = parsed.get("message").and_then(|m| m.as_str()) else {
                println!("{} Stats response carried no payload", "❌".red());
                return Ok(());
            };
            let Ok(stats) = serde_json::from_str::<serde_json::Value>(message) else {
                println!("{} Failed to parse stats payload", "❌".red());
                return Ok(());
            };

            println!("\n{}", "📊 Decoder".bright_blue().bold());
            let spy = &stats["spy"];
            println!("Edges seen:       {}", spy["edges_seen"]);
            println!("Frames decoded:   {}", spy["frames_decoded"]);
            println!("Frames published: {}", spy["frames_published"]);
            println!(
                "Framing errors:   {}  overruns: {}  timeouts: {}  overflows: {}",
                spy["framing_errors"], spy["overruns"], spy["timeouts"], spy["queue_overflows"]
            );

            println!("\n{}", "🎛️  Rig".bright_blue().bold());
            let rig = &stats["rig"];
            println!("Cycles generated: {}", rig["cycles_generated"]);
            println!(
                "Edges emitted:    {}  dropped: {}  repeated: {}  stalls: {}",
                rig["edges_emitted"],
                rig["edges_dropped"],
                rig["edges_repeated"],
                rig["stalls_injected"]
            );

            println!("\n{}", "🖥️  Host".bright_blue().bold());
            let host_state = &stats["host"];
            println!("Ticks:            {}", host_state["ticks"]);
            println!("Decode errors:    {}", host_state["decode_errors"]);
        }
    }

    Ok(())
}

fn handle_replay(
    matches: &ArgMatches<'_>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = matches.value_of("file").unwrap();
    let text = std::fs::read_to_string(path)?;

    let mut probe = ReplayProbe::from_capture(&text)?;
    let mut spy = SaturnSpy::new();
    let mut sink = CaptureSink::new();

    while !probe.exhausted() {
        spy.poll(&mut probe, &mut sink)?;
    }

    for (index, packet) in sink.packets().iter().enumerate() {
        match parse_packet(packet) {
            Ok(pad) => {
                let pressed: Vec<&str> = Button::ALL
                    .iter()
                    .filter(|b| pad.pressed(**b))
                    .map(|b| b.label())
                    .collect();
                let rendered = if pressed.is_empty() {
                    "none".dimmed().to_string()
                } else {
                    pressed.join("+").bright_green().to_string()
                };
                match format {
                    "json" => println!(
                        "{}",
                        serde_json::json!({ "frame": index + 1, "pad": pad })
                    ),
                    _ => println!("frame {:>4}: {}", index + 1, rendered),
                }
            }
            Err(e) => println!("frame {:>4}: {} {}", index + 1, "bad packet:".red(), e),
        }
    }

    let stats = spy.stats();
    println!("\n{}", "📊 Capture summary".bright_blue().bold());
    println!(
        "Edges: {}  decoded: {}  published: {}",
        stats.edges_seen,
        stats.frames_decoded.to_string().bright_green(),
        stats.frames_published
    );
    if stats.decode_errors() > 0 {
        println!(
            "{} framing {} overrun {} timeout {}",
            "Decode errors:".yellow(),
            stats.framing_errors,
            stats.overruns,
            stats.timeouts
        );
    } else {
        println!("{}", "No decode errors".bright_green());
    }

    Ok(())
}

fn handle_rig(matches: &ArgMatches<'_>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let background = matches.is_present("background");

    println!("{}", "🚀 Starting bus rig server...".bright_green().bold());

    let mut cmd = Command::new("cargo");
    cmd.args(["run", "--bin", "padspy-rig"]);

    if background {
        cmd.spawn()?;
        println!("{} Rig started in background on port {}", "✅".green(), port);
    } else {
        println!(
            "{} Rig starting on port {} (Press Ctrl+C to stop)",
            "🌐".bright_blue(),
            port
        );
        cmd.status()?;
    }

    Ok(())
}

// Helper functions

fn validate_button(name: &str) -> Result<&str, Box<dyn std::error::Error>> {
    if Button::from_name(name).is_some() {
        Ok(name)
    } else {
        Err(format!("unknown button: {name}").into())
    }
}

fn button_summary(message: &serde_json::Value) -> String {
    message["buttons"]
        .as_array()
        .map(|buttons| {
            if buttons.is_empty() {
                "none".to_string()
            } else {
                buttons
                    .iter()
                    .filter_map(|b| b.as_str())
                    .collect::<Vec<_>>()
                    .join("+")
            }
        })
        .unwrap_or_else(|| "?".to_string())
}

fn response_succeeded(response: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(response)
        .map(|parsed| parsed["status"] == "Success")
        .unwrap_or(false)
}

fn print_command_result(action: &str, value: &str, response: &str, format: &str) {
    match format {
        "json" => println!("{response}"),
        "compact" => println!("{}", "OK".bright_green()),
        _ => {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(response) {
                let status = parsed["status"].as_str().unwrap_or("Unknown");
                match status {
                    "Success" => {
                        println!(
                            "{} {} set to {}",
                            "✅".green(),
                            action.bright_white(),
                            value.bright_cyan()
                        );
                    }
                    "InvalidCommand" => {
                        let message = parsed["message"].as_str().unwrap_or("Command rejected");
                        println!(
                            "{} {} failed: {}",
                            "❌".red(),
                            action.bright_white(),
                            message.bright_red()
                        );
                    }
                    _ => {
                        let message = parsed["message"].as_str().unwrap_or("Unknown error");
                        println!(
                            "{} {} status {}: {}",
                            "❓".blue(),
                            action.bright_white(),
                            status.bright_blue(),
                            message
                        );
                    }
                }
            } else {
                println!("{} {}", "✅".green(), "Command completed".bright_green());
            }
        }
    }
}

async fn send_command(
    host: &str,
    port: u16,
    command: String,
) -> Result<String, Box<dyn std::error::Error>> {
    let addr = format!("{host}:{port}");
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!(
                "{} Failed to connect to bus rig at {}",
                "❌".red(),
                addr.bright_white()
            );

            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Rig is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "padspy rig".bright_cyan());
                eprintln!("   or");
                eprintln!("   {}", "cargo run --bin padspy-rig".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }

            return Err(e.into());
        }
    };

    match tokio::time::timeout(std::time::Duration::from_secs(5), async {
        let (reader, mut writer) = stream.into_split();
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        // Frames stream on the same socket; the response is the first line
        // that is not a frame message.
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let is_frame = serde_json::from_str::<serde_json::Value>(&line)
                .map(|v| v.get("seq").is_some())
                .unwrap_or(false);
            if !is_frame {
                return Ok::<String, std::io::Error>(line);
            }
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "rig closed connection",
        ))
    })
    .await
    {
        Ok(result) => Ok(result?),
        Err(_) => {
            eprintln!("{} Command timed out after 5 seconds", "⏰".yellow());
            Err("Command timeout".into())
        }
    }
}

fn create_command(name: &str) -> String {
    serde_json::json!({
        "id": current_timestamp() as u32,
        "command_type": name
    })
    .to_string()
}

fn create_payload_command(name: &str, payload: serde_json::Value) -> String {
    let mut command_type = serde_json::Map::new();
    command_type.insert(name.to_string(), payload);

    serde_json::json!({
        "id": current_timestamp() as u32,
        "command_type": command_type
    })
    .to_string()
}

fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
