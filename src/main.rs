//! xwire - X11-style wire protocol client
//!
//! Command line front end: decodes captured frames and runs a scripted
//! session against the in-memory transport.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xwire::config::{self, Config};
use xwire::extension::Registry;
use xwire::network::{Connection, ConnectionError, MemoryTransport};
use xwire::protocol::{ByteOrder, Frame, FrameKind, X_PROTOCOL, X_PROTOCOL_REVISION};
use xwire::xproto::{self, randr, CreateWindowRequest, ListExtensionsReply, Setup, ValueList};
use xwire::ExtensionInfo;

/// xwire - X11-style wire protocol codec and client
#[derive(Parser)]
#[command(name = "xwire")]
#[command(author = "xwire Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Decode X11-style protocol frames and drive a scripted session", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one inbound frame given as hex
    Decode {
        /// Frame bytes as hex, e.g. 0003010000f00000000037 followed by padding
        #[arg(long = "hex")]
        frame: String,

        /// Read multi-byte fields big-endian
        #[arg(long)]
        big_endian: bool,
    },

    /// Run a scripted session against an in-memory server
    Demo,

    /// Generate or show configuration
    Config {
        /// Generate sample configuration
        #[arg(short, long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Decode { frame, big_endian } => {
            let order = if big_endian { ByteOrder::Big } else { config.connection.byte_order };
            decode_frame(&frame, order)?;
        }
        Commands::Demo => {
            run_demo(&config)?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info(&config);
        }
    }

    Ok(())
}

/// Initialize logging to stderr and, if configured, to a file
fn init_logging(config: &Config, verbose: bool) -> anyhow::Result<()> {
    let filter = if verbose || config.logging.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = match &config.logging.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

/// Classify and decode a single frame with the core tables
fn decode_frame(hex_frame: &str, order: ByteOrder) -> anyhow::Result<()> {
    let cleaned: String = hex_frame.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = Bytes::from(hex::decode(&cleaned).context("frame is not valid hex")?);
    let frame = Frame::parse(bytes, order)?;
    let registry = Registry::new(xproto::descriptor());

    println!("Kind:     {:?}", frame.kind());
    println!("Length:   {} bytes", frame.len());
    if let Some(sequence) = frame.wire_sequence() {
        println!("Sequence: {}", sequence);
    }

    match frame.kind() {
        FrameKind::Error => {
            let sequence = frame.wire_sequence().map_or(0, u64::from);
            let error = registry.decode_error(frame.bytes(), sequence, order)?;
            println!("Error:    {}", error);
        }
        FrameKind::Reply => {
            println!("Data:     {:#04x}", frame.detail());
            println!("Body:     {}", hex::encode(&frame.bytes()[8..]));
        }
        FrameKind::Event { .. } => {
            let event = registry.decode_event(frame.bytes(), order)?;
            println!("Event:    {}", event.name());
            println!("{:#?}", event);
        }
    }

    Ok(())
}

/// Drive a short session: a reply, a checked request, a server error and
/// an extension event
fn run_demo(config: &Config) -> anyhow::Result<()> {
    let setup = Setup::virtual_screen("xwire demo server", 1024, 768);
    let randr_info = ExtensionInfo {
        major_opcode: 140,
        first_event: 89,
        first_error: 147,
    };
    let (transport, server) = MemoryTransport::with_byte_order(&setup, config.connection.byte_order)?;
    let transport = transport.with_extension("RANDR", randr_info);

    let conn = Connection::connect(Box::new(transport), &config.connection)?;
    let core = conn.core();
    let root = conn.setup()?.roots[0].root;

    println!("Connected to '{}'", conn.setup()?.vendor_name());

    // ListExtensions round trip
    let cookie = core.list_extensions()?;
    server.inject_reply_value(&ListExtensionsReply::new(cookie.sequence() as u16, &["RANDR", "XInputExtension"]))?;
    let reply = cookie.reply()?;
    println!("Extensions: {}", reply.name_strings().join(", "));

    // A checked CreateWindow the server accepts silently
    let window = conn.generate_id()?;
    let request = CreateWindowRequest {
        depth: 0,
        wid: window,
        parent: root,
        x: 0,
        y: 0,
        width: 320,
        height: 200,
        border_width: 0,
        class: 1,
        visual: 0,
        values: ValueList::new().with(0x0000_0002, 0x00ff_ffff),
    };
    core.create_window_checked(&request)?.check()?;
    println!("Created window {:#x}", window);

    // GetGeometry on a bad drawable answered with an error
    let cookie = core.get_geometry(0xdead)?;
    server.inject_error(9, cookie.sequence() as u16, 0xdead, 0, xproto::GET_GEOMETRY);
    match cookie.reply() {
        Err(ConnectionError::Server(error)) => println!("Server error: {}", error),
        Err(err) => return Err(err.into()),
        Ok(reply) => println!("Unexpected geometry: {:?}", reply),
    }

    // RandR event numbered from the extension's first event
    if conn.extension_info("RANDR")?.is_some() {
        let version = conn.extension::<randr::RandrExtension>().query_version(1, 6)?;
        server.inject_reply_value(&randr::QueryVersionReply {
            sequence: version.sequence() as u16,
            major_version: randr::MAJOR_VERSION,
            minor_version: randr::MINOR_VERSION,
        })?;
        let version = version.reply()?;
        println!("RandR {}.{}", version.major_version, version.minor_version);

        server.inject_event(
            &randr::ScreenChangeNotifyEvent {
                synthetic: false,
                rotation: 1,
                sequence: conn.last_sequence() as u16,
                timestamp: 1,
                config_timestamp: 1,
                root,
                request_window: window,
                size_id: 0,
                subpixel_order: 0,
                width: 1024,
                height: 768,
                mwidth: 270,
                mheight: 203,
            },
            randr_info.first_event,
        )?;
        let event = conn.wait_for_event()?;
        println!("Event: {}", event.name());
    }

    let stats = conn.stats();
    println!(
        "Sent {} requests ({} bytes), received {} replies, {} errors, {} events",
        stats.requests_sent, stats.bytes_sent, stats.replies_received, stats.errors_received, stats.events_received
    );

    conn.disconnect()?;
    Ok(())
}

/// Print protocol information
fn print_protocol_info(config: &Config) {
    println!("xwire Protocol Information");
    println!("==========================\n");

    println!("Protocol Version: {}.{}", X_PROTOCOL, X_PROTOCOL_REVISION);
    println!("Byte Order: {}", config.connection.byte_order);
    println!("Event Queue Limit: {}", config.connection.event_queue_limit);
    match config.connection.max_request_length {
        Some(words) => println!("Max Request Length: {} words", words),
        None => println!("Max Request Length: server value"),
    }

    let core = xproto::descriptor();
    println!(
        "\nCore: {} requests, {} events, {} errors",
        core.requests.len(),
        core.events.len(),
        core.errors.len()
    );

    println!("\nKnown Extensions:");
    for descriptor in xproto::extensions() {
        let name = descriptor.namespace.extension_name().unwrap_or("?");
        let enabled = if config.connection.wants_extension(name) { "" } else { " (disabled)" };
        println!(
            "  {}: {} requests, {} events, {} errors{}",
            name,
            descriptor.requests.len(),
            descriptor.events.len() + descriptor.generic_events.len(),
            descriptor.errors.len(),
            enabled
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["xwire", "info"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["xwire", "decode", "--big-endian", "--hex", "00030100"]).unwrap();
        assert!(matches!(cli.command, Commands::Decode { big_endian: true, .. }));
    }

    #[test]
    fn test_decode_error_frame() {
        let frame = format!("0003010000f00000000037{}", "00".repeat(21));
        assert!(decode_frame(&frame, ByteOrder::Little).is_ok());
        assert!(decode_frame("zz", ByteOrder::Little).is_err());
    }

    #[test]
    fn test_demo_runs() {
        assert!(run_demo(&Config::default()).is_ok());
    }
}
