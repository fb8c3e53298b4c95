//! Command line front-end for the transfer engine: opens and configures the
//! serial port, wires Ctrl-C into the cancellation token and renders
//! progress. Exits zero on a completed transfer, non-zero on any abort.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use byte_unit::{Byte, UnitType};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use parlink::{CancelToken, Channel, Link, Receiver, Sender};

/// Base serial read timeout. Protocol deadlines are enforced on top of it,
/// so this only bounds how often cancellation is polled.
const PORT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(
    name = "parlink",
    version,
    about = "Resumable stop-and-wait file transfer over serial links"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a file to the peer
    Send {
        /// Serial port (e.g. /dev/ttyUSB0, COM3, /dev/pts/5)
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,

        /// File to send
        file: PathBuf,
    },
    /// Receive a file from the peer
    Recv {
        /// Serial port (e.g. /dev/ttyUSB0, COM3, /dev/pts/5)
        #[arg(short, long)]
        port: String,

        /// Baud rate
        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,

        /// Directory the received file is written into
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
}

/// A configured serial port as seen by the protocol engine.
struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Link for SerialLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::other)
    }

    fn clear_output(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Output).map_err(io::Error::other)
    }
}

/// Opens `path` as 8N1 at `baud` with hardware flow control when the device
/// supports it.
fn open_port(path: &str, baud: u32) -> Result<SerialLink> {
    let builder = serialport::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(PORT_TIMEOUT);

    let port = match builder.clone().flow_control(FlowControl::Hardware).open() {
        Ok(port) => port,
        Err(e) => {
            warn!("hardware flow control unavailable on {path} ({e}), continuing without");
            builder
                .flow_control(FlowControl::None)
                .open()
                .with_context(|| format!("cannot open serial port {path}"))?
        }
    };
    Ok(SerialLink { port })
}

fn open_channel(port: &str, baud: u32, cancel: CancelToken) -> Result<Channel<SerialLink>> {
    let link = open_port(port, baud)?;
    println!("{}", format!("{port} open at {baud} baud").green());

    let mut chan = Channel::new(link, cancel);
    chan.flush_input()?;
    chan.flush_output()?;
    Ok(chan)
}

fn send(port: &str, baud: u32, file: &Path, cancel: CancelToken) -> Result<()> {
    let size = std::fs::metadata(file)
        .with_context(|| format!("cannot read {}", file.display()))?
        .len();
    let mut chan = open_channel(port, baud, cancel)?;

    let pretty = Byte::from_u64(size).get_appropriate_unit(UnitType::Binary);
    println!("sending {} ({pretty:.2})", file.display());

    let bar = ProgressBar::new(size);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?
            .progress_chars("##-"),
    );

    let result = Sender::new().send(&mut chan, file, |sent, total| {
        bar.set_position(sent.min(total));
    });
    match &result {
        Ok(()) => bar.finish(),
        Err(_) => bar.abandon(),
    }
    result?;

    println!("{}", "transfer complete".green().bold());
    Ok(())
}

fn recv(port: &str, baud: u32, out_dir: PathBuf, cancel: CancelToken) -> Result<()> {
    let mut chan = open_channel(port, baud, cancel)?;

    println!(
        "waiting for the sender (up to {} s)...",
        parlink::START_WAIT.as_secs()
    );
    let received = Receiver::new(out_dir).receive(&mut chan)?;

    let pretty = Byte::from_u64(received.bytes).get_appropriate_unit(UnitType::Binary);
    println!(
        "{}",
        format!(
            "received {} ({} blocks, {pretty:.2})",
            received.path.display(),
            received.blocks
        )
        .green()
        .bold()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let cancel = CancelToken::new();
    ctrlc::set_handler({
        let cancel = cancel.clone();
        move || {
            eprintln!("\ninterrupt received, shutting down");
            cancel.cancel();
        }
    })
    .context("cannot install the Ctrl-C handler")?;

    match cli.command {
        Command::Send { port, baud, file } => send(&port, baud, &file, cancel),
        Command::Recv {
            port,
            baud,
            out_dir,
        } => recv(&port, baud, out_dir, cancel),
    }
}
