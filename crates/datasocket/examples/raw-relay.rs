//! RAW relay: accept one raw producer and republish everything it sends to
//! any number of raw consumers.
//!
//! Run with:
//!   cargo run --example raw-relay --features logging -- --listen 4003 --publish 4004
//!
//! Feed it with e.g. `nc localhost 4003` and read with `nc localhost 4004`.
//! Stop with Ctrl-C.

use std::sync::{mpsc, Arc};

use clap::Parser;
use datasocket::logging::{init_logging, LogFormat, LogLevel};
use datasocket::{Format, Payload, RawFraming, ReceiveSocket, SendSocket, SocketConfig};

#[derive(Parser, Debug)]
#[command(about = "Relay raw byte blocks from one port to another")]
struct Args {
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port the producer connects to.
    #[arg(long, default_value_t = 4003)]
    listen: u16,

    /// Port consumers connect to.
    #[arg(long, default_value_t = 4004)]
    publish: u16,

    /// Read window for incoming raw data, in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    buffer: usize,

    /// Use 4-byte length prefixes instead of unframed raw bytes.
    #[arg(long)]
    length_prefixed: bool,

    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_format, args.log_level);

    let framing = if args.length_prefixed {
        RawFraming::LengthPrefixed
    } else {
        RawFraming::Unframed
    };
    let builder = SocketConfig::builder()
        .host(args.host)
        .format(Format::Raw)
        .raw_framing(framing)
        .verbose(true);

    let publisher = Arc::new(SendSocket::new(builder.clone().port(args.publish).build()?)?);
    publisher.start()?;

    let relay = Arc::clone(&publisher);
    let receiver = ReceiveSocket::with_handler(
        builder.port(args.listen).receive_buffer_size(args.buffer).build()?,
        move |payload: Payload| {
            if let Payload::Raw(bytes) = payload {
                relay.send_data(bytes);
            }
        },
    )?;
    receiver.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv()?;

    receiver.stop();
    publisher.stop();
    Ok(())
}
