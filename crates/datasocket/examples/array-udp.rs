//! ARRAY over UDP: one process, a receiver bound locally and a sender
//! publishing a growing 4x4 array to it.
//!
//! Run with:
//!   cargo run --example array-udp --features logging -- --count 20

use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use datasocket::logging::{init_logging, LogFormat, LogLevel};
use datasocket::payload::ndarray::{ArrayD, IxDyn};
use datasocket::{Format, Payload, ReceiveSocket, SendSocket, SocketConfig, Transport};

#[derive(Parser, Debug)]
#[command(about = "Send numeric arrays as datagram pairs")]
struct Args {
    #[arg(long, default_value_t = 4002)]
    port: u16,

    /// Number of arrays to send.
    #[arg(long, default_value_t = 10)]
    count: u32,

    /// Embed a send timestamp in every array payload.
    #[arg(long)]
    timestamp: bool,

    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_format, args.log_level);

    let config = SocketConfig::builder()
        .transport(Transport::Udp)
        .host("127.0.0.1")
        .port(args.port)
        .format(Format::Array)
        .include_timestamp(args.timestamp)
        .verbose(true)
        .build()?;

    let (tx, rx) = mpsc::channel();
    let receiver = ReceiveSocket::with_handler(config.clone(), move |payload: Payload| {
        let _ = tx.send(payload);
    })?;
    receiver.start()?;

    let sender = SendSocket::new(config)?;
    sender.start()?;

    for step in 0..args.count {
        let array = ArrayD::from_elem(IxDyn(&[4, 4]), f64::from(step));
        sender.send_data(array);

        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(payload) => {
                if let Some(bundle) = payload.as_array() {
                    let shape = bundle.data().map(|data| data.shape().to_vec());
                    println!(
                        "step {step}: shape {shape:?}, timestamp {:?}",
                        bundle.timestamp()
                    );
                }
            }
            Err(_) => println!("step {step}: nothing received (datagram lost?)"),
        }
    }

    sender.stop();
    receiver.stop();
    Ok(())
}
