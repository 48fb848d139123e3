//! TEXT over TCP: a producer publishing a counter and a consumer printing it.
//!
//! Run the sender (server role) with:
//!   cargo run --example text-tcp --features logging -- send --port 4001
//!
//! In another terminal:
//!   cargo run --example text-tcp --features logging -- receive --port 4001
//!
//! Stop either side with Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use datasocket::logging::{init_logging, LogFormat, LogLevel};
use datasocket::{Format, Payload, ReceiveSocket, Role, SendSocket, SocketConfig};
use serde_json::json;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    Send,
    Receive,
}

#[derive(Parser, Debug)]
#[command(about = "Exchange JSON values over TCP")]
struct Args {
    mode: Mode,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value_t = 4001)]
    port: u16,

    /// Milliseconds between published values.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_format, args.log_level);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let builder = SocketConfig::builder()
        .host(args.host)
        .port(args.port)
        .verbose(true);

    match args.mode {
        Mode::Send => {
            let socket = SendSocket::new(builder.format(Format::Text).build()?)?;
            socket.start()?;

            let mut count = 0u64;
            while running.load(Ordering::SeqCst) {
                socket.send_data(json!({ "count": count, "values": [1, 2, 3] }));
                count += 1;
                std::thread::sleep(Duration::from_millis(args.interval_ms));
            }
            socket.stop();
        }
        Mode::Receive => {
            let config = builder.role(Role::Client).build()?;
            let socket = ReceiveSocket::with_handler(config, |payload: Payload| {
                if let Some(value) = payload.as_text() {
                    println!("{value}");
                }
            })?;
            socket.start()?;

            while running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(50));
            }
            socket.stop();
        }
    }

    Ok(())
}
