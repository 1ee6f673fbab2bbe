//! Ringport Echo Server
//!
//! Single-threaded TCP echo server: every byte read is written back, and
//! the next read is only posted once the echo has been fully sent.
//!
//! A stats thread posts a closure onto the loop every few seconds through
//! `Remote`, so counters are read on the thread that owns them.
//!
//! Usage:
//!     cargo build --release -p ringport-echo
//!     ./target/release/ringport-echo [port] [max_conns]
//!
//! Test with:
//!     echo "hello" | nc localhost 9999
//!     for i in $(seq 1 100); do echo "ping $i" | nc -q0 localhost 9999 & done
//!
//! Tuning via env: RINGPORT_READ_BUFFER_SIZE, RINGPORT_SQ_ENTRIES,
//! RINGPORT_WRITE_GROWTH, RINGPORT_LOG_LEVEL=debug, ...

use ringport::{Context, ContextConfig, Handlers};
use ringport_core::{rp_error, rp_info, rp_println, rp_warn};

use nix::sys::signal::{signal, SigHandler, Signal};

use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9999);
    let max_conns: Option<usize> = args.get(2).and_then(|s| s.parse().ok());

    // Sends already use MSG_NOSIGNAL; this covers anything that doesn't.
    if let Err(e) = unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) } {
        rp_warn!("ringport-echo: ignoring SIGPIPE failed: {}", e);
    }

    let mut config = ContextConfig::from_env();
    if let Some(n) = max_conns {
        config = config.max_connections(n);
    }
    config.print();

    let mut ctx = match Context::init_with("0.0.0.0", port, config) {
        Ok(ctx) => ctx,
        Err(e) => {
            rp_error!("ringport-echo: init failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    ctx.set_handlers(
        Handlers::new()
            .on_connected(|io, conn| {
                if let Err(e) = io.async_read(conn) {
                    rp_warn!("ringport-echo: read on {}: {}", conn, e);
                }
            })
            .on_read(|io, conn, data| {
                if let Err(e) = io.async_write(conn, data) {
                    rp_warn!("ringport-echo: write on {}: {}", conn, e);
                }
            })
            .on_write(|io, conn, _| {
                if let Err(e) = io.async_read(conn) {
                    rp_warn!("ringport-echo: read on {}: {}", conn, e);
                }
            }),
    );

    let remote = match ctx.remote() {
        Ok(r) => r,
        Err(e) => {
            rp_error!("ringport-echo: remote setup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let start = Instant::now();
    let spawned = thread::Builder::new()
        .name("ringport-stats".into())
        .spawn(move || loop {
            thread::sleep(STATS_INTERVAL);
            let elapsed = start.elapsed().as_secs_f64();
            let posted = remote.post(move |io| {
                rp_println!(
                    "[{:.1}s] conns={} draining={} {}",
                    elapsed,
                    io.connection_count(),
                    io.draining_count(),
                    io.stats(),
                );
            });
            if let Err(e) = posted {
                rp_warn!("ringport-echo: stats post: {}", e);
            }
        });
    if let Err(e) = spawned {
        rp_warn!("ringport-echo: no stats thread: {}", e);
    }

    if let Err(e) = ctx.accept_incoming() {
        rp_error!("ringport-echo: accept failed: {}", e);
        return ExitCode::FAILURE;
    }
    rp_info!("ringport-echo: serving on port {}", port);

    let err = ctx.run();
    rp_error!("ringport-echo: {}", err);
    ExitCode::FAILURE
}
