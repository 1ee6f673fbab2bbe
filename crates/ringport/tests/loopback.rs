//! End-to-end over a real io_uring and loopback TCP.
//!
//! Skips (passes) when io_uring is unavailable, e.g. in containers with
//! io_uring disabled by seccomp.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use ringport::{ConnId, Context, ContextConfig, Handlers, RingportError};

const DEADLINE: Duration = Duration::from_secs(10);
const TICK: Option<Duration> = Some(Duration::from_millis(50));

fn server() -> Option<Context> {
    match Context::init_with("127.0.0.1", 0, ContextConfig::new().max_connections(16)) {
        Ok(ctx) => Some(ctx),
        Err(RingportError::QueueSetup(e)) => {
            eprintln!("io_uring unavailable (errno {}), skipping", e);
            None
        }
        Err(e) => panic!("context init: {}", e),
    }
}

fn client() -> Option<Context> {
    match Context::client(ContextConfig::new()) {
        Ok(ctx) => Some(ctx),
        Err(RingportError::QueueSetup(_)) => None,
        Err(e) => panic!("context init: {}", e),
    }
}

/// Poll until `done()` or the deadline.
fn drive(ctx: &mut Context, done: impl Fn() -> bool) {
    let start = Instant::now();
    while !done() {
        assert!(start.elapsed() < DEADLINE, "timed out");
        ctx.poll(TICK).unwrap();
    }
}

#[test]
fn test_echo_round_trip() {
    let Some(mut ctx) = server() else { return };
    let addr = ctx.local_addr().unwrap();

    let closed: Rc<RefCell<Vec<ConnId>>> = Rc::default();
    let seen = closed.clone();
    ctx.set_handlers(
        Handlers::new()
            .on_connected(|io, conn| io.async_read(conn).unwrap())
            .on_read(|io, conn, data| io.async_write(conn, data).unwrap())
            .on_write(|io, conn, _| io.async_read(conn).unwrap())
            .on_disconnected(move |_, conn| seen.borrow_mut().push(conn)),
    );
    ctx.accept_incoming().unwrap();

    let peer = thread::spawn(move || {
        let mut s = TcpStream::connect(addr).unwrap();
        for msg in [&b"hello"[..], b"ringport", b"!"] {
            s.write_all(msg).unwrap();
            let mut back = vec![0u8; msg.len()];
            s.read_exact(&mut back).unwrap();
            assert_eq!(back, msg);
        }
    });

    drive(&mut ctx, || !closed.borrow().is_empty());
    peer.join().unwrap();

    assert_eq!(closed.borrow().len(), 1);
    assert_eq!(ctx.io().connection_count(), 0);
    let stats = ctx.io().stats().clone();
    assert_eq!(stats.accepts, 1);
    assert_eq!(stats.bytes_in, 14);
    assert_eq!(stats.bytes_out, 14);
}

#[test]
fn test_large_write_completes_once() {
    let Some(mut ctx) = server() else { return };
    let addr = ctx.local_addr().unwrap();
    const SIZE: usize = 8 * 1024 * 1024;

    let writes = Rc::new(RefCell::new(Vec::new()));
    let w = writes.clone();
    ctx.set_handlers(
        Handlers::new()
            .on_connected(|io, conn| io.async_write(conn, &vec![0xA5u8; SIZE]).unwrap())
            .on_write(move |io, conn, _| {
                w.borrow_mut().push(io.connection(conn).unwrap().total_bytes());
            }),
    );
    ctx.accept_incoming().unwrap();

    let peer = thread::spawn(move || {
        let mut s = TcpStream::connect(addr).unwrap();
        let mut got = vec![0u8; SIZE];
        s.read_exact(&mut got).unwrap();
        assert!(got.iter().all(|&b| b == 0xA5));
    });

    drive(&mut ctx, || !writes.borrow().is_empty());
    peer.join().unwrap();
    assert_eq!(*writes.borrow(), vec![SIZE]);
}

#[test]
fn test_async_connect() {
    let Some(mut ctx) = client() else { return };
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let peer = thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        s.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    });

    let sent = Rc::new(RefCell::new(false));
    let flag = sent.clone();
    ctx.set_handlers(
        Handlers::new()
            .on_connected(|io, conn| io.async_write(conn, b"ping").unwrap())
            .on_write(move |_, _, n| {
                assert_eq!(n, 4);
                *flag.borrow_mut() = true;
            }),
    );
    let id = ctx.io().async_connect(addr).unwrap();

    drive(&mut ctx, || *sent.borrow());
    peer.join().unwrap();
    assert_eq!(ctx.io().connection(id).unwrap().peer_addr(), Some(addr));
}

#[test]
fn test_remote_post_wakes_loop() {
    let Some(mut ctx) = client() else { return };
    let remote = ctx.remote().unwrap();

    let poster = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        remote.post(|io| io.queue_mut().flush().map(drop).unwrap()).unwrap();
        remote.pending()
    });

    // blocks in the ring until the eventfd read completes
    assert!(ctx.poll(Some(DEADLINE)).unwrap());
    assert!(poster.join().unwrap() <= 1);
}
