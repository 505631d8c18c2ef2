use spindle::{Error, Runtime, RuntimeBuilder};

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

fn runtime() -> Runtime {
    RuntimeBuilder::new()
        .worker_threads(2)
        .build()
        .expect("Failed to build runtime")
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[test]
fn test_accept_and_exchange_lines() {
    let rt = runtime();
    let reactor = rt.reactor().expect("reactor enabled");

    let listener = reactor
        .listen(loopback())
        .wait()
        .expect("Failed to listen");
    let addr = listener.local_addr();
    assert_ne!(addr.port(), 0);

    let accepted = listener.accept();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).expect("Failed to connect");
        stream.write_all(b"hello\nworld\n").expect("Failed to write");

        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).expect("Failed to read");
        reply
    });

    let connection = accepted.wait().expect("Failed to accept");
    assert!(connection.peer_addr().ip().is_loopback());

    let first = connection.read_until(|b| b != b'\n').wait().unwrap();
    let second = connection.read_until(|b| b != b'\n').wait().unwrap();
    assert_eq!(first, b"hello\n");
    assert_eq!(second, b"world\n", "surplus bytes are kept for the next read");

    let written = connection.write(b"pong".to_vec()).wait().unwrap();
    assert_eq!(written, 4);

    assert_eq!(&client.join().expect("Client panicked"), b"pong");
}

#[test]
fn test_read_stays_pending_until_data_arrives() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let server = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let connection = reactor
        .connect(server.local_addr().unwrap())
        .wait()
        .expect("Failed to connect");
    let (mut peer, _) = server.accept().expect("Failed to accept");

    let read = connection.read_until(|b| b != b';');
    assert!(
        !read.timeout(Duration::from_millis(100)),
        "a silent connection must not settle the read"
    );

    peer.write_all(b"abc;def").unwrap();
    assert_eq!(read.wait().unwrap(), b"abc;");

    let rest = connection.read_exact(3).wait().unwrap();
    assert_eq!(rest, b"def");
}

#[test]
fn test_reads_are_served_in_order() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let connection = reactor
        .connect(server.local_addr().unwrap())
        .wait()
        .unwrap();
    let (mut peer, _) = server.accept().unwrap();

    let reads: Vec<_> = (0..4).map(|_| connection.read_exact(2)).collect();
    peer.write_all(b"aabbccdd").unwrap();

    let chunks: Vec<_> = reads.iter().map(|read| read.wait().unwrap()).collect();
    assert_eq!(chunks, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec(), b"dd".to_vec()]);
}

#[test]
fn test_large_write_completes() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let connection = reactor
        .connect(server.local_addr().unwrap())
        .wait()
        .unwrap();
    let (mut peer, _) = server.accept().unwrap();

    let payload: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let reader = thread::spawn(move || {
        let mut received = vec![0u8; expected.len()];
        peer.read_exact(&mut received).expect("Failed to read payload");
        received == expected
    });

    let written = connection.write(payload).wait().expect("Failed to write");
    assert_eq!(written, 4 * 1024 * 1024);
    assert!(reader.join().unwrap(), "payload arrived intact");
}

#[test]
fn test_eof_settles_with_partial_data() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let connection = reactor
        .connect(server.local_addr().unwrap())
        .wait()
        .unwrap();
    let (mut peer, _) = server.accept().unwrap();

    peer.write_all(b"partial").unwrap();
    peer.shutdown(Shutdown::Write).unwrap();

    let read = connection.read_until(|b| b != b'\n').wait().unwrap();
    assert_eq!(read, b"partial");

    let after = connection.read_until(|b| b != b'\n').wait().unwrap();
    assert!(after.is_empty(), "reads after end of stream settle empty");
}

#[test]
fn test_close_fails_pending_reads() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let connection = reactor
        .connect(server.local_addr().unwrap())
        .wait()
        .unwrap();
    let (_peer, _) = server.accept().unwrap();

    let read = connection.read_until(|_| true);
    connection.close().wait().expect("Failed to close");

    assert!(matches!(read.wait(), Err(Error::Closed)));
    assert!(connection.is_closed());

    let late = connection.write(b"late".to_vec());
    assert!(matches!(late.wait(), Err(Error::Closed)));
}

#[test]
fn test_closing_a_listener_fails_queued_accepts() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let listener = reactor.listen(loopback()).wait().unwrap();
    let first = listener.accept();
    let second = listener.accept();

    listener.close().wait().unwrap();

    assert!(matches!(first.wait(), Err(Error::Closed)));
    assert!(matches!(second.wait(), Err(Error::Closed)));
    assert!(matches!(listener.accept().wait(), Err(Error::Closed)));
}

#[test]
fn test_accept_waits_for_a_request() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let listener = reactor.listen(loopback()).wait().unwrap();
    let addr = listener.local_addr();

    // Queued in the kernel backlog until someone asks.
    let _early = TcpStream::connect(addr).expect("Failed to connect");
    thread::sleep(Duration::from_millis(50));

    let connection = listener.accept().wait().expect("Failed to accept");
    assert_eq!(connection.local_addr(), addr);
}

#[test]
fn test_refused_connect_fails_with_io_error() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let addr = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };

    let err = reactor.connect(addr).wait().unwrap_err();
    assert_eq!(err.io_kind(), Some(ErrorKind::ConnectionRefused));
}

#[test]
fn test_listen_on_busy_port_fails() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let err = reactor
        .listen(taken.local_addr().unwrap())
        .wait()
        .unwrap_err();

    assert_eq!(err.io_kind(), Some(ErrorKind::AddrInUse));
}

#[test]
fn test_panicking_predicate_fails_the_read() {
    let rt = runtime();
    let reactor = rt.reactor().unwrap();

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let connection = reactor
        .connect(server.local_addr().unwrap())
        .wait()
        .unwrap();
    let (mut peer, _) = server.accept().unwrap();
    peer.write_all(b"x\n").unwrap();

    let read = connection.read_until(|_| -> bool { panic!("bad predicate") });
    assert!(matches!(read.wait(), Err(Error::Panicked(_))));

    let line = connection.read_until(|b| b != b'\n').wait().unwrap();
    assert_eq!(line, b"x\n", "the input survives a failed read");
}

#[test]
fn test_shutdown_fails_outstanding_requests() {
    let mut rt = runtime();
    let reactor = rt.reactor().unwrap().clone();

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let connection = reactor
        .connect(server.local_addr().unwrap())
        .wait()
        .unwrap();
    let (_peer, _) = server.accept().unwrap();

    let read = connection.read_until(|_| true);
    rt.shutdown();

    assert!(matches!(read.wait(), Err(Error::Shutdown)));
    assert!(reactor.is_stopped());
    assert!(matches!(
        connection.read_exact(1).wait(),
        Err(Error::Shutdown)
    ));
    assert!(matches!(
        reactor.listen(loopback()).wait(),
        Err(Error::Shutdown)
    ));
}

#[test]
fn test_full_request_queue_rejects() {
    let rt = RuntimeBuilder::new()
        .worker_threads(1)
        .request_queue_capacity(2)
        .build()
        .unwrap();
    let reactor = rt.reactor().unwrap();

    let server = TcpListener::bind("127.0.0.1:0").unwrap();
    let connection = reactor
        .connect(server.local_addr().unwrap())
        .wait()
        .unwrap();
    let (_peer, _) = server.accept().unwrap();

    let reads: Vec<_> = (0..64).map(|_| connection.read_exact(1)).collect();

    let rejected = reads
        .iter()
        .filter(|read| matches!(read.peek(), Some(Err(Error::QueueFull))))
        .count();
    assert!(rejected > 0, "a silent peer cannot drain 64 reads through 2 slots");
}
