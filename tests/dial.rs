use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use parley::{error, CancelToken, Dialer, SocketConfig, Stack};

#[test]
fn dial_and_round_trip() {
    drop(env_logger::try_init());
    let stack = Stack::new().unwrap();
    let server = stack.listen("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();

    let echo = thread::spawn(move || {
        let (mut stream, _peer) = server.accept().unwrap();
        let mut buf = [0; 5];
        stream.read_exact(&mut buf).unwrap();
        stream.write_all(&buf).unwrap();
    });

    let mut client = stack.dial(addr).unwrap();
    client.write_all(b"ahoy!").unwrap();
    let mut buf = [0; 5];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ahoy!");
    echo.join().unwrap();
}

#[test]
fn dial_applies_socket_config() {
    drop(env_logger::try_init());
    let stack = Stack::new().unwrap();
    let server = stack.listen("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();

    let accepter = thread::spawn(move || server.accept().unwrap());

    let config = SocketConfig::new().nodelay(true).ttl(77);
    let client = Dialer::default().config(config).dial(&stack, addr).unwrap();
    assert!(client.nodelay().unwrap());
    assert_eq!(client.ttl().unwrap(), 77);
    accepter.join().unwrap();
}

#[test]
fn expired_deadline_fails_without_connecting() {
    drop(env_logger::try_init());
    let stack = Stack::new().unwrap();

    let err = Dialer::default()
        .deadline(Instant::now() - Duration::from_secs(1))
        .dial(&stack, "127.0.0.1:1")
        .unwrap_err();
    assert!(error::is_timeout(&err));
}

#[test]
fn canceled_before_start_fails_with_canceled() {
    drop(env_logger::try_init());
    let stack = Stack::new().unwrap();

    let token = CancelToken::new();
    token.cancel();
    let err = Dialer::default()
        .dial_with_cancel(&stack, "127.0.0.1:1", &token)
        .unwrap_err();
    assert!(error::is_canceled(&err));
    assert!(!error::is_timeout(&err));
}

#[test]
fn unresolvable_target_is_invalid_input() {
    drop(env_logger::try_init());
    let stack = Stack::new().unwrap();

    let err = stack.dial("this is not an address").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn refused_connection_reports_the_connect_error() {
    drop(env_logger::try_init());
    let stack = Stack::new().unwrap();
    // Bind then drop to find a port with nothing listening on it.
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };

    let err = stack
        .dial_timeout(addr, Duration::from_secs(5))
        .unwrap_err();
    assert!(!error::is_canceled(&err));
    assert!(!error::is_closed(&err));
}

#[test]
fn timeout_and_cancellation_are_distinguishable() {
    drop(env_logger::try_init());
    let stack = Stack::new().unwrap();
    let server = stack.listen("127.0.0.1:0").unwrap();
    let addr = server.local_addr().unwrap();

    // Fill the accept backlog so later handshakes hang un-accepted. The
    // listener never accepts, so eventually SYNs go unanswered and a dial
    // blocks long enough for the timeout and cancel paths to engage.
    let mut backlog = Vec::new();
    for _ in 0..256 {
        match std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(100)) {
            Ok(s) => backlog.push(s),
            Err(_) => break,
        }
    }

    let timed_out = Dialer::default()
        .timeout(Duration::from_millis(100))
        .dial(&stack, addr);
    if let Err(e) = timed_out {
        assert!(!error::is_canceled(&e));
    }

    let token = CancelToken::new();
    let canceler = token.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        canceler.cancel();
    });
    let canceled = Dialer::default()
        .timeout(Duration::from_secs(30))
        .dial_with_cancel(&stack, addr, &token);
    if let Err(e) = canceled {
        assert!(error::is_canceled(&e));
        assert!(!error::is_timeout(&e));
    }
}
