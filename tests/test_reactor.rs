use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use sockline::app::chat::ChatHandler;
use sockline::net::{Family, SocketHandle, SocketName, SocketOption};
use sockline::server::reactor::{ConnectionHandler, ConnectionId, DataOptions, ReactorServer};
use sockline::server::{ServerError, ShutdownHandle};

#[derive(Default)]
struct Recorder {
    accepted: Vec<ConnectionId>,
    received: Vec<(ConnectionId, Vec<u8>)>,
    closed: Vec<ConnectionId>,
    options: Option<DataOptions>,
    echo: bool,
}

impl ConnectionHandler for Recorder {
    fn on_accept(&mut self, id: ConnectionId, _peer: &SocketName) -> Option<Vec<u8>> {
        self.accepted.push(id);
        None
    }

    fn on_data(
        &mut self,
        data: &[u8],
        id: ConnectionId,
        _peer: &SocketName,
        options: &mut DataOptions,
    ) -> Option<Vec<u8>> {
        self.received.push((id, data.to_vec()));
        if let Some(overrides) = self.options {
            *options = overrides;
        }
        self.echo.then(|| data.to_vec())
    }

    fn on_close(&mut self, id: ConnectionId, _peer: &SocketName) {
        self.closed.push(id);
    }
}

fn bound_listener() -> SocketHandle {
    let listener = SocketHandle::create(Family::Ipv4).unwrap();
    listener.set_option(SocketOption::ReuseAddress(true)).unwrap();
    listener.bind(Ipv4Addr::LOCALHOST.into(), 0).unwrap();
    listener
}

fn open_server() -> ReactorServer {
    let mut server = ReactorServer::new().with_select_timeout(Duration::from_millis(10));
    server.open(bound_listener(), 16).unwrap();
    server
}

fn connect(server: &ReactorServer) -> TcpStream {
    let addr = server.local_name().unwrap().socket_addr();
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

fn pump_until<H: ConnectionHandler>(
    server: &mut ReactorServer,
    handler: &mut H,
    done: impl Fn(&ReactorServer, &H) -> bool,
) {
    for _ in 0..500 {
        if done(server, handler) {
            return;
        }
        server.run_once(handler).unwrap();
    }
    panic!("reactor did not reach the expected state");
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line
}

#[test]
fn test_run_once_requires_open_server() {
    let mut server = ReactorServer::new();
    let mut handler = Recorder::default();

    assert!(matches!(server.run_once(&mut handler), Err(ServerError::NotOpen)));
    assert!(matches!(server.handle(&mut handler), Err(ServerError::NotOpen)));
    assert!(matches!(server.local_name(), Err(ServerError::NotOpen)));
}

#[test]
fn test_open_twice_fails() {
    let mut server = open_server();
    let other = SocketHandle::create(Family::Ipv4).unwrap();

    assert!(matches!(server.open(other, 1), Err(ServerError::AlreadyOpen)));
    assert!(!server.is_closed());
}

#[test]
fn test_open_failure_leaves_server_closed() {
    let mut listener = SocketHandle::create(Family::Ipv4).unwrap();
    listener.close();

    let mut server = ReactorServer::new();
    let result = server.open(listener, 16);

    assert!(matches!(result, Err(ServerError::Unavailable(_))));
    assert!(server.is_closed());
}

#[test]
fn test_close_is_idempotent() {
    let mut server = open_server();
    server.close();
    server.close();

    assert!(server.is_closed());
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_idle_passes_keep_server_open() {
    let mut server = open_server();
    let mut handler = Recorder::default();

    for _ in 0..5 {
        server.run_once(&mut handler).unwrap();
    }

    assert!(!server.is_closed());
    assert!(server.errors().is_empty());
    assert!(handler.accepted.is_empty());
}

#[test]
fn test_connections_registered_in_order() {
    let mut server = open_server();
    let mut handler = Recorder::default();

    let _clients: Vec<TcpStream> = (0..3)
        .map(|_| {
            let client = connect(&server);
            let expected = server.connection_count() + 1;
            pump_until(&mut server, &mut handler, |s, _| s.connection_count() == expected);
            client
        })
        .collect();

    let ids = vec![ConnectionId(1), ConnectionId(2), ConnectionId(3)];
    assert_eq!(server.connection_ids(), ids);
    assert_eq!(handler.accepted, ids);
}

#[test]
fn test_peer_close_deregisters_connection() {
    let mut server = open_server();
    let mut handler = Recorder::default();

    let a = connect(&server);
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 1);
    let _b = connect(&server);
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 2);

    drop(a);
    pump_until(&mut server, &mut handler, |_, h| !h.closed.is_empty());

    assert_eq!(handler.closed, vec![ConnectionId(1)]);
    assert_eq!(server.connection_ids(), vec![ConnectionId(2)]);
    assert!(handler.received.is_empty());
    assert!(server.errors().is_empty());
}

#[test]
fn test_reply_then_close_when_keep_alive_cleared() {
    let mut server = open_server();
    let mut handler = Recorder {
        echo: true,
        options: Some(DataOptions {
            keep_alive: false,
            ..DataOptions::default()
        }),
        ..Recorder::default()
    };

    let mut client = connect(&server);
    client.write_all(b"bye\r\n").unwrap();
    pump_until(&mut server, &mut handler, |_, h| !h.closed.is_empty());

    let mut reply = String::new();
    client.read_to_string(&mut reply).unwrap();
    assert_eq!(reply, "bye\r\n");
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_broadcast_reaches_open_connections_only() {
    let mut server = open_server();
    let mut handler = Recorder {
        echo: true,
        options: Some(DataOptions {
            broadcast: true,
            ..DataOptions::default()
        }),
        ..Recorder::default()
    };

    let mut a = connect(&server);
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 1);
    let mut b = connect(&server);
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 2);
    let c = connect(&server);
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 3);

    drop(c);
    pump_until(&mut server, &mut handler, |_, h| h.closed == vec![ConnectionId(3)]);

    a.write_all(b"msg").unwrap();
    pump_until(&mut server, &mut handler, |_, h| !h.received.is_empty());

    let mut buf = [0u8; 3];
    a.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"msg");
    b.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"msg");

    assert_eq!(handler.received, vec![(ConnectionId(1), b"msg".to_vec())]);
    assert!(server.errors().is_empty());
}

#[test]
fn test_chat_greets_new_connection() {
    let mut server = open_server();
    let mut handler = ChatHandler::new();

    let client = connect(&server);
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 1);

    let mut reader = BufReader::new(client);
    assert_eq!(read_line(&mut reader), "[sys] Welcome user guest-1.\r\n");
    assert_eq!(handler.nickname(ConnectionId(1)), Some("guest-1"));
}

#[test]
fn test_chat_session_end_to_end() {
    let server = open_server();
    let addr = server.local_name().unwrap().socket_addr();
    let shutdown = server.shutdown_handle();

    let worker = thread::spawn(move || {
        let mut server = server;
        let mut handler = ChatHandler::new();
        server.handle(&mut handler).unwrap();
        assert!(server.is_closed());
        handler
    });

    let connect = || {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let writer = stream.try_clone().unwrap();
        (BufReader::new(stream), writer)
    };

    let (mut a, mut a_out) = connect();
    assert_eq!(read_line(&mut a), "[sys] Welcome user guest-1.\r\n");
    let (mut b, mut b_out) = connect();
    assert_eq!(read_line(&mut b), "[sys] Welcome user guest-2.\r\n");

    a_out.write_all(b"hello there\r\n").unwrap();
    assert_eq!(read_line(&mut b), "<guest-1> hello there\r\n");

    // the sender gets no copy of its own message, so the next line is the /who reply
    a_out.write_all(b"/who\r\n").unwrap();
    assert_eq!(read_line(&mut a), "[sys] Online: guest-1 guest-2\r\n");

    b_out.write_all(b"/nick bob\r\n").unwrap();
    assert_eq!(read_line(&mut b), "[sys] Successfully changed nickname.\r\n");
    b_out.write_all(b"hi\r\n").unwrap();
    assert_eq!(read_line(&mut a), "<bob> hi\r\n");

    a_out.write_all(b"/quit\r\n").unwrap();
    assert_eq!(read_line(&mut a), "[sys] Bye.\r\n");
    assert_eq!(read_line(&mut a), "");

    shutdown.request();
    let handler = worker.join().unwrap();

    assert_eq!(handler.nickname(ConnectionId(1)), None);
    assert_eq!(handler.nickname(ConnectionId(2)), Some("bob"));
}

#[test]
fn test_handle_returns_after_shutdown_request() {
    let server = open_server();
    let shutdown = server.shutdown_handle();

    let worker = thread::spawn(move || {
        let mut server = server;
        let mut handler = Recorder::default();
        let result = server.handle(&mut handler);
        (result, server.is_closed())
    });

    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    shutdown.request();

    let (result, closed) = worker.join().unwrap();
    assert!(result.is_ok());
    assert!(closed);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_one_pass_drains_every_pending_connection() {
    let mut server = open_server();
    let mut handler = Recorder::default();

    let _clients: Vec<TcpStream> = (0..3).map(|_| connect(&server)).collect();
    thread::sleep(Duration::from_millis(50));

    // the drain ends when accept would block, which must not count as a failure
    server.run_once(&mut handler).unwrap();
    assert_eq!(server.connection_count(), 3);

    // later passes wait again instead of failing on the drained listener
    let mut late = connect(&server);
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 4);
    late.write_all(b"ping").unwrap();
    pump_until(&mut server, &mut handler, |_, h| !h.received.is_empty());

    assert!(!server.is_closed());
    assert!(server.errors().is_empty());
    assert_eq!(handler.received, vec![(ConnectionId(4), b"ping".to_vec())]);
}

extern "C" fn ignore_signal(_: libc::c_int) {}

#[test]
fn test_interrupted_waits_keep_loop_running() {
    let action = SigAction::new(SigHandler::Handler(ignore_signal), SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(Signal::SIGUSR1, &action) }.unwrap();

    let mut server = ReactorServer::new().with_select_timeout(Duration::from_secs(30));
    server.open(bound_listener(), 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();

    let (id_tx, id_rx) = mpsc::channel();
    let (pass_tx, pass_rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        id_tx.send(unsafe { libc::pthread_self() }).unwrap();
        let mut handler = Recorder::default();
        while handler.accepted.is_empty() {
            server.run_once(&mut handler).unwrap();
            let _ = pass_tx.send(());
        }
        (server, handler)
    });
    let thread_id = id_rx.recv().unwrap();

    // with no client and a long timeout, only an interrupted wait ends a pass
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut interrupted = 0;
    while interrupted < 3 {
        assert!(Instant::now() < deadline, "waits were not interrupted");
        unsafe { libc::pthread_kill(thread_id, libc::SIGUSR1) };
        if pass_rx.recv_timeout(Duration::from_millis(50)).is_ok() {
            interrupted += 1;
        }
    }

    let _client = TcpStream::connect(addr).unwrap();
    let (server, handler) = worker.join().unwrap();

    assert!(!server.is_closed());
    assert!(server.errors().is_empty());
    assert_eq!(handler.accepted, vec![ConnectionId(1)]);
}

struct Notifier {
    events: mpsc::Sender<&'static str>,
}

impl ConnectionHandler for Notifier {
    fn on_accept(&mut self, _id: ConnectionId, _peer: &SocketName) -> Option<Vec<u8>> {
        let _ = self.events.send("accept");
        None
    }

    fn on_data(
        &mut self,
        _data: &[u8],
        _id: ConnectionId,
        _peer: &SocketName,
        _options: &mut DataOptions,
    ) -> Option<Vec<u8>> {
        None
    }

    fn on_close(&mut self, _id: ConnectionId, _peer: &SocketName) {
        let _ = self.events.send("close");
    }
}

#[test]
fn test_errors_from_handle_survive_its_return() {
    let server = open_server();
    let addr = server.local_name().unwrap().socket_addr();
    let shutdown = server.shutdown_handle();

    let (tx, events) = mpsc::channel();
    let worker = thread::spawn(move || {
        let mut server = server;
        server.handle(&mut Notifier { events: tx }).unwrap();
        server
    });

    let client = TcpStream::connect(addr).unwrap();
    assert_eq!(events.recv_timeout(Duration::from_secs(5)), Ok("accept"));

    // a zero linger makes the close a reset, so the server's read fails
    let client = socket2::Socket::from(client);
    client.set_linger(Some(Duration::ZERO)).unwrap();
    drop(client);
    assert_eq!(events.recv_timeout(Duration::from_secs(5)), Ok("close"));

    shutdown.request();
    let mut server = worker.join().unwrap();

    assert!(server.is_closed());
    assert!(
        server
            .errors()
            .iter()
            .any(|e| matches!(e, ServerError::Connection { conn: ConnectionId(1), .. }))
    );
    assert!(server.pop_last_error().is_some());

    server.close();
    assert!(server.errors().is_empty());
}

#[test]
fn test_reset_shutdown_handle_drives_another_run() {
    let shutdown = ShutdownHandle::new();
    let mut server = ReactorServer::new()
        .with_select_timeout(Duration::from_millis(10))
        .with_shutdown(shutdown.clone());

    server.open(bound_listener(), 16).unwrap();
    shutdown.request();
    server.handle(&mut Recorder::default()).unwrap();
    assert!(server.is_closed());

    // a request made before the run still stops it
    server.open(bound_listener(), 16).unwrap();
    server.handle(&mut Recorder::default()).unwrap();
    assert!(server.is_closed());

    shutdown.reset();
    assert!(!shutdown.is_requested());

    server.open(bound_listener(), 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();
    let worker = thread::spawn(move || {
        let mut handler = ChatHandler::new();
        server.handle(&mut handler).unwrap();
    });

    let client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut reader = BufReader::new(client);
    assert!(read_line(&mut reader).starts_with("[sys] Welcome user guest-"));

    shutdown.request();
    worker.join().unwrap();
}
