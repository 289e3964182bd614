use std::fs;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use sockline::app::echo::EchoWorker;
use sockline::app::file_server::FileServer;
use sockline::config::{ServerConfig, SocketConfig};
use sockline::net::{Family, SocketHandle, SocketOption};
use sockline::resource::file::FileResolver;
use sockline::server::ServerError;
use sockline::server::forking::{ForkingServer, Isolation};
use sockline::server::listener::bind_listener;
use tempfile::TempDir;

const README: &[u8] = b"Sockline serves files over a line protocol.";

fn listener(accept_timeout: Option<Duration>) -> SocketHandle {
    let socket = SocketHandle::create(Family::Ipv4).unwrap();
    socket.set_option(SocketOption::ReuseAddress(true)).unwrap();
    socket.set_option(SocketOption::RecvTimeout(accept_timeout)).unwrap();
    socket.bind(Ipv4Addr::LOCALHOST.into(), 0).unwrap();
    socket
}

fn serving_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("readme.txt"), README).unwrap();
    dir
}

/// Runs a threaded file server in the background and returns its address.
fn spawn_file_server(root: &TempDir) -> (SocketAddr, thread::JoinHandle<()>, sockline::server::ShutdownHandle) {
    let mut server = ForkingServer::new(Isolation::Thread);
    server.open(listener(Some(Duration::from_millis(50))), 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();
    let shutdown = server.shutdown_handle();

    let worker = FileServer::new(FileResolver::sandboxed(root.path()).unwrap()).with_chunk_size(16);
    let handle = thread::spawn(move || {
        server.handle(worker).unwrap();
        assert!(server.is_closed());
    });
    (addr, handle, shutdown)
}

fn request(addr: SocketAddr, line: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(line).unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    response
}

#[test]
fn test_file_server_responses() {
    let root = serving_root();
    let (addr, handle, shutdown) = spawn_file_server(&root);

    let mut expected = format!("OK {}\r\n", README.len()).into_bytes();
    expected.extend_from_slice(README);
    assert_eq!(request(addr, b"GET /readme.txt\r\n"), expected);

    assert_eq!(request(addr, b"GET /missing.txt\r\n"), b"ERR 404 Not Found\r\n");
    assert_eq!(request(addr, b"FOO /x\r\n"), b"ERR 400 Bad Request\r\n");
    assert_eq!(request(addr, b"GET\r\n"), b"ERR 400 Bad Request\r\n");
    assert_eq!(request(addr, b"GET /../../etc/passwd\r\n"), b"ERR 403 Forbidden\r\n");
    assert_eq!(request(addr, b"GET /\r\n"), b"ERR 403 Forbidden\r\n");

    shutdown.request();
    handle.join().unwrap();
}

#[test]
fn test_file_server_request_without_line_ending() {
    let root = serving_root();
    let (addr, handle, shutdown) = spawn_file_server(&root);

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"get /readme.txt").unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    assert!(response.starts_with(format!("OK {}\r\n", README.len()).as_bytes()));
    assert!(response.ends_with(README));

    shutdown.request();
    handle.join().unwrap();
}

#[test]
fn test_accept_timeouts_do_not_stop_the_loop() {
    let root = serving_root();
    let mut server = ForkingServer::new(Isolation::Thread);
    server.open(listener(Some(Duration::from_millis(20))), 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();

    let worker = Arc::new(FileServer::new(FileResolver::sandboxed(root.path()).unwrap()));
    for _ in 0..3 {
        assert!(!server.accept_once(&worker).unwrap());
    }
    assert!(!server.is_closed());
    assert_eq!(server.error_count(), 0);

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"GET /readme.txt\r\n").unwrap();

    let mut dispatched = false;
    for _ in 0..50 {
        if server.accept_once(&worker).unwrap() {
            dispatched = true;
            break;
        }
    }
    assert!(dispatched);
    assert_eq!(server.dispatched(), 1);

    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    assert!(response.ends_with(README));
    assert_eq!(server.error_count(), 0);
}

#[test]
fn test_worker_errors_are_queued() {
    let mut server = ForkingServer::new(Isolation::Thread);
    server.open(listener(Some(Duration::from_millis(20))), 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();

    let worker = Arc::new(|_client: SocketHandle| -> anyhow::Result<()> { anyhow::bail!("worker exploded") });

    let client = TcpStream::connect(addr).unwrap();
    while !server.accept_once(&worker).unwrap() {}
    drop(client);

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.error_count() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }

    assert!(matches!(server.pop_last_error(), Some(ServerError::Worker(_))));
    assert_eq!(server.error_count(), 0);
    assert!(!server.is_closed());
}

#[test]
fn test_shutdown_unblocks_accept() {
    let mut server = ForkingServer::new(Isolation::Thread);
    server.open(listener(None), 16).unwrap();
    let shutdown = server.shutdown_handle();

    let handle = thread::spawn(move || {
        let result = server.handle(EchoWorker::default());
        (result, server.is_closed())
    });

    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    shutdown.request();

    let (result, closed) = handle.join().unwrap();
    assert!(result.is_ok());
    assert!(closed);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_handle_requires_open_server() {
    let mut server = ForkingServer::new(Isolation::Thread);

    assert!(matches!(server.handle(EchoWorker::default()), Err(ServerError::NotOpen)));
    assert!(matches!(server.local_name(), Err(ServerError::NotOpen)));
}

#[test]
fn test_open_twice_fails() {
    let mut server = ForkingServer::new(Isolation::Thread);
    server.open(listener(None), 16).unwrap();

    let second = listener(None);
    assert!(matches!(server.open(second, 16), Err(ServerError::AlreadyOpen)));

    server.close();
    server.close();
    assert!(server.is_closed());
}

#[test]
fn test_echo_worker_on_thread() {
    let mut server = ForkingServer::new(Isolation::Thread);
    server.open(listener(Some(Duration::from_millis(50))), 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();
    let shutdown = server.shutdown_handle();

    let handle = thread::spawn(move || server.handle(EchoWorker::default()).unwrap());

    assert_eq!(request(addr, b"hello"), b"5 bytes received.\r\n");

    shutdown.request();
    handle.join().unwrap();
}

#[test]
fn test_bind_listener_from_config() {
    let server_cfg = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let socket_cfg = SocketConfig::default();

    let handle = bind_listener(&server_cfg, &socket_cfg).unwrap();
    assert_ne!(handle.local_name().unwrap().port, 0);

    let bad = ServerConfig {
        listen_addr: "not-an-address".to_string(),
        ..ServerConfig::default()
    };
    assert!(bind_listener(&bad, &socket_cfg).is_err());
}

#[test]
fn test_worker_errors_readable_after_handle_returns() {
    let mut server = ForkingServer::new(Isolation::Thread);
    server.open(listener(Some(Duration::from_millis(20))), 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();
    let shutdown = server.shutdown_handle();

    let handle = thread::spawn(move || {
        let worker = |_client: SocketHandle| -> anyhow::Result<()> { anyhow::bail!("worker exploded") };
        server.handle(worker).unwrap();
        server
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    // the worker drops the connection once it has failed
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();

    shutdown.request();
    let mut server = handle.join().unwrap();
    assert!(server.is_closed());

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.error_count() == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(matches!(server.pop_last_error(), Some(ServerError::Worker(_))));

    server.close();
    assert_eq!(server.error_count(), 0);
}
