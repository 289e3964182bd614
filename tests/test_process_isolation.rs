// Forked workers inherit every descriptor of the test process, so these
// tests live in their own binary.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::thread;
use std::time::Duration;

use sockline::app::echo::EchoWorker;
use sockline::net::{Family, SocketHandle, SocketOption};
use sockline::server::forking::{ForkingServer, Isolation};
use sockline::signal::ignore_child_exits;

#[test]
fn test_echo_worker_in_child_process() {
    ignore_child_exits().unwrap();

    let listener = SocketHandle::create(Family::Ipv4).unwrap();
    listener.set_option(SocketOption::ReuseAddress(true)).unwrap();
    listener
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_millis(50))))
        .unwrap();
    listener.bind(Ipv4Addr::LOCALHOST.into(), 0).unwrap();

    let mut server = ForkingServer::new(Isolation::Process);
    server.open(listener, 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();
    let shutdown = server.shutdown_handle();

    let handle = thread::spawn(move || {
        server.handle(EchoWorker::default()).unwrap();
        server.dispatched()
    });

    for payload in [&b"hello"[..], &b"forked world"[..]] {
        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(payload).unwrap();

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert_eq!(response, format!("{} bytes received.\r\n", payload.len()));
    }

    shutdown.request();
    assert_eq!(handle.join().unwrap(), 2);
}

#[test]
fn test_panicking_child_exits_and_server_keeps_dispatching() {
    ignore_child_exits().unwrap();

    let listener = SocketHandle::create(Family::Ipv4).unwrap();
    listener.set_option(SocketOption::ReuseAddress(true)).unwrap();
    listener
        .set_option(SocketOption::RecvTimeout(Some(Duration::from_millis(50))))
        .unwrap();
    listener.bind(Ipv4Addr::LOCALHOST.into(), 0).unwrap();

    let mut server = ForkingServer::new(Isolation::Process);
    server.open(listener, 16).unwrap();
    let addr = server.local_name().unwrap().socket_addr();
    let shutdown = server.shutdown_handle();

    let handle = thread::spawn(move || {
        let worker = |client: SocketHandle| -> anyhow::Result<()> {
            let data = client.read(64)?;
            if &data[..] == b"panic" {
                panic!("worker panicked on request");
            }
            client.write(b"ok")?;
            Ok(())
        };
        server.handle(worker).unwrap();
        server.dispatched()
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"panic").unwrap();
    // the child exits without replying
    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    assert!(response.is_empty());

    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(b"again").unwrap();
    let mut response = Vec::new();
    client.read_to_end(&mut response).unwrap();
    assert_eq!(response, b"ok");

    shutdown.request();
    assert_eq!(handle.join().unwrap(), 2);
}
