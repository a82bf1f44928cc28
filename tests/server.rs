use ravel::{Reactor, ServerConfig, WakeWriter};
use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::fs::PermissionsExt;
use std::thread;

struct TestServer {
    port: u16,
    writer: WakeWriter,
    handle: Option<thread::JoinHandle<()>>,
    root: tempfile::TempDir,
}

impl TestServer {
    fn spawn() -> Self {
        let root = tempfile::tempdir().unwrap();
        for (name, body) in [
            ("judge.html", "<html>judge</html>"),
            ("index.html", "<html>hello</html>"),
            ("register.html", "<html>register</html>"),
            ("log.html", "<html>log in</html>"),
            ("welcome.html", "<html>welcome</html>"),
        ] {
            fs::write(root.path().join(name), body).unwrap();
        }

        let mut config = ServerConfig::default();
        config.doc_root = root.path().to_path_buf();
        config.tick_secs = 1;
        config.max_connections = 32;
        config.queue_capacity = 32;
        config.workers = 2;

        let mut reactor = Reactor::new("127.0.0.1", 0, config).unwrap();
        let port = reactor.local_port().unwrap();
        let writer = reactor.wake_writer();
        let handle = thread::spawn(move || reactor.run().unwrap());
        Self {
            port,
            writer,
            handle: Some(handle),
            root,
        }
    }

    fn connect(&self) -> TcpStream {
        TcpStream::connect(("127.0.0.1", self.port)).unwrap()
    }

    /// Send one request and read until the server closes the socket.
    fn request(&self, req: &[u8]) -> String {
        let mut stream = self.connect();
        stream.write_all(req).unwrap();
        let mut res = String::new();
        stream.read_to_string(&mut res).unwrap();
        res
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.writer.request_stop();
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

/// Read exactly one response off a stream that stays open (keep-alive).
fn read_one_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut raw = Vec::new();
    let mut byte = [0u8; 1];
    while !raw.ends_with(b"\r\n\r\n") {
        assert_eq!(stream.read(&mut byte).unwrap(), 1, "eof inside headers");
        raw.push(byte[0]);
    }
    let headers = String::from_utf8(raw).unwrap();
    let content_length: usize = headers
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    let mut body = vec![0u8; content_length];
    stream.read_exact(&mut body).unwrap();
    (headers, body)
}

#[test]
fn test_serves_static_file() {
    let server = TestServer::spawn();
    let res = server.request(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.contains("Content-Length: 18\r\n"));
    assert!(res.contains("Connection: close\r\n"));
    assert!(res.ends_with("<html>hello</html>"));
}

#[test]
fn test_root_serves_default_document() {
    let server = TestServer::spawn();
    let res = server.request(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.ends_with("<html>judge</html>"));
}

#[test]
fn test_missing_file_is_404() {
    let server = TestServer::spawn();
    let res = server.request(b"GET /nope.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(res.contains("Connection: close\r\n"));
    assert!(res.ends_with("The requested file was not found on this server.\n"));
}

#[test]
fn test_unreadable_file_is_403() {
    let server = TestServer::spawn();
    let path = server.root.path().join("secret.html");
    fs::write(&path, "hidden").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o200)).unwrap();

    let res = server.request(b"GET /secret.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 403 Forbidden\r\n"));
}

#[test]
fn test_directory_target_is_400() {
    let server = TestServer::spawn();
    fs::create_dir(server.root.path().join("sub")).unwrap();
    let res = server.request(b"GET /sub HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[test]
fn test_malformed_request_is_400() {
    let server = TestServer::spawn();
    let res = server.request(b"NONSENSE\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(res.contains("Connection: close\r\n"));
}

#[test]
fn test_keep_alive_serves_two_requests() {
    let server = TestServer::spawn();
    let mut stream = server.connect();

    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n")
        .unwrap();
    let (headers, body) = read_one_response(&mut stream);
    assert!(headers.contains("Connection: keep-alive\r\n"));
    assert_eq!(body, b"<html>hello</html>");

    // Same socket, second request.
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let (headers, body) = read_one_response(&mut stream);
    assert!(headers.contains("Connection: close\r\n"));
    assert_eq!(body, b"<html>judge</html>");
}

#[test]
fn test_head_sends_headers_only() {
    let server = TestServer::spawn();
    let res = server.request(b"HEAD /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.contains("Content-Length: 18\r\n"));
    assert!(res.ends_with("\r\n\r\n"), "no body after headers: {:?}", res);
}

#[test]
fn test_register_then_login() {
    let server = TestServer::spawn();

    let body = "user=yim&password=1234";
    let res = server.request(
        format!(
            "POST /3 HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .as_bytes(),
    );
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.ends_with("<html>log in</html>"), "registration lands on the login page");

    let res = server.request(
        format!(
            "POST /2 HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .as_bytes(),
    );
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.ends_with("<html>welcome</html>"));
}

#[test]
fn test_route_suffixes_resolve_to_pages() {
    let server = TestServer::spawn();
    let res = server.request(b"GET /0 HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.ends_with("<html>register</html>"));
    let res = server.request(b"GET /1 HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(res.ends_with("<html>log in</html>"));
}

#[test]
fn test_idle_connection_is_evicted() {
    let server = TestServer::spawn();
    let mut stream = server.connect();

    // Never send a byte; the sweep closes us after 3 ticks (3s here).
    let mut buf = [0u8; 16];
    stream
        .set_read_timeout(Some(std::time::Duration::from_secs(10)))
        .unwrap();
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(n, 0, "server should close the idle connection");
}

#[test]
fn test_request_split_across_packets() {
    let server = TestServer::spawn();
    let mut stream = server.connect();
    stream.write_all(b"GET /index.h").unwrap();
    stream.flush().unwrap();
    thread::sleep(std::time::Duration::from_millis(20));
    stream.write_all(b"tml HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();

    let mut res = String::new();
    stream.read_to_string(&mut res).unwrap();
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.ends_with("<html>hello</html>"));
}
