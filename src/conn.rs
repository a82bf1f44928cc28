//! Per-connection HTTP/1.1 protocol state machine.
//!
//! A `Conn` owns the read/write buffers for one socket and moves through
//! request-line → headers → content as bytes arrive, one nulled-in-place line
//! at a time. Completed requests resolve against the document root (with a
//! closed routing table for the canned pages) and assemble a response as a
//! scatter-gather pair of header bytes plus an optional mapped file region,
//! drained with vectored writes.
//!
//! Exactly one thread touches a `Conn` at a time; the oneshot re-arm
//! discipline in the reactor is what enforces that, not this module.

use crate::buffer::{LineStatus, READ_BUF_SIZE, ReadBuf, WRITE_BUF_SIZE, WriteBuf};
use crate::config::ServerConfig;
use crate::metrics::ServerMetrics;
use crate::store::CredentialPool;
use crate::syscalls::{self, MappedFile};
use std::net::SocketAddr;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace};

const ERROR_400_BODY: &[u8] =
    b"Your request has bad syntax or is inherently impossible to satisfy.\n";
const ERROR_403_BODY: &[u8] = b"You do not have permission to get file from this server.\n";
const ERROR_404_BODY: &[u8] = b"The requested file was not found on this server.\n";
const ERROR_500_BODY: &[u8] = b"There was an unusual problem serving the requested file.\n";
const EMPTY_FILE_BODY: &[u8] = b"<html><body></body></html>";

/// Fixed rejection text for a full connection slot pool; sent raw and the
/// socket closed, no further protocol guarantees.
pub const BUSY_TEXT: &[u8] = b"Internal server busy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckState {
    RequestLine,
    Headers,
    Content,
}

/// Result of feeding buffered bytes through the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Need more data from the socket.
    Incomplete,
    /// A full request is parsed and ready for resolution.
    Complete,
    /// Malformed input; the state machine will not be resumed.
    BadRequest,
}

/// Outcome of resolving a completed request against the filesystem.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    ServeFile,
    BadRequest,
    Forbidden,
    NotFound,
    InternalError,
}

/// What the worker's processing pass decided for the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Request still incomplete: re-arm for readable interest.
    ReArmRead,
    /// A response is staged: re-arm for writable interest.
    ReArmWrite,
    /// Nothing could be prepared; tear the connection down.
    Close,
}

/// Result of one drain attempt on the reactor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Would-block: wait for the next writable event, state untouched.
    Again,
    /// Response fully sent; reuse the connection.
    DoneKeepAlive,
    /// Response fully sent; close the connection.
    DoneClose,
    /// Hard send failure; tear down.
    Failed,
}

/// Fields accumulated while parsing one request.
#[derive(Default)]
struct RequestFields {
    method: Option<Method>,
    target: String,
    host: Option<String>,
    content_length: usize,
    keep_alive: bool,
}

pub struct Conn {
    pub fd: i32,
    /// Bumped on every release; queue entries carry the value they saw so a
    /// worker never re-arms a slot that was torn down or reused under it.
    pub generation: u64,
    pub peer: Option<SocketAddr>,

    read_buf: ReadBuf,
    write_buf: WriteBuf,
    check_state: CheckState,
    req: RequestFields,
    body_start: usize,
    body: Vec<u8>,

    mapped: Option<MappedFile>,
    file_len: usize,
    sent: usize,
}

impl Conn {
    pub fn empty() -> Self {
        Self {
            fd: -1,
            generation: 0,
            peer: None,
            read_buf: ReadBuf::new(READ_BUF_SIZE),
            write_buf: WriteBuf::new(WRITE_BUF_SIZE),
            check_state: CheckState::RequestLine,
            req: RequestFields::default(),
            body_start: 0,
            body: Vec::new(),
            mapped: None,
            file_len: 0,
            sent: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.fd < 0
    }

    /// Claim the slot for a freshly accepted socket.
    pub fn claim(&mut self, fd: i32, peer: SocketAddr) {
        self.fd = fd;
        self.peer = Some(peer);
        self.reset_for_reuse();
    }

    /// Release the slot: unmap, forget the descriptor, invalidate queued
    /// references to this slot. Closing the fd is the caller's job.
    pub fn release(&mut self) {
        self.fd = -1;
        self.peer = None;
        self.mapped = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Reset parse and response state for the next request on this socket.
    pub fn reset_for_reuse(&mut self) {
        self.read_buf.reset();
        self.write_buf.clear();
        self.check_state = CheckState::RequestLine;
        self.req = RequestFields::default();
        self.body_start = 0;
        self.body.clear();
        self.mapped = None;
        self.file_len = 0;
        self.sent = 0;
    }

    // ---- Read side (reactor thread) ----

    /// Drain the socket into the read buffer until would-block or full.
    ///
    /// `Ok(true)` means bytes may be waiting to parse; `Ok(false)` means the
    /// peer shut down in an orderly way. A hard receive failure is `Err`.
    pub fn fill_read_buf(&mut self) -> std::io::Result<bool> {
        loop {
            if self.read_buf.is_full() {
                return Ok(true);
            }
            match syscalls::read_nonblocking(self.fd, self.read_buf.spare_mut())? {
                None => return Ok(true),
                Some(0) => return Ok(false),
                Some(n) => self.read_buf.commit(n),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn ingest(&mut self, bytes: &[u8]) {
        self.read_buf.spare_mut()[..bytes.len()].copy_from_slice(bytes);
        self.read_buf.commit(bytes.len());
    }

    // ---- Parsing (worker thread) ----

    /// Run the outer parse loop over whatever the buffer holds.
    pub fn process_read(&mut self, default_document: &str) -> RequestStatus {
        loop {
            if self.check_state == CheckState::Content {
                if self.read_buf.read_pos() >= self.body_start + self.req.content_length {
                    let body = &self.read_buf.body()[..self.req.content_length];
                    self.body = body.to_vec();
                    return RequestStatus::Complete;
                }
                // A request that cannot complete within the buffer never will.
                return if self.read_buf.is_full() {
                    RequestStatus::BadRequest
                } else {
                    RequestStatus::Incomplete
                };
            }

            match self.read_buf.scan_line() {
                LineStatus::More => {
                    return if self.read_buf.is_full() {
                        RequestStatus::BadRequest
                    } else {
                        RequestStatus::Incomplete
                    };
                }
                LineStatus::Bad => return RequestStatus::BadRequest,
                LineStatus::Ready => {}
            }

            let status = match self.check_state {
                CheckState::RequestLine => {
                    let parsed = self.req.parse_request_line(self.read_buf.line(), default_document);
                    if parsed {
                        self.check_state = CheckState::Headers;
                        None
                    } else {
                        Some(RequestStatus::BadRequest)
                    }
                }
                CheckState::Headers => {
                    let line = self.read_buf.line();
                    if line.is_empty() {
                        if self.req.method == Some(Method::Head) {
                            Some(RequestStatus::Complete)
                        } else if self.req.content_length > 0 {
                            self.check_state = CheckState::Content;
                            None
                        } else {
                            Some(RequestStatus::Complete)
                        }
                    } else if self.req.parse_header(line) {
                        None
                    } else {
                        Some(RequestStatus::BadRequest)
                    }
                }
                CheckState::Content => unreachable!(),
            };

            self.read_buf.advance_line();
            if self.check_state == CheckState::Content {
                self.body_start = self.read_buf.checked_pos();
            }
            if let Some(status) = status {
                return status;
            }
        }
    }

    // ---- Resolution and response building (worker thread) ----

    /// Resolve the parsed request to a servable file or an error outcome.
    pub fn resolve(&mut self, config: &ServerConfig, store: &Arc<CredentialPool>) -> Outcome {
        let target = self.effective_target(store);
        let target = match target {
            Ok(t) => t,
            Err(outcome) => return outcome,
        };

        let full = config.doc_root.join(target.trim_start_matches('/'));
        let meta = match std::fs::metadata(&full) {
            Ok(m) => m,
            Err(_) => return Outcome::NotFound,
        };
        if meta.mode() & 0o004 == 0 {
            return Outcome::Forbidden;
        }
        if meta.is_dir() {
            return Outcome::BadRequest;
        }

        self.file_len = meta.len() as usize;
        if self.file_len > 0 {
            let file = match std::fs::File::open(&full) {
                Ok(f) => f,
                Err(_) => return Outcome::InternalError,
            };
            match MappedFile::map(file.as_raw_fd(), self.file_len) {
                Ok(m) => self.mapped = Some(m),
                Err(_) => return Outcome::InternalError,
            }
        }
        Outcome::ServeFile
    }

    /// Apply the closed routing table, consulting the credential store for
    /// the login/register POST routes.
    fn effective_target(&self, store: &Arc<CredentialPool>) -> Result<String, Outcome> {
        let target = self.req.target.as_str();
        let suffix = target
            .rfind('/')
            .and_then(|i| target[i + 1..].chars().next());

        if self.req.method == Some(Method::Post) && matches!(suffix, Some('2') | Some('3')) {
            let (user, password) = match parse_credentials(&self.body) {
                Some(pair) => pair,
                None => return Err(Outcome::BadRequest),
            };
            let guard = match store.acquire() {
                Ok(g) => g,
                Err(_) => return Err(Outcome::InternalError),
            };
            return if suffix == Some('2') {
                let ok = guard.verify(&user, &password);
                debug!(user = %user, ok, "login attempt");
                Ok("/welcome.html".to_string())
            } else {
                let ok = guard.register(&user, &password);
                debug!(user = %user, ok, "registration attempt");
                Ok("/log.html".to_string())
            };
        }

        Ok(match suffix {
            Some('0') => "/register.html".to_string(),
            Some('1') => "/log.html".to_string(),
            Some('5') => "/picture.html".to_string(),
            Some('6') => "/video.html".to_string(),
            Some('7') => "/fans.html".to_string(),
            _ => target.to_string(),
        })
    }

    /// Stage the response for `outcome`. `false` means nothing could be
    /// prepared (header buffer overflow) and the connection must close.
    pub fn build_response(&mut self, outcome: Outcome) -> bool {
        self.write_buf.clear();
        self.sent = 0;

        // Every failure closes the connection after the canned response.
        if outcome != Outcome::ServeFile {
            self.req.keep_alive = false;
            self.mapped = None;
            self.file_len = 0;
        }

        let mut ok = true;
        match outcome {
            Outcome::ServeFile => {
                ok &= self.write_buf.push(b"HTTP/1.1 200 OK\r\n");
                if self.req.method == Some(Method::Head) {
                    // Headers describe the file, but no body follows.
                    let len = self.file_len;
                    self.mapped = None;
                    self.file_len = 0;
                    ok &= self.push_common_headers(len);
                } else if self.file_len > 0 {
                    ok &= self.push_common_headers(self.file_len);
                } else {
                    ok &= self.push_common_headers(EMPTY_FILE_BODY.len());
                    ok &= self.write_buf.push(EMPTY_FILE_BODY);
                }
            }
            Outcome::BadRequest => {
                ok &= self.write_buf.push(b"HTTP/1.1 400 Bad Request\r\n");
                ok &= self.push_common_headers(ERROR_400_BODY.len());
                ok &= self.write_buf.push(ERROR_400_BODY);
            }
            Outcome::Forbidden => {
                ok &= self.write_buf.push(b"HTTP/1.1 403 Forbidden\r\n");
                ok &= self.push_common_headers(ERROR_403_BODY.len());
                ok &= self.write_buf.push(ERROR_403_BODY);
            }
            Outcome::NotFound => {
                ok &= self.write_buf.push(b"HTTP/1.1 404 Not Found\r\n");
                ok &= self.push_common_headers(ERROR_404_BODY.len());
                ok &= self.write_buf.push(ERROR_404_BODY);
            }
            Outcome::InternalError => {
                ok &= self.write_buf.push(b"HTTP/1.1 500 Internal Error\r\n");
                ok &= self.push_common_headers(ERROR_500_BODY.len());
                ok &= self.write_buf.push(ERROR_500_BODY);
            }
        }

        if !ok {
            self.mapped = None;
            self.file_len = 0;
        }
        ok
    }

    fn push_common_headers(&mut self, content_len: usize) -> bool {
        let mut ok = self.write_buf.push(b"Content-Length: ");
        ok &= self.write_buf.push_uint(content_len);
        ok &= self.write_buf.push(b"\r\n");
        ok &= self.write_buf.push(if self.req.keep_alive {
            b"Connection: keep-alive\r\n"
        } else {
            b"Connection: close\r\n"
        });
        ok &= self.write_buf.push(b"Date: ");
        ok &= self
            .write_buf
            .push(httpdate::fmt_http_date(SystemTime::now()).as_bytes());
        ok &= self.write_buf.push(b"\r\n\r\n");
        ok
    }

    /// Worker entry point: parse, resolve, build, and report what interest the
    /// descriptor should be re-armed with.
    pub fn process(
        &mut self,
        config: &ServerConfig,
        store: &Arc<CredentialPool>,
        metrics: &ServerMetrics,
    ) -> ProcessResult {
        let status = self.process_read(&config.default_document);
        let outcome = match status {
            RequestStatus::Incomplete => return ProcessResult::ReArmRead,
            RequestStatus::BadRequest => Outcome::BadRequest,
            RequestStatus::Complete => {
                metrics.inc_req();
                self.resolve(config, store)
            }
        };
        trace!(fd = self.fd, ?outcome, "request resolved");

        if self.build_response(outcome) {
            ProcessResult::ReArmWrite
        } else {
            ProcessResult::Close
        }
    }

    // ---- Write side (reactor thread) ----

    fn total_to_send(&self) -> usize {
        self.write_buf.len() + self.file_len
    }

    /// Vectored drain of [header bytes, mapped region].
    pub fn drain(&mut self, metrics: &ServerMetrics) -> WriteOutcome {
        let total = self.total_to_send();
        if total == 0 {
            return self.finish_write();
        }

        loop {
            let header = self.write_buf.as_slice();
            let sent = self.sent;
            let wrote = if sent < header.len() {
                match &self.mapped {
                    Some(m) => syscalls::writev_nonblocking(self.fd, &[&header[sent..], m.as_slice()]),
                    None => syscalls::writev_nonblocking(self.fd, &[&header[sent..]]),
                }
            } else {
                let file_off = sent - header.len();
                match &self.mapped {
                    Some(m) => syscalls::writev_nonblocking(self.fd, &[&m.as_slice()[file_off..]]),
                    None => Ok(Some(0)),
                }
            };

            match wrote {
                Ok(None) => return WriteOutcome::Again,
                Ok(Some(n)) => {
                    metrics.add_bytes(n);
                    self.sent += n;
                    if self.sent >= total {
                        return self.finish_write();
                    }
                    if n == 0 {
                        return WriteOutcome::Again;
                    }
                }
                Err(_) => {
                    self.mapped = None;
                    return WriteOutcome::Failed;
                }
            }
        }
    }

    fn finish_write(&mut self) -> WriteOutcome {
        self.mapped = None;
        self.file_len = 0;
        if self.req.keep_alive {
            self.reset_for_reuse();
            WriteOutcome::DoneKeepAlive
        } else {
            WriteOutcome::DoneClose
        }
    }

    #[cfg(test)]
    pub(crate) fn staged_header(&self) -> &[u8] {
        self.write_buf.as_slice()
    }

    #[cfg(test)]
    pub(crate) fn staged_file(&self) -> Option<&[u8]> {
        self.mapped.as_ref().map(|m| m.as_slice())
    }

    #[cfg(test)]
    pub(crate) fn parsed(&self) -> (Option<Method>, &str, Option<&str>, usize, bool, &[u8]) {
        (
            self.req.method,
            &self.req.target,
            self.req.host.as_deref(),
            self.req.content_length,
            self.req.keep_alive,
            &self.body,
        )
    }
}

impl RequestFields {
    /// `METHOD SP target SP HTTP/1.1`, tolerating an absolute-URI target.
    fn parse_request_line(&mut self, line: &[u8], default_document: &str) -> bool {
        let line = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let mut parts = line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) => (m, t, v),
            _ => return false,
        };
        if parts.next().is_some() {
            return false;
        }

        self.method = if method.eq_ignore_ascii_case("GET") {
            Some(Method::Get)
        } else if method.eq_ignore_ascii_case("POST") {
            Some(Method::Post)
        } else if method.eq_ignore_ascii_case("HEAD") {
            Some(Method::Head)
        } else {
            return false;
        };

        let mut target = target;
        for scheme in ["http://", "https://"] {
            if let Some(rest) = target.strip_prefix(scheme) {
                target = match rest.find('/') {
                    Some(i) => &rest[i..],
                    None => return false,
                };
                break;
            }
        }
        if !target.starts_with('/') {
            return false;
        }
        self.target = if target == "/" {
            format!("/{}", default_document)
        } else {
            target.to_string()
        };

        if !version.eq_ignore_ascii_case("HTTP/1.1") {
            return false;
        }
        true
    }

    /// One non-empty header line. Unrecognized headers are ignored.
    fn parse_header(&mut self, line: &[u8]) -> bool {
        let line = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => return false,
        };
        let Some((name, value)) = line.split_once(':') else {
            return false;
        };
        let value = value.trim();

        if name.eq_ignore_ascii_case("Connection") {
            if value.eq_ignore_ascii_case("keep-alive") {
                self.keep_alive = true;
            }
        } else if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = match value.parse::<usize>() {
                Ok(n) => n,
                Err(_) => return false,
            };
        } else if name.eq_ignore_ascii_case("Host") {
            self.host = Some(value.to_string());
        } else {
            trace!(header = name, "ignoring unrecognized header");
        }
        true
    }
}

/// Pull `user` and `password` values out of a `key=value&key=value` body.
fn parse_credentials(body: &[u8]) -> Option<(String, String)> {
    let body = std::str::from_utf8(body).ok()?;
    let mut user = None;
    let mut password = None;
    for pair in body.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            match k {
                "user" => user = Some(v.to_string()),
                "password" => password = Some(v.to_string()),
                _ => {}
            }
        }
    }
    Some((user?, password?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn conn() -> Conn {
        let mut c = Conn::empty();
        c.claim(1, "127.0.0.1:9999".parse().unwrap());
        c
    }

    fn store() -> Arc<CredentialPool> {
        CredentialPool::new(2, Duration::from_millis(100))
    }

    #[test]
    fn test_parse_simple_get() {
        let mut c = conn();
        c.ingest(b"GET /index.html HTTP/1.1\r\nHost: example\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
        let (method, target, host, clen, keep_alive, body) = c.parsed();
        assert_eq!(method, Some(Method::Get));
        assert_eq!(target, "/index.html");
        assert_eq!(host, Some("example"));
        assert_eq!(clen, 0);
        assert!(keep_alive);
        assert!(body.is_empty());
    }

    #[test]
    fn test_chunked_parse_matches_one_shot() {
        let input: &[u8] =
            b"POST /2 HTTP/1.1\r\nHost: h\r\nContent-Length: 22\r\n\r\nuser=yim&password=1234";

        let mut whole = conn();
        whole.ingest(input);
        assert_eq!(whole.process_read("judge.html"), RequestStatus::Complete);

        let mut chunked = conn();
        let mut status = RequestStatus::Incomplete;
        for b in input {
            chunked.ingest(std::slice::from_ref(b));
            status = chunked.process_read("judge.html");
            if status != RequestStatus::Incomplete {
                break;
            }
        }
        assert_eq!(status, RequestStatus::Complete);

        let (m1, t1, h1, l1, k1, b1) = whole.parsed();
        let (m2, t2, h2, l2, k2, b2) = chunked.parsed();
        assert_eq!((m1, t1, h1, l1, k1, b1), (m2, t2, h2, l2, k2, b2));
        assert_eq!(b1, b"user=yim&password=1234");
    }

    #[test]
    fn test_absolute_uri_and_default_document() {
        let mut c = conn();
        c.ingest(b"GET http://example.com/a.html HTTP/1.1\r\n\r\n");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
        assert_eq!(c.parsed().1, "/a.html");

        let mut c = conn();
        c.ingest(b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
        assert_eq!(c.parsed().1, "/judge.html");
    }

    #[test]
    fn test_malformed_requests_rejected() {
        for bad in [
            b"GARBAGE\r\n\r\n".as_slice(),
            b"GET /\r\n\r\n".as_slice(),
            b"PUT / HTTP/1.1\r\n\r\n".as_slice(),
            b"GET / HTTP/1.0\r\n\r\n".as_slice(),
            b"GET http://noslash HTTP/1.1\r\n\r\n".as_slice(),
            b"GET / HTTP/1.1\r\nContent-Length: x\r\n\r\n".as_slice(),
        ] {
            let mut c = conn();
            c.ingest(bad);
            assert_eq!(
                c.process_read("judge.html"),
                RequestStatus::BadRequest,
                "accepted: {:?}",
                String::from_utf8_lossy(bad)
            );
        }
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let mut c = conn();
        let long = vec![b'a'; READ_BUF_SIZE];
        c.ingest(&long);
        assert_eq!(c.process_read("judge.html"), RequestStatus::BadRequest);
    }

    #[test]
    fn test_head_completes_without_body() {
        let mut c = conn();
        c.ingest(b"HEAD /x HTTP/1.1\r\nContent-Length: 10\r\n\r\n");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
    }

    #[test]
    fn test_content_waits_for_full_body() {
        let mut c = conn();
        c.ingest(b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\nab");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Incomplete);
        c.ingest(b"cde");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
        assert_eq!(c.parsed().5, b"abcde");
    }

    #[test]
    fn test_resolve_and_build_serve_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("index.html")).unwrap();
        f.write_all(b"<html>hello</html>").unwrap();
        drop(f);

        let mut config = ServerConfig::default();
        config.doc_root = dir.path().to_path_buf();

        let mut c = conn();
        c.ingest(b"GET /index.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
        assert_eq!(c.resolve(&config, &store()), Outcome::ServeFile);
        assert!(c.build_response(Outcome::ServeFile));

        let header = String::from_utf8_lossy(c.staged_header()).to_string();
        assert!(header.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(header.contains("Content-Length: 18\r\n"));
        assert!(header.contains("Connection: keep-alive\r\n"));
        assert_eq!(c.staged_file(), Some(b"<html>hello</html>".as_slice()));
    }

    #[test]
    fn test_resolve_error_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut config = ServerConfig::default();
        config.doc_root = dir.path().to_path_buf();
        let store = store();

        let mut c = conn();
        c.ingest(b"GET /missing.html HTTP/1.1\r\n\r\n");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
        assert_eq!(c.resolve(&config, &store), Outcome::NotFound);

        let mut c = conn();
        c.ingest(b"GET /sub HTTP/1.1\r\n\r\n");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
        assert_eq!(c.resolve(&config, &store), Outcome::BadRequest);
    }

    #[test]
    fn test_error_response_closes_connection() {
        let mut c = conn();
        c.ingest(b"GET /x HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(c.process_read("judge.html"), RequestStatus::Complete);
        assert!(c.build_response(Outcome::NotFound));
        let header = String::from_utf8_lossy(c.staged_header()).to_string();
        assert!(header.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(header.contains("Connection: close\r\n"));
        assert!(header.ends_with(std::str::from_utf8(ERROR_404_BODY).unwrap()));
    }

    #[test]
    fn test_credentials_by_key_not_offset() {
        assert_eq!(
            parse_credentials(b"password=pw&user=u"),
            Some(("u".to_string(), "pw".to_string()))
        );
        assert_eq!(parse_credentials(b"user=u"), None);
        assert_eq!(parse_credentials(b"garbage"), None);
    }
}
