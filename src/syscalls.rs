//! Thin wrappers over the raw syscalls the reactor and connections need.
//!
//! Everything here is Linux-specific: the oneshot re-arm discipline relies on
//! `EPOLLONESHOT` and peer-shutdown detection on `EPOLLRDHUP`.

use crate::error::RavelResult;
use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::ptr;

pub use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, epoll_event};

// ---- Socket operations ----

/// Create a non-blocking TCP listening socket bound to `host:port`.
pub fn create_listen_socket(host: &str, port: u16) -> RavelResult<c_int> {
    let addr_str = format!("{}:{}", host, port);
    let addr: SocketAddr = addr_str
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let domain = if addr.is_ipv6() {
        libc::AF_INET6
    } else {
        libc::AF_INET
    };

    unsafe {
        let fd = libc::socket(domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let one: c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        bind_addr(fd, &addr)?;

        if libc::listen(fd, libc::SOMAXCONN) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err.into());
        }

        Ok(fd)
    }
}

fn bind_addr(fd: c_int, addr: &SocketAddr) -> RavelResult<()> {
    unsafe {
        match addr {
            SocketAddr::V4(a) => {
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: a.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(a.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                if libc::bind(
                    fd,
                    &sin as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin) as socklen_t,
                ) < 0
                {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    return Err(err.into());
                }
            }
            SocketAddr::V6(a) => {
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: a.port().to_be(),
                    sin6_flowinfo: a.flowinfo(),
                    sin6_addr: libc::in6_addr {
                        s6_addr: a.ip().octets(),
                    },
                    sin6_scope_id: a.scope_id(),
                };
                if libc::bind(
                    fd,
                    &sin6 as *const _ as *const libc::sockaddr,
                    mem::size_of_val(&sin6) as socklen_t,
                ) < 0
                {
                    let err = io::Error::last_os_error();
                    libc::close(fd);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }
}

/// Port the listening socket actually bound to (relevant when asked for port 0).
pub fn local_port(fd: c_int) -> RavelResult<u16> {
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        if libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(sockaddr_to_addr(&storage).port())
    }
}

fn sockaddr_to_addr(storage: &libc::sockaddr_storage) -> SocketAddr {
    if storage.ss_family == libc::AF_INET6 as libc::sa_family_t {
        let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
        SocketAddr::new(
            IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)),
            u16::from_be(sin6.sin6_port),
        )
    } else {
        let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
        SocketAddr::new(
            IpAddr::V4(Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes())),
            u16::from_be(sin.sin_port),
        )
    }
}

/// Accept one pending connection. `Ok(None)` means the backlog is drained.
pub fn accept_connection(listen_fd: c_int) -> RavelResult<Option<(c_int, SocketAddr)>> {
    unsafe {
        let mut storage: libc::sockaddr_storage = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
        let fd = libc::accept4(
            listen_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK,
        );

        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err.into())
            }
        } else {
            Ok(Some((fd, sockaddr_to_addr(&storage))))
        }
    }
}

/// Non-blocking read. `Ok(None)` is would-block, `Ok(Some(0))` is orderly EOF.
pub fn read_nonblocking(fd: c_int, buf: &mut [u8]) -> io::Result<Option<usize>> {
    unsafe {
        let res = libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len());
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err)
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

/// Vectored non-blocking write across up to 8 segments. `Ok(None)` is would-block.
pub fn writev_nonblocking(fd: c_int, bufs: &[&[u8]]) -> io::Result<Option<usize>> {
    if bufs.is_empty() {
        return Ok(Some(0));
    }

    let mut iovecs: [libc::iovec; 8] = unsafe { mem::zeroed() };
    let iov_count = bufs.len().min(8);
    for i in 0..iov_count {
        iovecs[i] = libc::iovec {
            iov_base: bufs[i].as_ptr() as *mut c_void,
            iov_len: bufs[i].len(),
        };
    }

    unsafe {
        let res = libc::writev(fd, iovecs.as_ptr(), iov_count as c_int);
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err)
            }
        } else {
            Ok(Some(res as usize))
        }
    }
}

/// Best-effort single write, used for the fixed busy rejection before close.
pub fn send_best_effort(fd: c_int, buf: &[u8]) {
    unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        );
    }
}

pub fn close_fd(fd: c_int) {
    unsafe {
        libc::close(fd);
    }
}

/// Writing to a half-closed socket must surface as an error, not kill the process.
pub fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

// ---- Wake pipe ----

/// Create a Unix pipe with both ends non-blocking. Returns (read_fd, write_fd).
///
/// The write end must never block: it is written from the ctrl-c handler and
/// the ticker thread. A full pipe just coalesces wakeups.
pub fn create_pipe() -> RavelResult<(c_int, c_int)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok((fds[0], fds[1]))
}

pub fn write_wake_byte(pipe_write_fd: c_int, code: u8) {
    let buf = [code];
    unsafe {
        libc::write(pipe_write_fd, buf.as_ptr() as *const c_void, 1);
    }
}

/// Drain pending wake bytes. Returns how many were read.
pub fn drain_pipe(pipe_read_fd: c_int, buf: &mut [u8]) -> usize {
    unsafe {
        let n = libc::read(pipe_read_fd, buf.as_mut_ptr() as *mut c_void, buf.len());
        if n < 0 { 0 } else { n as usize }
    }
}

// ---- Epoll ----

pub struct Epoll {
    pub fd: c_int,
}

impl Epoll {
    pub fn new() -> RavelResult<Self> {
        unsafe {
            let fd = libc::epoll_create1(0);
            if fd < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { fd })
        }
    }

    /// Register a descriptor. Edge-triggered always; callers OR in
    /// `EPOLLONESHOT` / `EPOLLRDHUP` for data sockets.
    pub fn add(&self, fd: c_int, token: u64, interests: i32) -> RavelResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interests)
    }

    /// Re-arm a oneshot descriptor (or change its interest set).
    pub fn modify(&self, fd: c_int, token: u64, interests: i32) -> RavelResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interests)
    }

    fn ctl(&self, op: c_int, fd: c_int, token: u64, interests: i32) -> RavelResult<()> {
        let mut event = epoll_event {
            events: (interests | libc::EPOLLET) as u32,
            u64: token,
        };
        unsafe {
            if libc::epoll_ctl(self.fd, op, fd, &mut event) < 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        Ok(())
    }

    pub fn delete(&self, fd: c_int) -> RavelResult<()> {
        unsafe {
            if libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Block for readiness events. `Ok(0)` on EINTR so the caller can re-check
    /// its stop flag.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> RavelResult<usize> {
        unsafe {
            let res = libc::epoll_wait(
                self.fd,
                events.as_mut_ptr(),
                events.len() as c_int,
                timeout_ms,
            );
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    return Ok(0);
                }
                return Err(err.into());
            }
            Ok(res as usize)
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ---- Memory-mapped file regions ----

/// Read-only memory mapping of a regular file, unmapped exactly once on drop.
pub struct MappedFile {
    ptr: *mut c_void,
    len: usize,
}

// The region is immutable for its whole lifetime, so handing the handle from
// the worker that built the response to the reactor that drains it is safe.
unsafe impl Send for MappedFile {}

impl MappedFile {
    /// Map `len` bytes of `fd` read-only. `len` must be non-zero.
    pub fn map(fd: c_int, len: usize) -> RavelResult<Self> {
        unsafe {
            let ptr = libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                fd,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error().into());
            }
            Ok(Self { ptr, len })
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}
