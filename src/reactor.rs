//! Single-threaded readiness loop.
//!
//! The reactor owns the listening socket, the epoll handle, the wake pipe,
//! the connection slab and the timer list. Data sockets are registered
//! edge-triggered + oneshot: after an event is consumed the descriptor stays
//! silent until whoever finished handling it re-arms it, which is what keeps
//! reactor and workers from ever touching one connection concurrently.
//!
//! Asynchronous notifications (periodic tick, termination request) arrive as
//! single bytes on the wake pipe and are handled in ordinary control flow at
//! the top of the loop, never inside a signal handler.

use crate::config::ServerConfig;
use crate::conn::{BUSY_TEXT, Conn, ProcessResult, WriteOutcome};
use crate::error::RavelResult;
use crate::metrics::ServerMetrics;
use crate::pool::{Runnable, WorkerPool};
use crate::slab::ConnectionSlab;
use crate::store::CredentialPool;
use crate::syscalls::{
    self, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, EPOLLRDHUP, Epoll, epoll_event,
};
use crate::timer::{TimerHandle, TimerList};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: u64 = u64::MAX;
const WAKE_TOKEN: u64 = u64::MAX - 1;

const WAKE_TICK: u8 = 1;
const WAKE_TERM: u8 = 2;

const CONN_INTERESTS: i32 = EPOLLRDHUP | EPOLLONESHOT;

/// State shared with the worker threads.
pub struct ReactorShared {
    pub epoll: Epoll,
    pub config: ServerConfig,
    pub store: Arc<CredentialPool>,
    pub metrics: ServerMetrics,
    /// Slots released by workers (descriptor already closed); the reactor
    /// reclaims them into the slab and drops their timers each loop pass.
    reclaim: Mutex<Vec<usize>>,
}

/// Queue entry: a reference to a connection slot, not an owned copy. The
/// generation pins the exact connection the reactor saw at submit time.
pub struct ConnTask {
    slot: usize,
    generation: u64,
    conn: Arc<Mutex<Conn>>,
    shared: Arc<ReactorShared>,
}

impl Runnable for ConnTask {
    fn run(self) {
        let mut conn = self.conn.lock().unwrap();
        if conn.is_free() || conn.generation != self.generation {
            trace!(slot = self.slot, "stale task, slot reused or torn down");
            return;
        }

        let fd = conn.fd;
        let rearmed = match conn.process(&self.shared.config, &self.shared.store, &self.shared.metrics)
        {
            ProcessResult::ReArmRead => self
                .shared
                .epoll
                .modify(fd, self.slot as u64, EPOLLIN | CONN_INTERESTS)
                .is_ok(),
            ProcessResult::ReArmWrite => self
                .shared
                .epoll
                .modify(fd, self.slot as u64, EPOLLOUT | CONN_INTERESTS)
                .is_ok(),
            ProcessResult::Close => false,
        };

        if !rearmed {
            // Worker-initiated teardown: close and invalidate here, hand the
            // slot index back to the reactor for slab/timer cleanup.
            let _ = self.shared.epoll.delete(fd);
            syscalls::close_fd(fd);
            conn.release();
            self.shared.metrics.dec_conn();
            self.shared.reclaim.lock().unwrap().push(self.slot);
        }
    }
}

/// Write end of the wake pipe, safe to use from any thread or signal context.
#[derive(Clone, Copy)]
pub struct WakeWriter {
    fd: i32,
}

impl WakeWriter {
    pub fn request_stop(&self) {
        syscalls::write_wake_byte(self.fd, WAKE_TERM);
    }

    fn tick(&self) {
        syscalls::write_wake_byte(self.fd, WAKE_TICK);
    }
}

pub struct Reactor {
    shared: Arc<ReactorShared>,
    listen_fd: i32,
    wake_rx: i32,
    wake_tx: i32,
    slab: ConnectionSlab,
    timers: TimerList<(usize, u64)>,
    timer_handles: Vec<Option<TimerHandle>>,
    pool: Option<WorkerPool<ConnTask>>,
    stop: Arc<AtomicBool>,
}

impl Reactor {
    pub fn new(host: &str, port: u16, config: ServerConfig) -> RavelResult<Self> {
        config.validate()?;
        syscalls::ignore_sigpipe();

        let listen_fd = syscalls::create_listen_socket(host, port)?;
        let epoll = Epoll::new()?;
        epoll.add(listen_fd, LISTENER_TOKEN, EPOLLIN)?;

        let (wake_rx, wake_tx) = syscalls::create_pipe()?;
        epoll.add(wake_rx, WAKE_TOKEN, EPOLLIN)?;

        let store = CredentialPool::new(config.store_handles, config.store_acquire_timeout());
        let pool = WorkerPool::new(config.workers, config.queue_capacity)?;
        let slab = ConnectionSlab::new(config.max_connections);
        let timer_handles = vec![None; config.max_connections];

        let shared = Arc::new(ReactorShared {
            epoll,
            config,
            store,
            metrics: ServerMetrics::new(),
            reclaim: Mutex::new(Vec::new()),
        });

        info!(host, port = syscalls::local_port(listen_fd)?, "listening");
        Ok(Self {
            shared,
            listen_fd,
            wake_rx,
            wake_tx,
            slab,
            timers: TimerList::new(),
            timer_handles,
            pool: Some(pool),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Port actually bound (useful when constructed with port 0).
    pub fn local_port(&self) -> RavelResult<u16> {
        syscalls::local_port(self.listen_fd)
    }

    pub fn wake_writer(&self) -> WakeWriter {
        WakeWriter { fd: self.wake_tx }
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.shared.metrics
    }

    /// Block dispatching readiness events until asked to stop or the
    /// multiplexer fails unrecoverably.
    pub fn run(&mut self) -> RavelResult<()> {
        let ticker = self.spawn_ticker()?;
        let mut events = vec![epoll_event { events: 0, u64: 0 }; 1024];

        while !self.stop.load(Ordering::Acquire) {
            let n = match self.shared.epoll.wait(&mut events, -1) {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "epoll_wait failed");
                    self.stop.store(true, Ordering::Release);
                    self.shutdown(ticker);
                    return Err(e);
                }
            };

            let mut sweep_due = false;
            for event in &events[..n] {
                match event.u64 {
                    LISTENER_TOKEN => self.accept_pending(),
                    WAKE_TOKEN => self.drain_wake(&mut sweep_due),
                    token => self.handle_socket_event(token as usize, event.events),
                }
            }

            self.reclaim_worker_slots();
            if sweep_due {
                self.sweep_idle();
                info!(
                    active = self.shared.metrics.conns(),
                    requests = self.shared.metrics.total_requests.load(Ordering::Relaxed),
                    bytes = self.shared.metrics.bytes_sent.load(Ordering::Relaxed),
                    "tick"
                );
            }
        }

        self.shutdown(ticker);
        Ok(())
    }

    fn spawn_ticker(&self) -> RavelResult<JoinHandle<()>> {
        let stop = self.stop.clone();
        let writer = self.wake_writer();
        let tick = self.shared.config.tick();
        let handle = thread::Builder::new()
            .name("ravel-ticker".to_string())
            .spawn(move || {
                let slice = Duration::from_millis(100);
                'outer: loop {
                    let mut slept = Duration::ZERO;
                    while slept < tick {
                        if stop.load(Ordering::Acquire) {
                            break 'outer;
                        }
                        let step = slice.min(tick - slept);
                        thread::sleep(step);
                        slept += step;
                    }
                    writer.tick();
                }
            })?;
        Ok(handle)
    }

    // ---- Accept path ----

    fn accept_pending(&mut self) {
        loop {
            match syscalls::accept_connection(self.listen_fd) {
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
                Ok(Some((fd, peer))) => {
                    let Some(slot) = self.slab.allocate() else {
                        debug!(%peer, "connection pool full, rejecting");
                        syscalls::send_best_effort(fd, BUSY_TEXT);
                        syscalls::close_fd(fd);
                        continue;
                    };

                    let entry = self.slab.get(slot).expect("allocated slot exists").clone();
                    let mut conn = entry.lock().unwrap();
                    conn.claim(fd, peer);

                    let expire = Instant::now() + self.shared.config.idle_timeout();
                    let handle = self.timers.insert(expire, (slot, conn.generation));
                    self.timer_handles[slot] = Some(handle);

                    if let Err(e) =
                        self.shared
                            .epoll
                            .add(fd, slot as u64, EPOLLIN | CONN_INTERESTS)
                    {
                        warn!(error = %e, "failed to register connection");
                        syscalls::close_fd(fd);
                        conn.release();
                        drop(conn);
                        self.timers.delete(handle);
                        self.timer_handles[slot] = None;
                        self.slab.free(slot);
                        continue;
                    }

                    self.shared.metrics.inc_conn();
                    trace!(fd, %peer, slot, "accepted");
                }
            }
        }
    }

    // ---- Data socket events ----

    fn handle_socket_event(&mut self, slot: usize, events: u32) {
        let Some(entry) = self.slab.get(slot).cloned() else {
            return;
        };
        let mut conn = entry.lock().unwrap();
        if conn.is_free() {
            return;
        }

        if events & (EPOLLRDHUP | EPOLLHUP | EPOLLERR) as u32 != 0 {
            self.teardown(slot, &mut conn);
            return;
        }

        if events & EPOLLIN as u32 != 0 {
            match conn.fill_read_buf() {
                Ok(true) => {
                    self.refresh_timer(slot);
                    let task = ConnTask {
                        slot,
                        generation: conn.generation,
                        conn: entry.clone(),
                        shared: self.shared.clone(),
                    };
                    drop(conn);
                    if let Err(rejected) = self.pool.as_ref().expect("pool live").submit(task) {
                        // Queue full: answer with the fixed busy text and drop
                        // the connection rather than discarding it silently.
                        let mut conn = rejected.conn.lock().unwrap();
                        warn!(fd = conn.fd, "task queue full, rejecting request");
                        syscalls::send_best_effort(conn.fd, BUSY_TEXT);
                        self.teardown(slot, &mut conn);
                    }
                }
                Ok(false) => {
                    trace!(fd = conn.fd, "peer shut down");
                    self.teardown(slot, &mut conn);
                }
                Err(e) => {
                    debug!(fd = conn.fd, error = %e, "receive failed");
                    self.teardown(slot, &mut conn);
                }
            }
            return;
        }

        if events & EPOLLOUT as u32 != 0 {
            let fd = conn.fd;
            match conn.drain(&self.shared.metrics) {
                WriteOutcome::Again => {
                    self.refresh_timer(slot);
                    if self
                        .shared
                        .epoll
                        .modify(fd, slot as u64, EPOLLOUT | CONN_INTERESTS)
                        .is_err()
                    {
                        self.teardown(slot, &mut conn);
                    }
                }
                WriteOutcome::DoneKeepAlive => {
                    self.refresh_timer(slot);
                    if self
                        .shared
                        .epoll
                        .modify(fd, slot as u64, EPOLLIN | CONN_INTERESTS)
                        .is_err()
                    {
                        self.teardown(slot, &mut conn);
                    }
                }
                WriteOutcome::DoneClose | WriteOutcome::Failed => {
                    self.teardown(slot, &mut conn);
                }
            }
        }
    }

    // ---- Teardown and timers ----

    /// Full connection teardown: deregister, close, invalidate, return the
    /// slot and delete its timer. Safe against double invocation because
    /// `Conn::release` and `ConnectionSlab::free` are both idempotent here.
    fn teardown(&mut self, slot: usize, conn: &mut Conn) {
        let fd = conn.fd;
        if fd >= 0 {
            let _ = self.shared.epoll.delete(fd);
            syscalls::close_fd(fd);
            conn.release();
            self.shared.metrics.dec_conn();
        }
        if let Some(handle) = self.timer_handles[slot].take() {
            self.timers.delete(handle);
        }
        self.slab.free(slot);
    }

    /// Any I/O activity pushes the connection's expiration 3 ticks out.
    fn refresh_timer(&mut self, slot: usize) {
        if let Some(handle) = self.timer_handles[slot] {
            let expire = Instant::now() + self.shared.config.idle_timeout();
            self.timers.adjust(handle, expire);
        }
    }

    fn drain_wake(&mut self, sweep_due: &mut bool) {
        let mut buf = [0u8; 256];
        loop {
            let n = syscalls::drain_pipe(self.wake_rx, &mut buf);
            if n == 0 {
                break;
            }
            for &code in &buf[..n] {
                match code {
                    WAKE_TICK => *sweep_due = true,
                    WAKE_TERM => {
                        info!("termination requested");
                        self.stop.store(true, Ordering::Release);
                    }
                    other => warn!(code = other, "unknown wake byte"),
                }
            }
        }
    }

    /// Reclaim slots whose connections a worker already closed.
    fn reclaim_worker_slots(&mut self) {
        let slots: Vec<usize> = std::mem::take(&mut *self.shared.reclaim.lock().unwrap());
        for slot in slots {
            if let Some(handle) = self.timer_handles[slot].take() {
                self.timers.delete(handle);
            }
            self.slab.free(slot);
        }
    }

    /// Force-close connections idle past the timeout. If a worker currently
    /// owns the slot, eviction is deferred one tick instead of blocking the
    /// reactor on the slot mutex.
    fn sweep_idle(&mut self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.timers.sweep(now, |payload| expired.push(payload));

        for (slot, generation) in expired {
            let Some(entry) = self.slab.get(slot).cloned() else {
                continue;
            };
            match entry.try_lock() {
                Ok(mut conn) => {
                    if conn.is_free() || conn.generation != generation {
                        continue;
                    }
                    debug!(fd = conn.fd, slot, "idle timeout, evicting");
                    self.timer_handles[slot] = None; // already swept
                    self.teardown(slot, &mut conn);
                }
                Err(_) => {
                    let handle = self
                        .timers
                        .insert(now + self.shared.config.tick(), (slot, generation));
                    self.timer_handles[slot] = Some(handle);
                }
            }
        }
    }

    // ---- Shutdown ----

    fn shutdown(&mut self, ticker: JoinHandle<()>) {
        info!("shutting down: draining workers");
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        let _ = ticker.join();

        for slot in self.slab.live_slots() {
            if let Some(entry) = self.slab.get(slot).cloned() {
                let mut conn = entry.lock().unwrap();
                self.teardown(slot, &mut conn);
            }
        }
        info!("shutdown complete");
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        syscalls::close_fd(self.listen_fd);
        syscalls::close_fd(self.wake_rx);
        syscalls::close_fd(self.wake_tx);
    }
}
