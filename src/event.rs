//! Readiness multiplexing for single-threaded servers.
//!
//! An [`EventManager`] watches a listening socket plus any number of client
//! handles and reports, one per call, which handle has readable data. Three
//! interchangeable backends implement the same contract:
//!
//! | Backend | Mechanism | Cost per wait | Notes |
//! |---|---|---|---|
//! | [`Backend::Epoll`] | `epoll` (Linux only) | O(1) | explicit deregistration before close |
//! | [`Backend::Poll`] | `poll` over an fd array | O(n) | removal by linear scan |
//! | [`Backend::Select`] | `select` fd bitmap | O(n), bounded by max fd | 3-second internal timeout, looped |
//!
//! When the listener and a client are both ready, the connection attempt is
//! reported first: the listener sits at position zero of every backend's
//! scan order, and epoll's delivery array is consulted front-first.
//!
//! There is no in-band cancellation of [`EventManager::wait_for_event`].
//! A shutdown token can be attached with
//! [`with_shutdown`](EventManager::with_shutdown); the select backend
//! observes it between its timeout loops, which is the supported way to
//! terminate an event loop cooperatively. The other backends wait
//! indefinitely and only notice the token on a spurious wakeup.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::SecureSocketError;
use crate::Result;

/// Sentinel returned by [`EventManager::wait_for_event`] when the listener
/// handle (not a client) is readable: a connection attempt is pending.
pub const CONN_ATTEMPT: RawFd = -100;

/// Reserved invalid-handle sentinel, the value OS socket calls report on
/// failure. [`EventManager::monitor`] refuses it, so a failed accept's
/// return value can never enter the watched set.
pub const SOCKET_ERROR: RawFd = -1;

/// Internal timeout of the select backend, letting the wait loop observe a
/// shutdown token.
const SELECT_TIMEOUT_SECS: i64 = 3;

/// Readiness-notification strategy backing an [`EventManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Edge-scalable kernel event queue. Linux only.
    #[cfg(target_os = "linux")]
    Epoll,
    /// Array-based polling, portable across Unix platforms.
    Poll,
    /// Legacy bitmap polling, bounded by the highest watched handle.
    Select,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        {
            Backend::Epoll
        }
        #[cfg(not(target_os = "linux"))]
        {
            Backend::Poll
        }
    }
}

/// Uniform readiness interface over the three backends.
pub struct EventManager {
    listener: RawFd,
    inner: Inner,
    shutdown: Option<Arc<AtomicBool>>,
}

enum Inner {
    #[cfg(target_os = "linux")]
    Epoll(EpollState),
    Poll(PollState),
    Select(SelectState),
}

impl EventManager {
    /// Watch `listener` for read-readiness using the platform default
    /// backend. `max_connections` sizes the event buffers.
    pub fn new(listener: RawFd, max_connections: usize) -> Result<Self> {
        Self::with_backend(listener, max_connections, Backend::default())
    }

    /// Like [`new`](Self::new) with an explicit backend choice.
    pub fn with_backend(listener: RawFd, max_connections: usize, backend: Backend) -> Result<Self> {
        let inner = match backend {
            #[cfg(target_os = "linux")]
            Backend::Epoll => Inner::Epoll(EpollState::new(listener, max_connections)?),
            Backend::Poll => Inner::Poll(PollState::new(listener, max_connections)),
            Backend::Select => Inner::Select(SelectState::new(listener, max_connections)),
        };
        debug!(listener, ?backend, "event manager started");
        Ok(Self {
            listener,
            inner,
            shutdown: None,
        })
    }

    /// Attach a cooperative shutdown token. Once set, the select backend
    /// returns [`SecureSocketError::Shutdown`] at its next timeout.
    pub fn with_shutdown(mut self, token: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Block until a watched handle is readable and return it.
    ///
    /// Returns [`CONN_ATTEMPT`] when the ready handle is the listener,
    /// otherwise the raw client handle. Readiness means at least one byte
    /// (or a close notification) is available; it does not guarantee a
    /// complete application frame has arrived.
    pub fn wait_for_event(&mut self) -> Result<RawFd> {
        let shutdown = self.shutdown.as_deref();
        let fd = match &mut self.inner {
            #[cfg(target_os = "linux")]
            Inner::Epoll(state) => state.wait(shutdown)?,
            Inner::Poll(state) => state.wait(shutdown)?,
            Inner::Select(state) => state.wait(shutdown)?,
        };
        if fd == self.listener {
            Ok(CONN_ATTEMPT)
        } else {
            Ok(fd)
        }
    }

    /// Add a client handle to the watched set (read-readiness).
    ///
    /// [`SOCKET_ERROR`] is refused: it marks a failed socket call, not a
    /// watchable handle.
    pub fn monitor(&mut self, fd: RawFd) -> Result<()> {
        if fd == SOCKET_ERROR {
            return Err(SecureSocketError::BadState(
                "cannot monitor an invalid socket handle".into(),
            ));
        }
        match &mut self.inner {
            #[cfg(target_os = "linux")]
            Inner::Epoll(state) => state.add(fd),
            Inner::Poll(state) => {
                state.add(fd);
                Ok(())
            }
            Inner::Select(state) => {
                state.add(fd);
                Ok(())
            }
        }
    }

    /// Remove a client handle from the watched set.
    ///
    /// Must be called before the handle is closed when the epoll backend is
    /// in use; the polling backends only update their own bookkeeping. The
    /// listener cannot be removed.
    pub fn stop_monitoring(&mut self, fd: RawFd) -> Result<()> {
        if fd == self.listener {
            return Err(SecureSocketError::BadState(
                "the listener handle cannot be removed from the watched set".into(),
            ));
        }
        match &mut self.inner {
            #[cfg(target_os = "linux")]
            Inner::Epoll(state) => state.remove(fd),
            Inner::Poll(state) => {
                state.remove(fd);
                Ok(())
            }
            Inner::Select(state) => {
                state.remove(fd);
                Ok(())
            }
        }
    }
}

fn shutdown_requested(token: Option<&AtomicBool>) -> bool {
    token.is_some_and(|t| t.load(Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Epoll backend (Linux)
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
struct EpollState {
    epfd: RawFd,
    events: Vec<libc::epoll_event>,
}

#[cfg(target_os = "linux")]
impl EpollState {
    fn new(listener: RawFd, max_connections: usize) -> Result<Self> {
        // SAFETY: epoll_create1 with no flags has no preconditions.
        let epfd = unsafe { libc::epoll_create1(0) };
        if epfd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let mut state = Self {
            epfd,
            events: vec![libc::epoll_event { events: 0, u64: 0 }; max_connections.max(1) + 1],
        };
        state.add(listener)?;
        Ok(state)
    }

    fn add(&mut self, fd: RawFd) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };
        // SAFETY: epfd is a live epoll instance and ev points to a valid
        // stack-local event.
        let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> Result<()> {
        // SAFETY: DEL takes no event payload on modern kernels.
        let rc =
            unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn wait(&mut self, shutdown: Option<&AtomicBool>) -> Result<RawFd> {
        loop {
            if shutdown_requested(shutdown) {
                return Err(SecureSocketError::Shutdown);
            }
            // SAFETY: the event buffer outlives the call and its capacity
            // matches the count passed to the kernel.
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    self.events.as_mut_ptr(),
                    self.events.len() as libc::c_int,
                    -1,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            if n == 0 {
                continue;
            }
            // Only the first delivered event is consulted; the rest will be
            // re-reported on the next wait (level-triggered).
            return Ok(self.events[0].u64 as RawFd);
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for EpollState {
    fn drop(&mut self) {
        // SAFETY: closing our own epoll fd exactly once.
        unsafe {
            libc::close(self.epfd);
        }
    }
}

// ---------------------------------------------------------------------------
// Poll backend
// ---------------------------------------------------------------------------

struct PollState {
    // Listener stays at index 0 so connection attempts win the scan.
    fds: Vec<libc::pollfd>,
}

impl PollState {
    fn new(listener: RawFd, max_connections: usize) -> Self {
        let mut fds = Vec::with_capacity(max_connections.max(1) + 1);
        fds.push(libc::pollfd {
            fd: listener,
            events: libc::POLLIN,
            revents: 0,
        });
        Self { fds }
    }

    fn add(&mut self, fd: RawFd) {
        if self.fds.iter().any(|p| p.fd == fd) {
            return;
        }
        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
    }

    fn remove(&mut self, fd: RawFd) {
        self.fds.retain(|p| p.fd != fd);
    }

    fn wait(&mut self, shutdown: Option<&AtomicBool>) -> Result<RawFd> {
        loop {
            if shutdown_requested(shutdown) {
                return Err(SecureSocketError::Shutdown);
            }
            // SAFETY: the pollfd array is valid for its whole length.
            let rc = unsafe {
                libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, -1)
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            if rc == 0 {
                continue;
            }
            // Index 0 is the listener, so it is found before any client.
            // Error conditions are surfaced as readiness too; the read on
            // the returned handle reports what went wrong.
            let mask = libc::POLLIN | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
            for p in &self.fds {
                if p.revents & mask != 0 {
                    return Ok(p.fd);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Select backend
// ---------------------------------------------------------------------------

struct SelectState {
    // Listener stays at index 0 so connection attempts win the scan.
    watched: Vec<RawFd>,
}

impl SelectState {
    fn new(listener: RawFd, max_connections: usize) -> Self {
        let mut watched = Vec::with_capacity(max_connections.max(1) + 1);
        watched.push(listener);
        Self { watched }
    }

    fn add(&mut self, fd: RawFd) {
        if !self.watched.contains(&fd) {
            self.watched.push(fd);
        }
    }

    // select has no kernel-side registration, so removal is pure
    // bookkeeping: a handle absent from the rebuilt bitmap is never
    // reported again.
    fn remove(&mut self, fd: RawFd) {
        self.watched.retain(|&w| w != fd);
    }

    fn wait(&mut self, shutdown: Option<&AtomicBool>) -> Result<RawFd> {
        loop {
            if shutdown_requested(shutdown) {
                return Err(SecureSocketError::Shutdown);
            }

            // The bitmap is rebuilt from scratch on every iteration.
            // SAFETY: an all-zero fd_set is the valid empty set.
            let mut readfds: libc::fd_set = unsafe { std::mem::zeroed() };
            let mut max_fd = 0;
            for &fd in &self.watched {
                // SAFETY: fd_set is initialized above and fd is in range for
                // sockets this process created.
                unsafe { libc::FD_SET(fd, &mut readfds) };
                max_fd = max_fd.max(fd);
            }

            let mut timeout = libc::timeval {
                tv_sec: SELECT_TIMEOUT_SECS as libc::time_t,
                tv_usec: 0,
            };
            // SAFETY: readfds and timeout are valid stack locals.
            let rc = unsafe {
                libc::select(
                    max_fd + 1,
                    &mut readfds,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    &mut timeout,
                )
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            if rc == 0 {
                // Timed out: loop again, giving the shutdown check a turn.
                continue;
            }
            for &fd in &self.watched {
                // SAFETY: readfds was populated by the select call above.
                if unsafe { libc::FD_ISSET(fd, &readfds) } {
                    return Ok(fd);
                }
            }
        }
    }
}
