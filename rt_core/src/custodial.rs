//! Custodial I/O handles (C1).
//!
//! Both variants wrap a kernel file descriptor and override the same three
//! operations the source does: `close` becomes a logical no-op, the
//! destructor rewrites the wrapped fd to an invalid sentinel before it would
//! otherwise be dropped (so nothing downstream ever issues a real `close`
//! syscall on it), and the acceptor variant additionally remaps a 0-byte
//! `recv` the way the design notes specify.
//!
//! Composition, not inheritance: each handle holds a `CustodialCore` rather
//! than extending a base handle type. The two public types differ only in
//! their `is_open`/`recv` semantics, so the shared state and the `dup`/log
//! machinery live once in `CustodialCore`.

use std::fmt;
use std::mem::ManuallyDrop;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, IntoRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use logger::Logger;
use socket2::Socket;

use crate::error::RtError;

const INVALID_FD: RawFd = -1;

/// Readiness bits a caller may request when registering a file event.
/// Mirrors the source's event mask closely enough for `initializeFileEvent`
/// to have something concrete to strip a bit from.
pub const READABLE: u8 = 1 << 0;
pub const WRITABLE: u8 = 1 << 1;
pub const CLOSED: u8 = 1 << 2;

/// Opaque handle to a registered file event. The event dispatcher itself is
/// a collaborator (consumed, not implemented here); this token only lets the
/// custodial handle track "a registration exists" so it can release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEventToken(pub u64);

/// Ties a parked duplicate back to the `has_live_duplicate` flag on the
/// handle it was duplicated from. The duplicate travels into the socket
/// pool alone (the original custodial handle stays with the connection), so
/// this is the only thread connecting the two once `duplicate()` returns.
/// Retiring it is what lets the original handle's `recv` stop remapping a
/// genuine 0-byte read once the parked duplicate is reclaimed or evicted.
#[derive(Clone)]
pub struct DuplicateGuard(Arc<AtomicBool>);

impl DuplicateGuard {
    /// A guard with no handle on the other end; `retire` is then a no-op.
    /// For tests and call sites that construct a `ParkedSocket` without
    /// going through `AcceptorIoHandle::duplicate`.
    pub fn inert() -> Self {
        DuplicateGuard(Arc::new(AtomicBool::new(false)))
    }

    pub fn retire(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn raw_recv(fd: RawFd, buf: &mut [u8], flags: libc::c_int) -> std::io::Result<usize> {
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags) };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn raw_send(fd: RawFd, buf: &[u8], flags: libc::c_int) -> std::io::Result<usize> {
    let n = unsafe { libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), flags) };
    if n < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Shared state and machinery behind both custodial variants.
struct CustodialCore {
    fd: RawFd,
    close_attempted: AtomicBool,
    /// Set once a duplicate of this fd has been parked; cleared when the
    /// `DuplicateGuard` handed back from `duplicate()` is retired. Gates the
    /// acceptor's 0-byte `recv` remap so it only masks the false
    /// peer-closed signal while a second reference to the same kernel
    /// socket genuinely exists (see DESIGN.md).
    has_live_duplicate: Arc<AtomicBool>,
    file_event: std::sync::Mutex<Option<FileEventToken>>,
    logger: Logger,
    module: &'static str,
}

impl CustodialCore {
    fn new(fd: RawFd, logger: Logger, module: &'static str) -> Self {
        logger.debug("custodial handle created", module, fd);
        CustodialCore {
            fd,
            close_attempted: AtomicBool::new(false),
            has_live_duplicate: Arc::new(AtomicBool::new(false)),
            file_event: std::sync::Mutex::new(None),
            logger,
            module,
        }
    }

    fn with_socket<R>(&self, f: impl FnOnce(&Socket) -> R) -> R {
        let socket = ManuallyDrop::new(unsafe { Socket::from_raw_fd(self.fd) });
        f(&socket)
    }

    fn close(&self) {
        self.close_attempted.store(true, Ordering::SeqCst);
        self.logger.debug("custodial close (logical, fd retained)", self.module, self.fd);
        if let Ok(mut slot) = self.file_event.lock() {
            *slot = None;
        }
    }

    fn duplicate(&self) -> Result<(Socket, DuplicateGuard), RtError> {
        let dup = self
            .with_socket(|s| s.try_clone())
            .map_err(|e| RtError::fd_duplication(self.module, e))?;
        self.has_live_duplicate.store(true, Ordering::SeqCst);
        self.logger.debug(
            &format!("duplicated fd: original={}, copy={}", self.fd, dup.as_raw_fd_value()),
            self.module,
            "",
        );
        Ok((dup, DuplicateGuard(self.has_live_duplicate.clone())))
    }

    fn set_file_event(&self, token: FileEventToken) {
        if let Ok(mut slot) = self.file_event.lock() {
            *slot = Some(token);
        }
    }

    fn take_file_event(&self) -> Option<FileEventToken> {
        self.file_event.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Drop for CustodialCore {
    fn drop(&mut self) {
        let fd = self.fd;
        self.fd = INVALID_FD;
        // Unconditional: a handle dropped without going through close() (an
        // early-return path, say) must still release its registered token.
        if let Ok(mut slot) = self.file_event.lock() {
            *slot = None;
        }
        self.logger.debug("custodial handle dropped, fd abandoned (not closed)", self.module, fd);
    }
}

trait AsRawFdValue {
    fn as_raw_fd_value(&self) -> RawFd;
}

impl AsRawFdValue for Socket {
    fn as_raw_fd_value(&self) -> RawFd {
        use std::os::fd::AsRawFd;
        self.as_raw_fd()
    }
}

/// Acceptor-side custodial handle: `is_open` goes false after logical
/// close, and a 0-byte `recv` is remapped to `WouldBlock` while a duplicate
/// of this fd is known to exist.
pub struct AcceptorIoHandle {
    core: CustodialCore,
}

impl AcceptorIoHandle {
    pub fn from_raw_fd(fd: RawFd, logger: Logger) -> Self {
        AcceptorIoHandle {
            core: CustodialCore::new(fd, logger, "acceptor_io_handle"),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.core.fd
    }

    pub fn is_open(&self) -> bool {
        !self.core.close_attempted.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn duplicate(&self) -> Result<(Socket, DuplicateGuard), RtError> {
        self.core.duplicate()
    }

    pub fn set_file_event(&self, token: FileEventToken) {
        self.core.set_file_event(token);
    }

    pub fn take_file_event(&self) -> Option<FileEventToken> {
        self.core.take_file_event()
    }

    /// Strips the `CLOSED` readiness bit from a requested event mask, so a
    /// duplicated fd doesn't deliver a spurious close notification.
    pub fn initialize_file_event(requested_mask: u8) -> u8 {
        requested_mask & !CLOSED
    }

    pub fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = raw_recv(self.core.fd, buf, 0)?;
        if n == 0 && self.core.has_live_duplicate.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        }
        Ok(n)
    }

    pub fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        raw_send(self.core.fd, buf, 0)
    }

    /// Accepts a connection and wraps the child fd in a new
    /// `AcceptorIoHandle` so it inherits the no-close property directly.
    pub fn accept(&self) -> std::io::Result<(AcceptorIoHandle, SocketAddr)> {
        let (child, addr) = self.core.with_socket(|s| s.accept())?;
        child.set_nonblocking(true)?;
        let fd = child.into_raw_fd();
        let addr = addr
            .as_socket()
            .ok_or_else(|| std::io::Error::other("accepted peer address is not AF_INET/AF_INET6"))?;
        Ok((AcceptorIoHandle::from_raw_fd(fd, self.core.logger.clone()), addr))
    }

    pub fn bind(&self, addr: SocketAddr) -> std::io::Result<()> {
        self.core.with_socket(|s| s.bind(&addr.into()))
    }

    pub fn listen(&self, backlog: i32) -> std::io::Result<()> {
        self.core.with_socket(|s| s.listen(backlog))
    }
}

impl fmt::Debug for AcceptorIoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptorIoHandle").field("fd", &self.core.fd).finish()
    }
}

/// Initiator-side custodial handle: `is_open` stays true after logical
/// close, so the owning client connection keeps believing the socket is
/// usable while the reversed traffic direction takes over.
pub struct InitiatorIoHandle {
    core: CustodialCore,
}

impl InitiatorIoHandle {
    pub fn from_raw_fd(fd: RawFd, logger: Logger) -> Self {
        InitiatorIoHandle {
            core: CustodialCore::new(fd, logger, "initiator_io_handle"),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.core.fd
    }

    pub fn is_open(&self) -> bool {
        true
    }

    pub fn close(&self) {
        self.core.close();
    }

    pub fn duplicate(&self) -> Result<(Socket, DuplicateGuard), RtError> {
        self.core.duplicate()
    }

    pub fn set_file_event(&self, token: FileEventToken) {
        self.core.set_file_event(token);
    }

    pub fn take_file_event(&self) -> Option<FileEventToken> {
        self.core.take_file_event()
    }

    pub fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        raw_recv(self.core.fd, buf, 0)
    }

    pub fn send(&self, buf: &[u8]) -> std::io::Result<usize> {
        raw_send(self.core.fd, buf, 0)
    }

    pub fn connect(&self, addr: SocketAddr) -> std::io::Result<()> {
        match self.core.with_socket(|s| s.connect(&addr.into())) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for InitiatorIoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitiatorIoHandle").field("fd", &self.core.fd).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::os::fd::AsRawFd;

    fn test_logger() -> Logger {
        Logger::null()
    }

    fn raw_pair() -> (RawFd, RawFd) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let client_fd = client.as_raw_fd();
        let server_fd = server.as_raw_fd();
        std::mem::forget(client);
        std::mem::forget(server);
        (client_fd, server_fd)
    }

    #[test]
    fn close_is_idempotent_and_retains_fd() {
        let (_client_fd, server_fd) = raw_pair();
        let handle = AcceptorIoHandle::from_raw_fd(server_fd, test_logger());

        handle.close();
        handle.close();
        handle.close();

        assert!(!handle.is_open());
        // fstat succeeding proves the fd is still a valid, open descriptor.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::fstat(server_fd, &mut stat) };
        assert_eq!(rc, 0);

        unsafe { libc::close(server_fd) };
        unsafe { libc::close(_client_fd) };
    }

    #[test]
    fn acceptor_is_open_false_after_close_initiator_stays_true() {
        let (client_fd, server_fd) = raw_pair();
        let acceptor = AcceptorIoHandle::from_raw_fd(server_fd, test_logger());
        let initiator = InitiatorIoHandle::from_raw_fd(client_fd, test_logger());

        acceptor.close();
        initiator.close();

        assert!(!acceptor.is_open());
        assert!(initiator.is_open());

        unsafe { libc::close(server_fd) };
        unsafe { libc::close(client_fd) };
    }

    #[test]
    fn recv_does_not_remap_zero_byte_without_a_duplicate() {
        let (client_fd, server_fd) = raw_pair();
        let acceptor = AcceptorIoHandle::from_raw_fd(server_fd, test_logger());

        unsafe { libc::close(client_fd) };
        // Peer fully closed; a genuine single-owner socket should report a
        // real 0-byte read (peer closed), not WouldBlock.
        let mut buf = [0u8; 4];
        let n = acceptor.recv(&mut buf).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn recv_remaps_zero_byte_while_duplicate_is_live_then_stops_after_retire() {
        let (client_fd, server_fd) = raw_pair();
        let acceptor = AcceptorIoHandle::from_raw_fd(server_fd, test_logger());
        let (dup, guard) = acceptor.duplicate().unwrap();

        unsafe { libc::close(client_fd) };

        let mut buf = [0u8; 4];
        let err = acceptor.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);

        guard.retire();
        let n = acceptor.recv(&mut buf).unwrap();
        assert_eq!(n, 0);

        drop(dup);
    }

    #[test]
    fn drop_never_closes_the_wrapped_fd() {
        let (client_fd, server_fd) = raw_pair();
        {
            let handle = AcceptorIoHandle::from_raw_fd(server_fd, test_logger());
            assert_eq!(handle.raw_fd(), server_fd);
        }
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::fstat(server_fd, &mut stat) };
        assert_eq!(rc, 0, "fd must still be open after the handle was dropped");

        unsafe { libc::close(server_fd) };
        unsafe { libc::close(client_fd) };
    }

    #[test]
    fn initialize_file_event_strips_closed_bit() {
        let requested = READABLE | WRITABLE | CLOSED;
        let effective = AcceptorIoHandle::initialize_file_event(requested);
        assert_eq!(effective, READABLE | WRITABLE);
    }
}
