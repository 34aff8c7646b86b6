//! Listener peek buffer (C8): peeks socket data ahead of filter dispatch,
//! tolerating the false "remote closed" signal a duplicated fd can produce.

use std::os::fd::RawFd;

#[derive(Debug, PartialEq, Eq)]
pub enum PeekResult {
    Done(usize),
    Again,
    RemoteClose,
    Error(i32),
}

pub struct PeekBuffer {
    buffer: Vec<u8>,
    read_size: usize,
}

impl PeekBuffer {
    /// `buffer_size` is clamped to 1 when 0 — a zero-sized registered read
    /// yields a spurious close notification on some platforms once data
    /// actually arrives.
    pub fn new(buffer_size: usize) -> Self {
        let size = if buffer_size == 0 { 1 } else { buffer_size };
        PeekBuffer {
            buffer: vec![0u8; size],
            read_size: 0,
        }
    }

    pub fn peek_from_socket(&mut self, fd: RawFd) -> PeekResult {
        let n = unsafe {
            libc::recv(
                fd,
                self.buffer.as_mut_ptr() as *mut libc::c_void,
                self.buffer.len(),
                libc::MSG_PEEK,
            )
        };

        if n < 0 {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(-1);
            return if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                PeekResult::Again
            } else {
                PeekResult::Error(errno)
            };
        }
        if n == 0 {
            return PeekResult::RemoteClose;
        }

        self.read_size = n as usize;
        PeekResult::Done(self.read_size)
    }

    pub fn peeked_bytes(&self) -> &[u8] {
        &self.buffer[..self.read_size]
    }

    /// Consumes exactly `length` bytes via a non-peek `recv`, looping until
    /// satisfied. Any error, including `EAGAIN`, fails the drain: the
    /// caller only calls this after `peek_from_socket` already proved that
    /// many bytes were available.
    pub fn drain(&mut self, fd: RawFd, length: usize) -> bool {
        let mut consumed = 0usize;
        let mut scratch = vec![0u8; length];
        while consumed < length {
            let n = unsafe {
                libc::recv(
                    fd,
                    scratch[consumed..].as_mut_ptr() as *mut libc::c_void,
                    length - consumed,
                    0,
                )
            };
            if n <= 0 {
                return false;
            }
            consumed += n as usize;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::os::fd::AsRawFd;

    fn connected_pair() -> (std::net::TcpStream, std::net::TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn peek_then_drain_round_trip() {
        use std::io::Write;
        let (mut client, server) = connected_pair();
        client.write_all(b"hello").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut buf = PeekBuffer::new(16);
        let result = buf.peek_from_socket(server.as_raw_fd());
        assert_eq!(result, PeekResult::Done(5));
        assert_eq!(buf.peeked_bytes(), b"hello");

        assert!(buf.drain(server.as_raw_fd(), 5));

        // A second peek now sees only bytes written after the drain.
        let again = buf.peek_from_socket(server.as_raw_fd());
        assert_eq!(again, PeekResult::Again);
    }

    #[test]
    fn peek_reports_again_with_no_data() {
        let (_client, server) = connected_pair();
        let mut buf = PeekBuffer::new(16);
        assert_eq!(buf.peek_from_socket(server.as_raw_fd()), PeekResult::Again);
    }

    #[test]
    fn zero_sized_buffer_is_clamped_to_one() {
        let buf = PeekBuffer::new(0);
        assert_eq!(buf.buffer.len(), 1);
    }

    #[test]
    fn peek_reports_remote_close() {
        let (client, server) = connected_pair();
        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let mut buf = PeekBuffer::new(16);
        assert_eq!(buf.peek_from_socket(server.as_raw_fd()), PeekResult::RemoteClose);
    }
}
