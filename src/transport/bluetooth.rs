// Bluetooth RFCOMM Transport
// Serial-port-profile socket over AF_BLUETOOTH, readiness detected with poll(2)

use crate::transport::traits::{closed_error, BdAddr, ConnectError, Transport};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{recv, send, shutdown, MsgFlags, Shutdown};
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// `BTPROTO_RFCOMM` from `<bluetooth/bluetooth.h>`
const BTPROTO_RFCOMM: libc::c_int = 3;

/// `struct sockaddr_rc` from `<bluetooth/rfcomm.h>`
#[repr(C)]
struct SockaddrRc {
    rc_family: libc::sa_family_t,
    rc_bdaddr: [u8; 6],
    rc_channel: u8,
}

// ============================================================================
// SHARED SOCKET
// ============================================================================

/// The OS socket, shared by every clone of a transport.
/// The descriptor is released when the last clone drops.
struct RfcommSocket {
    fd: OwnedFd,
    closed: AtomicBool,
}

impl RfcommSocket {
    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Wakes any poll(2) blocked on another clone with POLLHUP.
            if let Err(e) = shutdown(self.raw(), Shutdown::Both) {
                debug!(error = %e, "RFCOMM shutdown failed");
            }
        }
    }
}

// ============================================================================
// BLUETOOTH TRANSPORT
// ============================================================================

/// RFCOMM client socket
pub struct BluetoothTransport {
    socket: Arc<RfcommSocket>,
    address: BdAddr,
    channel: u8,
    read_buffer_size: usize,
}

impl BluetoothTransport {
    /// Open an RFCOMM socket and connect it to `address` on `channel`
    pub fn connect(
        address: BdAddr,
        channel: u8,
        read_buffer_size: usize,
    ) -> Result<Self, ConnectError> {
        // SAFETY: plain socket(2) call; nix has no protocol constant for RFCOMM.
        let raw = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
                BTPROTO_RFCOMM,
            )
        };
        if raw < 0 {
            return Err(ConnectError::IoFailure(
                io::Error::last_os_error().to_string(),
            ));
        }
        // SAFETY: `raw` is a freshly created descriptor that nothing else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let addr = SockaddrRc {
            rc_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            rc_bdaddr: address.to_le_bytes(),
            rc_channel: channel,
        };
        // SAFETY: `addr` is a live, correctly sized `sockaddr_rc` for the duration
        // of the call, and `fd` is an open socket owned by this function.
        let ret = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                &addr as *const SockaddrRc as *const libc::sockaddr,
                mem::size_of::<SockaddrRc>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(ConnectError::from_io(io::Error::last_os_error()));
        }

        debug!(%address, channel, "RFCOMM socket connected");

        Ok(Self {
            socket: Arc::new(RfcommSocket {
                fd,
                closed: AtomicBool::new(false),
            }),
            address,
            channel,
            read_buffer_size: read_buffer_size.max(1),
        })
    }

    pub fn address(&self) -> BdAddr {
        self.address
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.socket.is_closed() {
            Err(closed_error())
        } else {
            Ok(())
        }
    }
}

impl Transport for BluetoothTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.ensure_open()?;

        let mut remaining = bytes;
        while !remaining.is_empty() {
            match send(self.socket.raw(), remaining, MsgFlags::MSG_NOSIGNAL) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "RFCOMM socket accepted no bytes",
                    ));
                }
                Ok(n) => remaining = &remaining[n..],
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        trace!(len = bytes.len(), "rfcomm tx");
        Ok(())
    }

    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_open()?;

            // PollTimeout holds at most u16::MAX ms; longer waits take several rounds.
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice_ms = remaining.as_millis().min(u16::MAX as u128) as u16;

            let mut fds = [PollFd::new(self.socket.fd.as_fd(), PollFlags::POLLIN)];
            let ready = match poll(&mut fds, PollTimeout::from(slice_ms)) {
                Ok(n) => n,
                Err(Errno::EINTR) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            if ready == 0 {
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                continue;
            }

            self.ensure_open()?;
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "RFCOMM socket reported an error condition",
                ));
            }
            // POLLHUP counts as readable: the following read reports end-of-stream.
            return Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP));
        }
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        self.ensure_open()?;

        let mut buf = vec![0u8; self.read_buffer_size];
        loop {
            match recv(self.socket.raw(), &mut buf, MsgFlags::MSG_DONTWAIT) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the RFCOMM link",
                    ));
                }
                Ok(n) => {
                    buf.truncate(n);
                    trace!(len = n, "rfcomm rx");
                    return Ok(buf);
                }
                Err(Errno::EAGAIN) => return Ok(Vec::new()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) {
        if !self.socket.is_closed() {
            debug!(address = %self.address, channel = self.channel, "closing RFCOMM socket");
        }
        self.socket.shutdown();
    }

    fn is_open(&self) -> bool {
        !self.socket.is_closed()
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        self.ensure_open()?;
        Ok(Box::new(Self {
            socket: Arc::clone(&self.socket),
            address: self.address,
            channel: self.channel,
            read_buffer_size: self.read_buffer_size,
        }))
    }
}
