//! The Linux HCI packet transport
//!
//! A raw `AF_BLUETOOTH` socket bound to a local adapter, with a kernel side HCI filter that
//! admits the events this host handles. The [`run`](HciSocket::run) loop multiplexes the one
//! socket: readable delivers inbound packets to the delegate, writable drains the outbound
//! queue, and a fixed timeout gives the stop flag a chance to be observed.

use crate::hci::{HciPacket, PacketDelegate, PacketQueue};
use nix::errno::Errno;
use nix::libc;
use nix::unistd::{close, read, write};
use std::os::unix::io::RawFd;

/// Linux Bluetooth socket constants from the bluez headers
mod raw {
    use nix::libc;

    pub const BTPROTO_HCI: libc::c_int = 1;
    pub const HCI_CHANNEL_RAW: u16 = 0;

    pub const SOL_HCI: libc::c_int = 0;
    pub const HCI_FILTER: libc::c_int = 2;

    pub const HCI_ACLDATA_PKT: u32 = 2;
    pub const HCI_EVENT_PKT: u32 = 4;

    #[repr(C)]
    pub struct sockaddr_hci {
        pub hci_family: libc::sa_family_t,
        pub hci_dev: u16,
        pub hci_channel: u16,
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct hci_filter {
        pub type_mask: u32,
        pub event_mask: [u32; 2],
        pub opcode: u16,
    }
}

#[derive(Debug)]
pub enum Error {
    IOError(nix::Error),
    /// The kernel reported an error condition on the socket
    SocketError,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::IOError(errno) => write!(f, "IO error: {}", errno),
            Error::SocketError => write!(f, "error condition on the HCI socket"),
        }
    }
}

impl std::error::Error for Error {}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::IOError(e)
    }
}

impl From<Errno> for Error {
    fn from(e: Errno) -> Self {
        Error::IOError(nix::Error::Sys(e))
    }
}

/// Owns a raw file descriptor, closing it on drop
#[derive(Debug)]
struct FileDescriptor(RawFd);

impl FileDescriptor {
    fn raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for FileDescriptor {
    fn drop(&mut self) {
        close(self.0).ok();
    }
}

/// Ignores the Unix errors EAGAIN and EINTR
fn ignore_eagain_and_eintr<F, R>(mut func: F) -> Result<R, Error>
where
    F: FnMut() -> Result<R, Error>,
{
    loop {
        match func() {
            Err(Error::IOError(nix::Error::Sys(errno)))
                if errno == Errno::EAGAIN || errno == Errno::EINTR =>
            {
                continue
            }
            result => break result,
        }
    }
}

/// An HCI packet transport over a Linux raw Bluetooth socket
pub struct HciSocket {
    dev_id: u16,
    fd: FileDescriptor,
    queue: PacketQueue,
}

impl HciSocket {
    /// Large enough for any packet of a 4.0 controller
    const MAX_PACKET_LEN: usize = 1024;

    /// The poll timeout, used only so the stop flag gets checked
    const POLL_TIMEOUT_MS: libc::c_int = 1000;

    /// Open the HCI device with the given adapter id
    pub fn open(dev_id: u16) -> Result<Self, Error> {
        let raw_fd = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                raw::BTPROTO_HCI,
            )
        };

        if raw_fd < 0 {
            return Err(Errno::last().into());
        }

        // From here the descriptor is closed on any error path
        let fd = FileDescriptor(raw_fd);

        let address = raw::sockaddr_hci {
            hci_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev_id,
            hci_channel: raw::HCI_CHANNEL_RAW,
        };

        let bound = unsafe {
            libc::bind(
                fd.raw_fd(),
                &address as *const raw::sockaddr_hci as *const libc::sockaddr,
                core::mem::size_of::<raw::sockaddr_hci>() as libc::socklen_t,
            )
        };

        if bound < 0 {
            return Err(Errno::last().into());
        }

        // Let through ACL data and the events the host handles: Disconnection Complete,
        // Command Complete, Command Status, and LE Meta.
        let filter = raw::hci_filter {
            type_mask: (1 << raw::HCI_EVENT_PKT) | (1 << raw::HCI_ACLDATA_PKT),
            event_mask: [
                (1 << 0x05) | (1 << 0x0E) | (1 << 0x0F),
                1 << (0x3E - 32),
            ],
            opcode: 0,
        };

        let filtered = unsafe {
            libc::setsockopt(
                fd.raw_fd(),
                raw::SOL_HCI,
                raw::HCI_FILTER,
                &filter as *const raw::hci_filter as *const libc::c_void,
                core::mem::size_of::<raw::hci_filter>() as libc::socklen_t,
            )
        };

        if filtered < 0 {
            return Err(Errno::last().into());
        }

        log::info!("opened HCI device {}", dev_id);

        Ok(HciSocket {
            dev_id,
            fd,
            queue: PacketQueue::new(),
        })
    }

    /// The outbound queue of this transport
    pub fn packet_queue(&mut self) -> &mut PacketQueue {
        &mut self.queue
    }

    /// Request that a running poll loop exits on its next iteration
    pub fn stop(&mut self) {
        self.queue.stop();
    }

    /// Run the poll loop until stopped or the socket fails
    ///
    /// Every inbound packet is decoded and fully handled by the delegate before the next
    /// poll; outbound packets queued by the delegate leave once the socket is writable.
    pub fn run(&mut self, delegate: &mut dyn PacketDelegate) -> Result<(), Error> {
        use nix::poll::{poll, EventFlags, PollFd};

        log::info!("polling HCI device {}", self.dev_id);

        while !self.queue.is_stopped() {
            let mut flags = EventFlags::POLLIN;

            if self.queue.has_packets() {
                flags |= EventFlags::POLLOUT;
            }

            let mut poll_fds = [PollFd::new(self.fd.raw_fd(), flags)];

            let count = ignore_eagain_and_eintr(|| {
                poll(&mut poll_fds, Self::POLL_TIMEOUT_MS).map_err(Error::from)
            })?;

            if count == 0 {
                // Timeout, loop around to observe the stop flag
                continue;
            }

            let revents = poll_fds[0].revents().unwrap_or_else(EventFlags::empty);

            if revents.contains(EventFlags::POLLERR) || revents.contains(EventFlags::POLLHUP) {
                log::error!("error on the HCI socket, exiting");
                self.queue.stop();
                return Err(Error::SocketError);
            }

            if revents.contains(EventFlags::POLLOUT) {
                if let Some(packet) = self.queue.next_packet() {
                    let bytes = packet.to_bytes();

                    log::trace!("sending {:02x?}", bytes);

                    ignore_eagain_and_eintr(|| {
                        write(self.fd.raw_fd(), &bytes).map_err(Error::from)
                    })?;
                }
            }

            if revents.contains(EventFlags::POLLIN) {
                let mut buffer = [0u8; Self::MAX_PACKET_LEN];

                let len = ignore_eagain_and_eintr(|| {
                    read(self.fd.raw_fd(), &mut buffer).map_err(Error::from)
                })?;

                match HciPacket::from_bytes(&buffer[..len]) {
                    Ok(packet) => delegate.on_packet_received(&mut self.queue, packet),
                    Err(e) => log::warn!("dropping bad packet from the controller: {}", e),
                }
            }
        }

        log::info!("stopped polling HCI device {}", self.dev_id);

        Ok(())
    }
}
