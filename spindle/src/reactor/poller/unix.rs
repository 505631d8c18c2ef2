use libc::{
    AF_INET, AF_INET6, IPPROTO_IPV6, IPV6_V6ONLY, MSG_NOSIGNAL, SO_ERROR, SO_REUSEADDR,
    SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_STREAM, SOL_SOCKET, accept4, bind, c_int, close, connect,
    getpeername, getsockname, getsockopt, listen, recv, send, setsockopt, sockaddr, sockaddr_in,
    sockaddr_in6, sockaddr_storage, socket, socklen_t,
};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::RawFd;
use std::{io, mem};

/// Backlog passed to `listen(2)`.
const LISTEN_BACKLOG: c_int = 1024;

fn cvt(rc: c_int) -> io::Result<c_int> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn cvt_size(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// An owned, non-blocking stream socket.
///
/// Only the reactor thread performs I/O on it; the descriptor is closed
/// when the value is dropped.
#[derive(Debug)]
pub(crate) struct Socket(RawFd);

impl Socket {
    /// Creates a non-blocking, close-on-exec stream socket for `address`.
    pub(crate) fn stream_for(address: &SocketAddr) -> io::Result<Self> {
        let domain = match address {
            SocketAddr::V4(_) => AF_INET,
            SocketAddr::V6(_) => AF_INET6,
        };

        let fd = cvt(unsafe { socket(domain, SOCK_STREAM | SOCK_NONBLOCK | SOCK_CLOEXEC, 0) })?;
        let socket = Self(fd);

        if domain == AF_INET6 {
            socket.set_v6only(false)?;
        }

        Ok(socket)
    }

    /// Creates a listening socket bound to `address`.
    ///
    /// This enables `SO_REUSEADDR`, configures IPv6 dual-stack if
    /// applicable, binds and starts listening.
    pub(crate) fn listen(address: &SocketAddr) -> io::Result<Self> {
        let socket = Self::stream_for(address)?;

        socket.set_reuseaddr()?;

        let (storage, len) = socketaddr_to_storage(address);
        cvt(unsafe { bind(socket.0, &storage as *const _ as *const sockaddr, len) })?;
        cvt(unsafe { listen(socket.0, LISTEN_BACKLOG) })?;

        Ok(socket)
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.0
    }

    /// Accepts a pending connection as a non-blocking socket.
    pub(crate) fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

        let fd = cvt(unsafe {
            accept4(
                self.0,
                &mut storage as *mut _ as *mut sockaddr,
                &mut len,
                SOCK_NONBLOCK | SOCK_CLOEXEC,
            )
        })?;
        let client = Socket(fd);

        Ok((client, sockaddr_storage_to_socketaddr(&storage)?))
    }

    /// Starts a non-blocking connect.
    ///
    /// Returns `Ok(())` both when the connection completed immediately and
    /// when it is in progress; completion is reported by writability.
    pub(crate) fn connect(&self, address: &SocketAddr) -> io::Result<()> {
        let (storage, len) = socketaddr_to_storage(address);

        match cvt(unsafe { connect(self.0, &storage as *const _ as *const sockaddr, len) }) {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reads available bytes. `Ok(0)` means end of stream.
    pub(crate) fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        cvt_size(unsafe { recv(self.0, buffer.as_mut_ptr() as *mut _, buffer.len(), 0) })
    }

    /// Writes as much of `buffer` as the socket accepts.
    ///
    /// Uses `MSG_NOSIGNAL`, so a closed peer surfaces as `EPIPE` instead of
    /// killing the process.
    pub(crate) fn send(&self, buffer: &[u8]) -> io::Result<usize> {
        cvt_size(unsafe {
            send(
                self.0,
                buffer.as_ptr() as *const _,
                buffer.len(),
                MSG_NOSIGNAL,
            )
        })
    }

    /// Returns and clears the pending socket error (`SO_ERROR`).
    pub(crate) fn take_error(&self) -> io::Result<Option<io::Error>> {
        let mut value: c_int = 0;
        let mut len = mem::size_of::<c_int>() as socklen_t;

        cvt(unsafe {
            getsockopt(
                self.0,
                SOL_SOCKET,
                SO_ERROR,
                &mut value as *mut _ as *mut _,
                &mut len,
            )
        })?;

        Ok((value != 0).then(|| io::Error::from_raw_os_error(value)))
    }

    /// Returns the local address of the socket.
    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

        cvt(unsafe { getsockname(self.0, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
        sockaddr_storage_to_socketaddr(&storage)
    }

    /// Returns the address of the connected peer.
    pub(crate) fn peer_addr(&self) -> io::Result<SocketAddr> {
        let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<sockaddr_storage>() as socklen_t;

        cvt(unsafe { getpeername(self.0, &mut storage as *mut _ as *mut sockaddr, &mut len) })?;
        sockaddr_storage_to_socketaddr(&storage)
    }

    fn set_reuseaddr(&self) -> io::Result<()> {
        self.set_int_option(SOL_SOCKET, SO_REUSEADDR, 1)
    }

    fn set_v6only(&self, v6only: bool) -> io::Result<()> {
        self.set_int_option(IPPROTO_IPV6, IPV6_V6ONLY, v6only as c_int)
    }

    fn set_int_option(&self, level: c_int, name: c_int, value: c_int) -> io::Result<()> {
        cvt(unsafe {
            setsockopt(
                self.0,
                level,
                name,
                &value as *const _ as *const _,
                mem::size_of::<c_int>() as socklen_t,
            )
        })
        .map(drop)
    }
}

impl Drop for Socket {
    /// Closes the socket.
    fn drop(&mut self) {
        unsafe { close(self.0) };
    }
}

/// Converts a `sockaddr_storage` to a Rust `SocketAddr`.
pub(crate) fn sockaddr_storage_to_socketaddr(storage: &sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);

            Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }

        AF_INET6 => {
            let addr = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(addr.sin6_addr.s6_addr);
            let port = u16::from_be(addr.sin6_port);

            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }

        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported address family",
        )),
    }
}

/// Converts a `SocketAddr` to a `sockaddr_storage`.
pub(crate) fn socketaddr_to_storage(addr: &SocketAddr) -> (sockaddr_storage, socklen_t) {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };

    match addr {
        SocketAddr::V4(v4) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in) };
            sa.sin_family = AF_INET as _;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from(*v4.ip()).to_be();

            (storage, mem::size_of::<sockaddr_in>() as socklen_t)
        }

        SocketAddr::V6(v6) => {
            let sa = unsafe { &mut *(&mut storage as *mut _ as *mut sockaddr_in6) };
            sa.sin6_family = AF_INET6 as _;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            sa.sin6_flowinfo = v6.flowinfo();
            sa.sin6_scope_id = v6.scope_id();

            (storage, mem::size_of::<sockaddr_in6>() as socklen_t)
        }
    }
}
