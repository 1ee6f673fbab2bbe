//! TCP socket setup.
//!
//! Startup-only code using plain syscalls: the listening socket the
//! acceptor arms accepts on, and unconnected stream sockets for
//! `async_connect`. Everything after setup goes through the queue.

use ringport_core::error::{Result, RingportError};

use nix::errno::Errno;

use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::errno_code;

/// A `sockaddr` encoded for the kernel.
///
/// Lives in a `Box` inside the connection while an async connect is in
/// flight, so the pointer handed to the kernel stays put.
#[derive(Clone, Copy)]
pub struct SockAddr {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl SockAddr {
    pub fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const libc::sockaddr_storage as *const libc::sockaddr
    }

    pub fn len(&self) -> libc::socklen_t {
        self.len
    }

    pub fn family(&self) -> libc::c_int {
        self.storage.ss_family as libc::c_int
    }

    /// Decode back into a std address. `None` for non-IP families.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.family() {
            libc::AF_INET => {
                // Safety: family says the storage holds a sockaddr_in.
                let sin = unsafe { &*(self.as_ptr() as *const libc::sockaddr_in) };
                Some(SocketAddr::V4(SocketAddrV4::new(
                    Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
                    u16::from_be(sin.sin_port),
                )))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(self.as_ptr() as *const libc::sockaddr_in6) };
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(addr: SocketAddr) -> Self {
        // Safety: all-zero is a valid sockaddr_storage.
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let len = match addr {
            SocketAddr::V4(v4) => {
                let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
                mem::size_of::<libc::sockaddr_in>()
            }
            SocketAddr::V6(v6) => {
                let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_addr.s6_addr = v6.ip().octets();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_scope_id = v6.scope_id();
                mem::size_of::<libc::sockaddr_in6>()
            }
        };
        Self { storage, len: len as libc::socklen_t }
    }
}

impl std::fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "SockAddr({})", addr),
            None => write!(f, "SockAddr(family={})", self.family()),
        }
    }
}

/// Resolve `address:port` to the first matching socket address.
pub fn resolve(address: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = address.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (address, port)
        .to_socket_addrs()
        .map_err(|_| RingportError::InvalidAddress)?
        .next()
        .ok_or(RingportError::InvalidAddress)
}

fn stream_socket(family: libc::c_int) -> Result<OwnedFd> {
    let fd = Errno::result(unsafe {
        libc::socket(family, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0)
    })
    .map_err(|e| RingportError::Socket(errno_code(e)))?;
    // Safety: fresh fd from socket(), owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn set_int_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<()> {
    Errno::result(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })
    .map(drop)
    .map_err(|e| RingportError::Socket(errno_code(e)))
}

/// Disable Nagle on a connected socket.
pub fn set_nodelay(fd: RawFd) -> Result<()> {
    set_int_opt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1)
}

/// Listening TCP socket.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
    local: SocketAddr,
}

impl Socket {
    /// Create, bind (SO_REUSEADDR) and listen on `address:port`.
    ///
    /// Port 0 picks an ephemeral port; `local_addr()` reports it.
    pub fn init(address: &str, port: u16, backlog: i32) -> Result<Self> {
        let addr = resolve(address, port)?;
        let sa = SockAddr::from(addr);
        let fd = stream_socket(sa.family())?;
        set_int_opt(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;

        Errno::result(unsafe { libc::bind(fd.as_raw_fd(), sa.as_ptr(), sa.len()) })
            .map_err(|e| RingportError::Socket(errno_code(e)))?;
        Errno::result(unsafe { libc::listen(fd.as_raw_fd(), backlog) })
            .map_err(|e| RingportError::Socket(errno_code(e)))?;

        let local = local_addr(fd.as_raw_fd())?;
        Ok(Self { fd, local })
    }

    /// Unconnected stream socket for `addr`'s family, plus the encoded
    /// destination for an async connect.
    pub fn connect_stream(addr: SocketAddr) -> Result<(OwnedFd, SockAddr)> {
        let sa = SockAddr::from(addr);
        let fd = stream_socket(sa.family())?;
        Ok((fd, sa))
    }

    /// Raw fd for completion-queue association.
    pub fn native(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

/// getsockname() as a std address.
pub fn local_addr(fd: RawFd) -> Result<SocketAddr> {
    let mut sa: SockAddr = SockAddr {
        storage: unsafe { mem::zeroed() },
        len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
    };
    Errno::result(unsafe {
        libc::getsockname(
            fd,
            &mut sa.storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut sa.len,
        )
    })
    .map_err(|e| RingportError::Os(errno_code(e)))?;
    sa.to_socket_addr().ok_or(RingportError::InvalidAddress)
}

/// getpeername() as a std address.
pub fn peer_addr(fd: RawFd) -> Result<SocketAddr> {
    let mut sa: SockAddr = SockAddr {
        storage: unsafe { mem::zeroed() },
        len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
    };
    Errno::result(unsafe {
        libc::getpeername(
            fd,
            &mut sa.storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut sa.len,
        )
    })
    .map_err(|e| RingportError::Os(errno_code(e)))?;
    sa.to_socket_addr().ok_or(RingportError::InvalidAddress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sockaddr_v4_round_trip() {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let sa = SockAddr::from(addr);
        assert_eq!(sa.family(), libc::AF_INET);
        assert_eq!(sa.len() as usize, mem::size_of::<libc::sockaddr_in>());
        assert_eq!(sa.to_socket_addr(), Some(addr));
    }

    #[test]
    fn test_sockaddr_v6_round_trip() {
        let addr: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(SockAddr::from(addr).to_socket_addr(), Some(addr));
    }

    #[test]
    fn test_init_ephemeral_port() {
        let sock = Socket::init("127.0.0.1", 0, 16).unwrap();
        assert!(sock.native() >= 0);
        assert_ne!(sock.local_addr().port(), 0);
        let client = std::net::TcpStream::connect(sock.local_addr()).unwrap();
        assert_eq!(peer_addr(client.as_raw_fd()).unwrap(), sock.local_addr());
    }

    #[test]
    fn test_resolve_literal_ip() {
        assert_eq!(
            resolve("10.1.2.3", 4000).unwrap(),
            "10.1.2.3:4000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(resolve("::1", 1).unwrap().port(), 1);
    }
}
