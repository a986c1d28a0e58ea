use std::io;
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::os::raw::{c_int, c_void};
use std::os::unix::io::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpSocket};

/// Maximum TTL, for GTSM-style session protection (RFC 5082)
pub const TTL_MAX: u8 = 255;

// FFI struct used to set the TCP_MD5SIG socket option
#[repr(C)]
struct TcpMd5Sig {
    tcpm_addr: libc::sockaddr_storage,
    tcpm_flags: u8,
    tcpm_prefixlen: u8,
    tcpm_keylen: u16,
    __tcpm_pad: u32,
    tcpm_key: [u8; 108],
}

fn setsockopt(
    fd: i32,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: libc::socklen_t,
) -> io::Result<()> {
    let result = unsafe { libc::setsockopt(fd, level, optname, optval, optlen) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn sockaddr_storage(addr: IpAddr) -> libc::sockaddr_storage {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    match addr {
        IpAddr::V4(ip) => {
            let sin = &mut storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sin).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sin).sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(ip.octets()),
                };
            }
        }
        IpAddr::V6(ip) => {
            let sin6 = &mut storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sin6).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sin6).sin6_addr = libc::in6_addr {
                    s6_addr: ip.octets(),
                };
            }
        }
    }
    storage
}

/// Socket options this speaker needs beyond what tokio exposes
pub trait SocketExt: AsRawFd {
    /// TCP MD5 signatures (RFC 2385) toward one peer address
    fn set_md5sig(&self, peer: IpAddr, password: Option<&str>) -> io::Result<()> {
        let mut optval = TcpMd5Sig {
            tcpm_addr: sockaddr_storage(peer),
            tcpm_flags: 0,
            tcpm_prefixlen: 0,
            tcpm_keylen: 0,
            __tcpm_pad: 0,
            tcpm_key: [0u8; 108],
        };
        if let Some(password) = password {
            let key = password.as_bytes();
            if key.len() > optval.tcpm_key.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "MD5 password longer than 108 bytes",
                ));
            }
            optval.tcpm_keylen = key.len() as u16;
            optval.tcpm_key[..key.len()].copy_from_slice(key);
        }
        setsockopt(
            self.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_MD5SIG,
            &optval as *const _ as *const c_void,
            mem::size_of::<TcpMd5Sig>() as libc::socklen_t,
        )
    }

    fn set_ttl(&self, v6: bool, ttl: u8) -> io::Result<()> {
        let optval = c_int::from(ttl);
        let (level, optname) = if v6 {
            (libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS)
        } else {
            (libc::IPPROTO_IP, libc::IP_TTL)
        };
        setsockopt(
            self.as_raw_fd(),
            level,
            optname,
            &optval as *const _ as *const c_void,
            mem::size_of::<c_int>() as libc::socklen_t,
        )
    }

    /// Floor on accepted TTLs; GTSM peers set this to 255 - hops
    fn set_min_ttl(&self, v6: bool, ttl: u8) -> io::Result<()> {
        let optval = c_int::from(ttl);
        let (level, optname) = if v6 {
            (libc::IPPROTO_IPV6, libc::IPV6_MINHOPCOUNT)
        } else {
            (libc::IPPROTO_IP, libc::IP_MINTTL)
        };
        setsockopt(
            self.as_raw_fd(),
            level,
            optname,
            &optval as *const _ as *const c_void,
            mem::size_of::<c_int>() as libc::socklen_t,
        )
    }

    fn bind_device(&self, interface: &str) -> io::Result<()> {
        if interface.len() >= libc::IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "interface name too long",
            ));
        }
        setsockopt(
            self.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            interface.as_ptr() as *const c_void,
            interface.len() as libc::socklen_t,
        )
    }
}

impl SocketExt for Socket {}
impl SocketExt for TcpSocket {}
impl SocketExt for TcpListener {}
impl SocketExt for tokio::net::TcpStream {}

/// Per-peer transport options applied before connecting or accepting
#[derive(Clone, Debug, Default)]
pub struct TransportOptions {
    pub md5_password: Option<String>,
    pub source_interface: Option<String>,
    pub outgoing_ttl: Option<u8>,
    pub incoming_ttl: Option<u8>,
}

/// Build an outbound socket with the peer's transport options applied,
/// bound to the configured source address
pub fn outbound_socket(
    peer: SocketAddr,
    source: SocketAddr,
    options: &TransportOptions,
) -> io::Result<TcpSocket> {
    let domain = if peer.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    apply_peer_options(&socket, peer.ip(), options)?;
    socket.bind(&source.into())?;
    Ok(TcpSocket::from_std_stream(socket.into()))
}

/// Apply MD5/TTL/interface options for one peer to any of our socket types
pub fn apply_peer_options<S: SocketExt>(
    socket: &S,
    peer: IpAddr,
    options: &TransportOptions,
) -> io::Result<()> {
    let v6 = peer.is_ipv6();
    if let Some(password) = &options.md5_password {
        socket.set_md5sig(peer, Some(password))?;
    }
    if let Some(interface) = &options.source_interface {
        socket.bind_device(interface)?;
    }
    if let Some(ttl) = options.outgoing_ttl {
        socket.set_ttl(v6, ttl)?;
    }
    if let Some(hops) = options.incoming_ttl {
        // GTSM: only accept packets that could not have traveled further
        socket.set_min_ttl(v6, TTL_MAX.saturating_sub(hops))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sockaddr_fill() {
        let storage = sockaddr_storage("1.2.3.4".parse().unwrap());
        assert_eq!(storage.ss_family, libc::AF_INET as libc::sa_family_t);
        let storage = sockaddr_storage("2001:db8::1".parse().unwrap());
        assert_eq!(storage.ss_family, libc::AF_INET6 as libc::sa_family_t);
    }

    #[tokio::test]
    async fn test_outbound_socket_builds() {
        let peer: SocketAddr = "127.0.0.2:179".parse().unwrap();
        let source: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let socket = outbound_socket(peer, source, &TransportOptions::default()).unwrap();
        socket.set_ttl(false, 64).unwrap();
    }

    #[test]
    fn test_md5_password_length_guard() {
        let options = TransportOptions {
            md5_password: Some("x".repeat(200)),
            ..TransportOptions::default()
        };
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        struct Raw(i32);
        impl AsRawFd for Raw {
            fn as_raw_fd(&self) -> i32 {
                self.0
            }
        }
        impl SocketExt for Raw {}
        let raw = Raw(socket.as_raw_fd());
        let err = apply_peer_options(&raw, "1.2.3.4".parse().unwrap(), &options).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
