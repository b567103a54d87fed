use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The transport of a stream socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Connection-oriented streaming over IPv4.
    TcpIpv4,
    /// Connection-oriented streaming over IPv6.
    TcpIpv6,
    /// Connection-oriented streaming over a local (Unix domain) socket.
    Local,
}

/// The source or remote name of a stream socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// An Internet address and port.
    Ip(SocketAddr),
    /// A local (Unix domain) path.
    Local(PathBuf),
}

impl Endpoint {
    /// Returns the transport implied by this endpoint.
    pub fn transport(&self) -> Transport {
        match self {
            Endpoint::Ip(SocketAddr::V4(_)) => Transport::TcpIpv4,
            Endpoint::Ip(SocketAddr::V6(_)) => Transport::TcpIpv6,
            Endpoint::Local(_) => Transport::Local,
        }
    }

    /// Returns the Internet address, if this is an IP endpoint.
    pub fn ip(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Ip(addr) => Some(*addr),
            Endpoint::Local(_) => None,
        }
    }

    pub(crate) fn to_sock_addr(&self) -> Result<socket2::SockAddr> {
        match self {
            Endpoint::Ip(addr) => Ok(socket2::SockAddr::from(*addr)),
            Endpoint::Local(path) => {
                socket2::SockAddr::unix(path).map_err(Error::from)
            }
        }
    }

    pub(crate) fn from_sock_addr(addr: &socket2::SockAddr) -> Option<Endpoint> {
        if let Some(ip) = addr.as_socket() {
            return Some(Endpoint::Ip(ip));
        }
        addr.as_pathname()
            .map(|path| Endpoint::Local(path.to_path_buf()))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Endpoint {
        Endpoint::Ip(addr)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(text: &str) -> Result<Endpoint> {
        if let Ok(addr) = text.parse::<SocketAddr>() {
            return Ok(Endpoint::Ip(addr));
        }
        if text.starts_with('/') || text.starts_with("./") {
            return Ok(Endpoint::Local(PathBuf::from(text)));
        }
        Err(Error::Invalid)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ip(addr) => addr.fmt(fmt),
            Endpoint::Local(path) => path.display().fmt(fmt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_endpoints() {
        let endpoint: Endpoint = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(endpoint.transport(), Transport::TcpIpv4);

        let endpoint: Endpoint = "[::1]:8080".parse().unwrap();
        assert_eq!(endpoint.transport(), Transport::TcpIpv6);
    }

    #[test]
    fn parses_local_endpoints() {
        let endpoint: Endpoint = "/tmp/rivulet.sock".parse().unwrap();
        assert_eq!(endpoint.transport(), Transport::Local);
    }

    #[test]
    fn rejects_bare_names() {
        assert_eq!("example.com:80".parse::<Endpoint>(), Err(Error::Invalid));
    }
}
