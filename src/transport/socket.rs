//! UDP socket pool.
//!
//! Sockets are explicit resources: a [`SocketPool`] owns every socket it
//! binds and releases them when dropped. Handles are plain indices into the
//! pool and are only meaningful to the pool that issued them.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

/// Handle to a socket owned by a [`SocketPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(pub(crate) usize);

impl SocketHandle {
    /// Pool index of this handle.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Bind a non-blocking UDP socket on all interfaces.
///
/// Port 0 picks an ephemeral port.
pub async fn bind_udp(port: u16, ipv6: bool) -> io::Result<UdpSocket> {
    let addr = if ipv6 {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))
    } else {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
    };
    UdpSocket::bind(addr).await
}

/// Owned set of bound sockets.
#[derive(Debug, Default)]
pub struct SocketPool {
    sockets: Vec<Arc<UdpSocket>>,
}

impl SocketPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a bound socket.
    pub fn insert(&mut self, socket: UdpSocket) -> SocketHandle {
        self.sockets.push(Arc::new(socket));
        SocketHandle(self.sockets.len() - 1)
    }

    /// Shared reference to a socket.
    pub fn get(&self, handle: SocketHandle) -> Option<&Arc<UdpSocket>> {
        self.sockets.get(handle.0)
    }

    /// Whether the socket behind `handle` is bound to an IPv6 address.
    pub fn is_ipv6(&self, handle: SocketHandle) -> Option<bool> {
        self.get(handle)
            .and_then(|socket| socket.local_addr().ok())
            .map(|addr| addr.is_ipv6())
    }

    /// Iterate over `(handle, socket)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (SocketHandle, &Arc<UdpSocket>)> {
        self.sockets
            .iter()
            .enumerate()
            .map(|(i, socket)| (SocketHandle(i), socket))
    }

    /// Number of sockets.
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    /// Check if the pool holds no sockets.
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

/// Receive one datagram without waiting.
///
/// Returns `Ok(None)` when nothing is queued.
pub fn try_recv(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
    match socket.try_recv_from(buf) {
        Ok((len, addr)) => Ok(Some((len, addr))),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_socket_bind() {
        let socket = bind_udp(0, false).await.unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.port() != 0);
        assert!(addr.is_ipv4());
    }

    #[tokio::test]
    async fn test_pool_handles() {
        let mut pool = SocketPool::new();
        assert!(pool.is_empty());

        let first = pool.insert(bind_udp(0, false).await.unwrap());
        let second = pool.insert(bind_udp(0, false).await.unwrap());

        assert_ne!(first, second);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.is_ipv6(first), Some(false));
        assert!(pool.get(SocketHandle(7)).is_none());
        assert_eq!(pool.iter().count(), 2);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let server = bind_udp(0, false).await.unwrap();
        let port = server.local_addr().unwrap().port();
        let client = bind_udp(0, false).await.unwrap();

        let mut buf = [0u8; 64];
        assert!(try_recv(&server, &mut buf).unwrap().is_none());

        client
            .send_to(b"hello shroud", ("127.0.0.1", port))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), server.readable())
            .await
            .unwrap()
            .unwrap();

        let mut received = None;
        for _ in 0..100 {
            if let Some(got) = try_recv(&server, &mut buf).unwrap() {
                received = Some(got);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let (len, _) = received.unwrap();
        assert_eq!(&buf[..len], b"hello shroud");
    }
}
