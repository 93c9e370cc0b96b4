//! Non-blocking socket primitives and the readiness multiplexer (C2).
//!
//! Unlike a threaded, channel-driven poller, the dispatcher here owns the
//! [`mio::Poll`] instance directly and drives it synchronously from its own
//! event loop: there is exactly one thread in this process.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use mio::net::{TcpStream, UdpSocket};
use mio::{Interest, Token};

use crate::config::Family;

/// Binds the UDP listener's wildcard socket for the configured address
/// family.
///
/// For [`Family::DualStack`] this clears `IPV6_V6ONLY` so the single IPv6
/// wildcard socket also accepts IPv4-mapped traffic, letting one socket
/// serve both address families (the inverse of a per-family relay that
/// wants strict separation).
pub fn bind_udp_listener(family: Family, port: u16) -> io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let (domain, address, only_v6) = match family {
        Family::V4 => (Domain::IPV4, IpAddr::from(Ipv4Addr::UNSPECIFIED), None),
        Family::DualStack => (
            Domain::IPV6,
            IpAddr::from(Ipv6Addr::UNSPECIFIED),
            Some(false),
        ),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if let Some(v6only) = only_v6 {
        socket.set_only_v6(v6only)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::new(address, port).into())?;

    Ok(UdpSocket::from_std(socket.into()))
}

/// Initiates a non-blocking TCP connection to `upstream`.
///
/// Returns immediately regardless of whether the handshake has completed;
/// completion (or failure) is observed later via writable readiness plus
/// [`TcpStream::take_error`].
pub fn connect_upstream(upstream: SocketAddr) -> io::Result<TcpStream> {
    TcpStream::connect(upstream)
}

/// Wraps [`mio::Poll`] with the registration bookkeeping the dispatcher
/// needs: every slot's upstream socket and the single UDP listener are
/// registered under a [`Token`].
pub struct Reactor {
    poll: mio::Poll,
    events: mio::Events,
}

impl Reactor {
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: mio::Poll::new()?,
            events: mio::Events::with_capacity(capacity),
        })
    }

    pub fn register_udp(&self, socket: &mut UdpSocket, token: Token) -> io::Result<()> {
        self.poll.registry().register(socket, token, Interest::READABLE)
    }

    pub fn register_tcp(
        &self,
        stream: &mut TcpStream,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().register(stream, token, interest)
    }

    pub fn reregister_tcp(
        &self,
        stream: &mut TcpStream,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.poll.registry().reregister(stream, token, interest)
    }

    pub fn deregister_tcp(&self, stream: &mut TcpStream) -> io::Result<()> {
        self.poll.registry().deregister(stream)
    }

    /// Blocks until one or more registered descriptors is ready, or
    /// `timeout` elapses. Production code always passes `None`; tests pass
    /// a short timeout to drive the dispatcher deterministically without
    /// hanging when nothing is ready.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Yields `(token, readable, writable)` for every descriptor reported
    /// ready by the last `wait` call.
    pub fn ready_events(&self) -> impl Iterator<Item = (Token, bool, bool)> + '_ {
        self.events
            .iter()
            .map(|event| (event.token(), event.is_readable(), event.is_writable()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_listener_binds_and_is_nonblocking() {
        let mut socket = bind_udp_listener(Family::V4, 0).expect("bind");
        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn dual_stack_listener_accepts_v4_and_v6_loopback() {
        let mut listener = bind_udp_listener(Family::DualStack, 0).expect("bind");
        let local_port = listener.local_addr().unwrap().port();

        let v4_sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        v4_sender
            .send_to(b"hi", ("127.0.0.1", local_port))
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        let mut buf = [0u8; 16];
        let (n, _from) = listener.recv_from(&mut buf).expect("recv v4-mapped datagram");
        assert_eq!(&buf[..n], b"hi");
    }
}
