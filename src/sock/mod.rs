mod smart_sock;

use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

pub use smart_sock::*;

/// Datagram transport underneath a [`SmartSock`].
pub trait RawSocket {
    /// Send one datagram. The bytes are copied out before this returns.
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Receive one pending datagram into `buf`, or `None` when nothing is pending.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
}

/// Expects the socket to be in non-blocking mode.
impl RawSocket for UdpSocket {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match UdpSocket::recv_from(self, buf) {
            Ok(x) => Ok(Some(x)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}
