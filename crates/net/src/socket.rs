use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Raw datagram transport polled once per tick.
pub trait DatagramSocket {
    fn send_to(&mut self, data: &[u8], address: SocketAddr) -> io::Result<usize>;

    /// Returns `Ok(None)` when no datagram is waiting.
    fn recv_from(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> SocketAddr;
}

impl<S: DatagramSocket + ?Sized> DatagramSocket for Box<S> {
    fn send_to(&mut self, data: &[u8], address: SocketAddr) -> io::Result<usize> {
        (**self).send_to(data, address)
    }

    fn recv_from(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        (**self).recv_from(buffer)
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }
}

/// Non-blocking OS UDP socket.
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpDatagramSocket {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self { socket, local_addr })
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&mut self, data: &[u8], address: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, address)
    }

    fn recv_from(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        loop {
            match self.socket.recv_from(buffer) {
                Ok(received) => return Ok(Some(received)),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // Windows reports ICMP port unreachable from an earlier send here.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_udp_loopback() {
        let mut a = UdpDatagramSocket::bind("127.0.0.1:0").unwrap();
        let mut b = UdpDatagramSocket::bind("127.0.0.1:0").unwrap();

        let mut buffer = [0u8; 16];
        assert!(b.recv_from(&mut buffer).unwrap().is_none());

        a.send_to(&[1, 2, 3], b.local_addr()).unwrap();

        let start = Instant::now();
        loop {
            if let Some((size, from)) = b.recv_from(&mut buffer).unwrap() {
                assert_eq!(&buffer[..size], &[1, 2, 3]);
                assert_eq!(from, a.local_addr());
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(1), "no datagram received");
            thread::sleep(Duration::from_millis(1));
        }
    }
}
