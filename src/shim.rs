// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! POSIX network shim
//!
//! A sample host for the stack built on non-blocking `std::net` sockets:
//! a TCP listener and a UDP socket on the explicit port 0xAF12, one shared
//! UDP socket on the I/O port 0x08AE, and a polling loop that alternates
//! between socket events and the timer tick. The stack itself never touches
//! a socket; everything flows through the entry points and [`UdpIo`].

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec::Reader;
use crate::connection::IO_UDP_PORT;
use crate::encap::{EncapHeader, ENCAP_PORT, HEADER_LEN};
use crate::error::EipError;
use crate::host::{AdapterApplication, SocketHandle, UdpDirection, UdpIo};
use crate::stack::Stack;

/// Handle returned for every consuming request; they all alias the shared
/// I/O socket, which stays open for the shim's lifetime.
const SHARED_CONSUMING_HANDLE: SocketHandle = SocketHandle(0);

/// [`UdpIo`] over the standard library.
#[derive(Debug)]
pub struct PosixUdpIo {
    io_socket: UdpSocket,
    producers: HashMap<u32, UdpSocket>,
    next_handle: u32,
}

impl PosixUdpIo {
    /// Bind the shared I/O socket.
    pub fn bind() -> Result<Self, EipError> {
        let io_socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, IO_UDP_PORT))
            .map_err(|e| EipError::Socket(format!("bind io port: {}", e)))?;
        io_socket
            .set_nonblocking(true)
            .map_err(|e| EipError::Socket(format!("set nonblocking: {}", e)))?;
        Ok(Self {
            io_socket,
            producers: HashMap::new(),
            next_handle: 0,
        })
    }

    /// Drain one datagram from the shared I/O socket.
    pub fn recv_io(&self, buffer: &mut [u8]) -> Option<(usize, SocketAddrV4)> {
        match self.io_socket.recv_from(buffer) {
            Ok((len, SocketAddr::V4(from))) => Some((len, from)),
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(error = %e, "io socket receive failed");
                None
            }
        }
    }
}

impl UdpIo for PosixUdpIo {
    fn create_udp_socket(
        &mut self,
        direction: UdpDirection,
        addr: SocketAddrV4,
    ) -> Result<SocketHandle, EipError> {
        match direction {
            UdpDirection::Consuming => Ok(SHARED_CONSUMING_HANDLE),
            UdpDirection::Producing => {
                let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
                    .map_err(|e| EipError::Socket(format!("bind producer: {}", e)))?;
                socket
                    .set_nonblocking(true)
                    .map_err(|e| EipError::Socket(format!("set nonblocking: {}", e)))?;
                if addr.ip().is_multicast() {
                    socket
                        .set_multicast_ttl_v4(1)
                        .map_err(|e| EipError::Socket(format!("multicast ttl: {}", e)))?;
                }
                self.next_handle += 1;
                let handle = SocketHandle(self.next_handle);
                self.producers.insert(handle.0, socket);
                debug!(handle = handle.0, to = %addr, "producing socket created");
                Ok(handle)
            }
        }
    }

    fn send_udp(
        &mut self,
        socket: SocketHandle,
        to: SocketAddrV4,
        data: &[u8],
    ) -> Result<(), EipError> {
        let endpoint = if socket == SHARED_CONSUMING_HANDLE {
            &self.io_socket
        } else {
            self.producers
                .get(&socket.0)
                .ok_or_else(|| EipError::Socket(format!("unknown socket handle {}", socket.0)))?
        };
        endpoint
            .send_to(data, to)
            .map_err(|e| EipError::Socket(format!("send to {}: {}", to, e)))?;
        Ok(())
    }

    fn close_udp_socket(&mut self, socket: SocketHandle) {
        if socket != SHARED_CONSUMING_HANDLE {
            self.producers.remove(&socket.0);
        }
    }
}

struct TcpPeer {
    stream: TcpStream,
    peer: SocketAddrV4,
    buffer: Vec<u8>,
}

/// The polling host loop.
pub struct Shim {
    listener: TcpListener,
    explicit_udp: UdpSocket,
    io: PosixUdpIo,
    peers: HashMap<u64, TcpPeer>,
    next_peer: u64,
}

impl Shim {
    pub fn bind() -> Result<Self, EipError> {
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, ENCAP_PORT))
            .map_err(|e| EipError::Socket(format!("bind tcp: {}", e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| EipError::Socket(format!("set nonblocking: {}", e)))?;
        let explicit_udp =
            UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, ENCAP_PORT))
                .map_err(|e| EipError::Socket(format!("bind explicit udp: {}", e)))?;
        explicit_udp
            .set_nonblocking(true)
            .map_err(|e| EipError::Socket(format!("set nonblocking: {}", e)))?;
        info!(port = ENCAP_PORT, "listening for explicit messaging");
        Ok(Self {
            listener,
            explicit_udp,
            io: PosixUdpIo::bind()?,
            peers: HashMap::new(),
            next_peer: 0,
        })
    }

    /// Alternate between network events and the timer tick until the
    /// process is stopped.
    pub fn run(&mut self, stack: &mut Stack, app: &mut dyn AdapterApplication) -> ! {
        let tick = Duration::from_micros(u64::from(stack.config().tick_us));
        let mut last_tick = Instant::now();
        let mut datagram = [0u8; 65536];

        loop {
            self.accept_peers();
            self.pump_tcp(stack, app);
            self.pump_explicit_udp(stack, app, &mut datagram);
            self.pump_io_udp(stack, app, &mut datagram);

            while last_tick.elapsed() >= tick {
                stack.manage_connections(&mut self.io, app);
                last_tick += tick;
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }

    fn accept_peers(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, SocketAddr::V4(peer))) => {
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    self.next_peer += 1;
                    debug!(%peer, "tcp peer connected");
                    self.peers.insert(
                        self.next_peer,
                        TcpPeer {
                            stream,
                            peer,
                            buffer: Vec::new(),
                        },
                    );
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "tcp accept failed");
                    break;
                }
            }
        }
    }

    fn pump_tcp(&mut self, stack: &mut Stack, app: &mut dyn AdapterApplication) {
        let mut closed = Vec::new();
        let mut chunk = [0u8; 8192];

        for (&id, peer) in self.peers.iter_mut() {
            loop {
                match peer.stream.read(&mut chunk) {
                    Ok(0) => {
                        closed.push(id);
                        break;
                    }
                    Ok(n) => peer.buffer.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        debug!(error = %e, "tcp read failed");
                        closed.push(id);
                        break;
                    }
                }
            }

            // frame on the encapsulation length field
            while let Some(frame_len) = framed_len(&peer.buffer) {
                let frame: Vec<u8> = peer.buffer.drain(..frame_len).collect();
                if let Some(reply) =
                    stack.handle_explicit_tcp_data(id, peer.peer, &frame, &mut self.io, app)
                {
                    if let Err(e) = peer.stream.write_all(&reply) {
                        debug!(error = %e, "tcp write failed");
                        closed.push(id);
                        break;
                    }
                }
            }
        }

        for id in closed {
            if let Some(peer) = self.peers.remove(&id) {
                debug!(peer = %peer.peer, "tcp peer disconnected");
            }
            stack.close_session(id);
        }
    }

    fn pump_explicit_udp(
        &mut self,
        stack: &mut Stack,
        app: &mut dyn AdapterApplication,
        datagram: &mut [u8],
    ) {
        loop {
            match self.explicit_udp.recv_from(datagram) {
                Ok((len, SocketAddr::V4(from))) => {
                    if let Some(reply) = stack.handle_explicit_udp_data(
                        from,
                        &datagram[..len],
                        true,
                        &mut self.io,
                        app,
                    ) {
                        let _ = self.explicit_udp.send_to(&reply, from);
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "explicit udp receive failed");
                    break;
                }
            }
        }
    }

    fn pump_io_udp(
        &mut self,
        stack: &mut Stack,
        app: &mut dyn AdapterApplication,
        datagram: &mut [u8],
    ) {
        while let Some((len, from)) = self.io.recv_io(datagram) {
            if let Err(e) = stack.handle_received_connected_data(from, &datagram[..len], app) {
                debug!(error = %e, "connected datagram dropped");
            }
        }
    }
}

/// Length of the first complete encapsulation frame in `buffer`, if any.
fn framed_len(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < HEADER_LEN {
        return None;
    }
    let mut reader = Reader::new(buffer);
    let header = EncapHeader::parse(&mut reader).ok()?;
    let total = HEADER_LEN + usize::from(header.length);
    (buffer.len() >= total).then_some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encap::{commands, write_frame};
    use crate::error::EncapStatus;

    #[test]
    fn test_framed_len() {
        let frame = write_frame(commands::NOP, 0, EncapStatus::Success, [0; 8], &[1, 2, 3]);
        assert_eq!(framed_len(&frame), Some(HEADER_LEN + 3));
        assert_eq!(framed_len(&frame[..10]), None);

        let mut two = frame.clone();
        two.extend_from_slice(&frame);
        assert_eq!(framed_len(&two), Some(HEADER_LEN + 3));
    }
}
