// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! EtherNet/IP encapsulation layer
//!
//! The 24-byte encapsulation header, the Common Packet Format item list,
//! the TCP session registry and the bodies of the discovery commands
//! (ListServices, ListIdentity, ListInterfaces). Command routing sits in
//! the stack; this module owns the byte shapes and the session state.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};

use tracing::debug;

use crate::codec::{Reader, Value, Writer};
use crate::config::{DeviceConfig, NetworkConfig};
use crate::error::{EncapError, EncapStatus};

/// TCP and UDP port for explicit messaging.
pub const ENCAP_PORT: u16 = 0xAF12;
/// Encapsulation header byte count.
pub const HEADER_LEN: usize = 24;
/// The only protocol version that exists.
pub const PROTOCOL_VERSION: u16 = 1;
/// Simultaneous TCP sessions supported.
pub const MAX_SESSIONS: usize = 20;

/// Encapsulation command codes.
pub mod commands {
    pub const NOP: u16 = 0x0000;
    pub const LIST_SERVICES: u16 = 0x0004;
    pub const LIST_IDENTITY: u16 = 0x0063;
    pub const LIST_INTERFACES: u16 = 0x0064;
    pub const REGISTER_SESSION: u16 = 0x0065;
    pub const UNREGISTER_SESSION: u16 = 0x0066;
    pub const SEND_RR_DATA: u16 = 0x006F;
    pub const SEND_UNIT_DATA: u16 = 0x0070;
}

/// Common Packet Format item type ids.
pub mod cpf_item {
    pub const NULL_ADDRESS: u16 = 0x0000;
    pub const LIST_IDENTITY_RESPONSE: u16 = 0x000C;
    pub const CONNECTED_ADDRESS: u16 = 0x00A1;
    pub const CONNECTED_DATA: u16 = 0x00B1;
    pub const UNCONNECTED_DATA: u16 = 0x00B2;
    pub const LIST_SERVICES_RESPONSE: u16 = 0x0100;
    pub const SOCKADDR_O_TO_T: u16 = 0x8000;
    pub const SOCKADDR_T_TO_O: u16 = 0x8001;
}

/// Identifier the platform assigns to a TCP connection.
pub type TcpHandle = u64;

/// The fixed encapsulation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncapHeader {
    pub command: u16,
    pub length: u16,
    pub session_handle: u32,
    pub status: u32,
    pub sender_context: [u8; 8],
    pub options: u32,
}

impl EncapHeader {
    pub fn parse(input: &mut Reader) -> Result<Self, EncapError> {
        if input.remaining() < HEADER_LEN {
            return Err(EncapError::Truncated);
        }
        let command = input.get_u16().expect("length checked");
        let length = input.get_u16().expect("length checked");
        let session_handle = input.get_u32().expect("length checked");
        let status = input.get_u32().expect("length checked");
        let mut sender_context = [0u8; 8];
        sender_context.copy_from_slice(input.get_bytes(8).expect("length checked"));
        let options = input.get_u32().expect("length checked");

        if usize::from(length) > input.remaining() {
            return Err(EncapError::BadLength(length));
        }
        Ok(Self {
            command,
            length,
            session_handle,
            status,
            sender_context,
            options,
        })
    }
}

/// Serialize a complete encapsulation frame: header with patched length
/// plus `body`.
pub fn write_frame(
    command: u16,
    session_handle: u32,
    status: EncapStatus,
    sender_context: [u8; 8],
    body: &[u8],
) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u16(command).expect("header fits");
    w.put_u16(body.len() as u16).expect("header fits");
    w.put_u32(session_handle).expect("header fits");
    w.put_u32(status.as_u32()).expect("header fits");
    w.put_bytes(&sender_context).expect("header fits");
    w.put_u32(0).expect("header fits"); // options
    w.put_bytes(body).expect("body bounded by caller");
    w.into_bytes()
}

/// One decoded CPF item, borrowing the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpfItem<'a> {
    pub type_id: u16,
    pub data: &'a [u8],
}

/// A decoded item list.
#[derive(Debug, Clone)]
pub struct Cpf<'a> {
    pub items: Vec<CpfItem<'a>>,
}

impl<'a> Cpf<'a> {
    pub fn parse(input: &mut Reader<'a>) -> Result<Self, EncapError> {
        let count = input.get_u16().map_err(|_| EncapError::BadCpf)?;
        let mut items = Vec::with_capacity(usize::from(count).min(8));
        for _ in 0..count {
            let type_id = input.get_u16().map_err(|_| EncapError::BadCpf)?;
            let length = input.get_u16().map_err(|_| EncapError::BadCpf)?;
            let data = input
                .get_bytes(usize::from(length))
                .map_err(|_| EncapError::BadCpf)?;
            items.push(CpfItem { type_id, data });
        }
        Ok(Self { items })
    }

    pub fn find(&self, type_id: u16) -> Option<&'a [u8]> {
        self.items
            .iter()
            .find(|item| item.type_id == type_id)
            .map(|item| item.data)
    }

    /// Serialize an item list.
    pub fn write(out: &mut Writer, items: &[(u16, &[u8])]) {
        out.put_u16(items.len() as u16).expect("bounded reply");
        for (type_id, data) in items {
            out.put_u16(*type_id).expect("bounded reply");
            out.put_u16(data.len() as u16).expect("bounded reply");
            out.put_bytes(data).expect("bounded reply");
        }
    }
}

/// Decode a 16-byte CPF sockaddr-info payload (big-endian sockaddr_in).
pub fn parse_sockaddr(data: &[u8]) -> Option<SocketAddrV4> {
    if data.len() < 16 {
        return None;
    }
    let port = u16::from_be_bytes([data[2], data[3]]);
    let addr = Ipv4Addr::new(data[4], data[5], data[6], data[7]);
    Some(SocketAddrV4::new(addr, port))
}

/// Encode a sockaddr-info payload.
pub fn write_sockaddr(out: &mut Writer, addr: SocketAddrV4) {
    out.put_bytes(&2i16.to_be_bytes()).expect("fixed size"); // AF_INET
    out.put_bytes(&addr.port().to_be_bytes()).expect("fixed size");
    out.put_bytes(&addr.ip().octets()).expect("fixed size");
    out.put_bytes(&[0u8; 8]).expect("fixed size");
}

/// One registered TCP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub handle: u32,
    pub socket: TcpHandle,
}

/// Session registry. Handles are sequential, non-zero and per-boot unique.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<u32, Session>,
    next_handle: u32,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session for `socket`. One session per TCP connection; a
    /// second register on the same socket is answered with the existing
    /// handle, matching originators that retry.
    pub fn register(&mut self, socket: TcpHandle) -> Result<u32, EncapError> {
        if let Some(existing) = self.sessions.values().find(|s| s.socket == socket) {
            return Ok(existing.handle);
        }
        if self.sessions.len() >= MAX_SESSIONS {
            return Err(EncapError::SessionsExhausted);
        }
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        while self.sessions.contains_key(&self.next_handle) {
            self.next_handle = self.next_handle.wrapping_add(1).max(1);
        }
        let handle = self.next_handle;
        self.sessions.insert(handle, Session { handle, socket });
        debug!(handle, socket, "session registered");
        Ok(handle)
    }

    pub fn unregister(&mut self, handle: u32) -> Option<Session> {
        let session = self.sessions.remove(&handle);
        if session.is_some() {
            debug!(handle, "session unregistered");
        }
        session
    }

    pub fn is_valid(&self, handle: u32) -> bool {
        self.sessions.contains_key(&handle)
    }

    /// Remove the session owned by a TCP connection the peer closed.
    pub fn close_for_socket(&mut self, socket: TcpHandle) -> Option<Session> {
        let handle = self
            .sessions
            .values()
            .find(|s| s.socket == socket)
            .map(|s| s.handle)?;
        self.unregister(handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// ListServices reply body: one Communications item announcing CIP over
/// TCP and Class-0/1 UDP support.
pub fn list_services_body() -> Vec<u8> {
    let mut content = Writer::new();
    content.put_u16(PROTOCOL_VERSION).expect("fixed size");
    content.put_u16(0x0120).expect("fixed size"); // TCP + class-0/1 UDP
    let mut name = [0u8; 16];
    name[..14].copy_from_slice(b"Communications");
    content.put_bytes(&name).expect("fixed size");

    let mut body = Writer::new();
    Cpf::write(
        &mut body,
        &[(cpf_item::LIST_SERVICES_RESPONSE, content.as_slice())],
    );
    body.into_bytes()
}

/// ListIdentity reply body: the Identity object summary plus the device's
/// explicit-messaging address.
pub fn list_identity_body(device: &DeviceConfig, network: &NetworkConfig) -> Vec<u8> {
    let mut content = Writer::new();
    content.put_u16(PROTOCOL_VERSION).expect("bounded");
    write_sockaddr(&mut content, SocketAddrV4::new(network.ip, ENCAP_PORT));
    content.put_u16(device.vendor_id).expect("bounded");
    content.put_u16(device.device_type).expect("bounded");
    content.put_u16(device.product_code).expect("bounded");
    content.put_u8(device.revision_major).expect("bounded");
    content.put_u8(device.revision_minor).expect("bounded");
    content.put_u16(0).expect("bounded"); // status
    content.put_u32(device.serial_number).expect("bounded");
    Value::ShortString(device.product_name.clone())
        .encode(&mut content)
        .expect("name bounded by config");
    content.put_u8(0x03).expect("bounded"); // state: operational

    let mut body = Writer::new();
    Cpf::write(
        &mut body,
        &[(cpf_item::LIST_IDENTITY_RESPONSE, content.as_slice())],
    );
    body.into_bytes()
}

/// ListInterfaces reply body: an empty item list.
pub fn list_interfaces_body() -> Vec<u8> {
    let mut body = Writer::new();
    body.put_u16(0).expect("fixed size");
    body.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse_and_length_check() {
        let frame = write_frame(
            commands::REGISTER_SESSION,
            0,
            EncapStatus::Success,
            [0; 8],
            &[0x01, 0x00, 0x00, 0x00],
        );
        assert_eq!(frame.len(), HEADER_LEN + 4);

        let mut r = Reader::new(&frame);
        let header = EncapHeader::parse(&mut r).unwrap();
        assert_eq!(header.command, commands::REGISTER_SESSION);
        assert_eq!(header.length, 4);
        assert_eq!(r.remaining(), 4);
    }

    #[test]
    fn test_header_rejects_overlong_length() {
        let mut frame = write_frame(commands::NOP, 0, EncapStatus::Success, [0; 8], &[]);
        frame[2] = 10; // claims 10 body bytes that are not there
        let mut r = Reader::new(&frame);
        assert_eq!(EncapHeader::parse(&mut r), Err(EncapError::BadLength(10)));
    }

    #[test]
    fn test_cpf_roundtrip() {
        let mut w = Writer::new();
        Cpf::write(
            &mut w,
            &[
                (cpf_item::NULL_ADDRESS, &[]),
                (cpf_item::UNCONNECTED_DATA, &[1, 2, 3]),
            ],
        );
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let cpf = Cpf::parse(&mut r).unwrap();
        assert_eq!(cpf.items.len(), 2);
        assert_eq!(cpf.find(cpf_item::UNCONNECTED_DATA), Some(&[1, 2, 3][..]));
        assert_eq!(cpf.find(cpf_item::CONNECTED_DATA), None);
    }

    #[test]
    fn test_sockaddr_roundtrip_is_big_endian() {
        let addr = SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), ENCAP_PORT);
        let mut w = Writer::new();
        write_sockaddr(&mut w, addr);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[2..4], &[0xAF, 0x12]);
        assert_eq!(&bytes[4..8], &[192, 168, 0, 2]);
        assert_eq!(parse_sockaddr(&bytes), Some(addr));
    }

    #[test]
    fn test_session_register_unregister() {
        let mut sessions = SessionTable::new();
        let handle = sessions.register(7).unwrap();
        assert_ne!(handle, 0);
        assert!(sessions.is_valid(handle));

        // same socket re-registers to the same handle
        assert_eq!(sessions.register(7).unwrap(), handle);
        assert_eq!(sessions.len(), 1);

        assert!(sessions.unregister(handle).is_some());
        assert!(!sessions.is_valid(handle));
    }

    #[test]
    fn test_session_close_for_socket() {
        let mut sessions = SessionTable::new();
        let handle = sessions.register(9).unwrap();
        assert_eq!(sessions.close_for_socket(9).unwrap().handle, handle);
        assert!(sessions.is_empty());
        assert!(sessions.close_for_socket(9).is_none());
    }

    #[test]
    fn test_session_exhaustion() {
        let mut sessions = SessionTable::new();
        for socket in 0..MAX_SESSIONS as u64 {
            sessions.register(socket).unwrap();
        }
        assert_eq!(
            sessions.register(999),
            Err(EncapError::SessionsExhausted)
        );
    }

    #[test]
    fn test_list_identity_body_shape() {
        let device = DeviceConfig::default();
        let network = NetworkConfig::default();
        let body = list_identity_body(&device, &network);

        let mut r = Reader::new(&body);
        let cpf = Cpf::parse(&mut r).unwrap();
        let item = cpf.find(cpf_item::LIST_IDENTITY_RESPONSE).unwrap();

        let mut content = Reader::new(item);
        assert_eq!(content.get_u16().unwrap(), PROTOCOL_VERSION);
        let sockaddr = parse_sockaddr(content.get_bytes(16).unwrap()).unwrap();
        assert_eq!(sockaddr.port(), ENCAP_PORT);
        assert_eq!(content.get_u16().unwrap(), device.vendor_id);
    }

    #[test]
    fn test_list_interfaces_is_empty_list() {
        assert_eq!(list_interfaces_body(), vec![0, 0]);
    }
}
