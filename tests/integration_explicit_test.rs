// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Integration tests for the encapsulation layer and explicit messaging:
//! session registration, discovery commands and Message Router requests
//! driven through the TCP entry point.

use std::net::{Ipv4Addr, SocketAddrV4};

use eipa::codec::{Reader, Writer};
use eipa::config::AdapterConfig;
use eipa::encap::{self, commands, cpf_item, Cpf, EncapHeader};
use eipa::error::{EipError, EncapStatus, GeneralStatus};
use eipa::host::{NullApplication, SocketHandle, UdpDirection, UdpIo};
use eipa::stack::Stack;

const PEER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 10), 50000);

#[derive(Default)]
struct MockIo;

impl UdpIo for MockIo {
    fn create_udp_socket(
        &mut self,
        _direction: UdpDirection,
        _addr: SocketAddrV4,
    ) -> Result<SocketHandle, EipError> {
        Ok(SocketHandle(1))
    }

    fn send_udp(
        &mut self,
        _socket: SocketHandle,
        _to: SocketAddrV4,
        _data: &[u8],
    ) -> Result<(), EipError> {
        Ok(())
    }

    fn close_udp_socket(&mut self, _socket: SocketHandle) {}
}

fn new_stack() -> Stack {
    Stack::new(AdapterConfig::default())
}

/// A decoded Message Router reply pulled out of a SendRRData response.
struct MrReply {
    service: u8,
    status: u8,
    extended: Vec<u16>,
    data: Vec<u8>,
}

fn parse_rr_reply(frame: &[u8]) -> MrReply {
    let mut reader = Reader::new(frame);
    let header = EncapHeader::parse(&mut reader).unwrap();
    assert_eq!(header.command, commands::SEND_RR_DATA);
    assert_eq!(header.status, 0);

    reader.get_u32().unwrap(); // interface handle
    reader.get_u16().unwrap(); // timeout
    let cpf = Cpf::parse(&mut reader).unwrap();
    let response = cpf.find(cpf_item::UNCONNECTED_DATA).unwrap();

    let mut r = Reader::new(response);
    let service = r.get_u8().unwrap();
    r.get_u8().unwrap(); // reserved
    let status = r.get_u8().unwrap();
    let extended_count = r.get_u8().unwrap();
    let mut extended = Vec::new();
    for _ in 0..extended_count {
        extended.push(r.get_u16().unwrap());
    }
    MrReply {
        service,
        status,
        extended,
        data: r.rest().to_vec(),
    }
}

fn send_rr_frame(session: u32, mr_request: &[u8]) -> Vec<u8> {
    let mut body = Writer::new();
    body.put_u32(0).unwrap();
    body.put_u16(0).unwrap();
    Cpf::write(
        &mut body,
        &[
            (cpf_item::NULL_ADDRESS, &[][..]),
            (cpf_item::UNCONNECTED_DATA, mr_request),
        ],
    );
    encap::write_frame(
        commands::SEND_RR_DATA,
        session,
        EncapStatus::Success,
        [0; 8],
        body.as_slice(),
    )
}

fn register_session(stack: &mut Stack, io: &mut MockIo, app: &mut NullApplication) -> u32 {
    let frame = encap::write_frame(
        commands::REGISTER_SESSION,
        0,
        EncapStatus::Success,
        [0; 8],
        &[0x01, 0x00, 0x00, 0x00],
    );
    let reply = stack
        .handle_explicit_tcp_data(1, PEER, &frame, io, app)
        .unwrap();
    let mut reader = Reader::new(&reply);
    let header = EncapHeader::parse(&mut reader).unwrap();
    assert_eq!(header.status, 0);
    header.session_handle
}

#[test]
fn test_register_session_echoes_body_with_fresh_handle() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;

    // 24-byte header, protocol version 1, option flags 0
    let frame = encap::write_frame(
        commands::REGISTER_SESSION,
        0,
        EncapStatus::Success,
        [0; 8],
        &[0x01, 0x00, 0x00, 0x00],
    );
    let reply = stack
        .handle_explicit_tcp_data(1, PEER, &frame, &mut io, &mut app)
        .unwrap();

    let mut reader = Reader::new(&reply);
    let header = EncapHeader::parse(&mut reader).unwrap();
    assert_eq!(header.command, commands::REGISTER_SESSION);
    assert_eq!(header.length, 4);
    assert_ne!(header.session_handle, 0);
    assert_eq!(header.status, 0);
    assert_eq!(reader.rest(), &[0x01, 0x00, 0x00, 0x00]);
    assert_eq!(stack.sessions().len(), 1);
}

#[test]
fn test_register_session_rejects_unknown_protocol_version() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;

    let frame = encap::write_frame(
        commands::REGISTER_SESSION,
        0,
        EncapStatus::Success,
        [0; 8],
        &[0x02, 0x00, 0x00, 0x00],
    );
    let reply = stack
        .handle_explicit_tcp_data(1, PEER, &frame, &mut io, &mut app)
        .unwrap();

    let mut reader = Reader::new(&reply);
    let header = EncapHeader::parse(&mut reader).unwrap();
    assert_eq!(
        header.status,
        EncapStatus::UnsupportedProtocolVersion.as_u32()
    );
    assert_eq!(header.session_handle, 0);
    assert!(stack.sessions().is_empty());
}

#[test]
fn test_unregister_session_frees_handle_silently() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;
    let session = register_session(&mut stack, &mut io, &mut app);

    let frame = encap::write_frame(
        commands::UNREGISTER_SESSION,
        session,
        EncapStatus::Success,
        [0; 8],
        &[],
    );
    let reply = stack.handle_explicit_tcp_data(1, PEER, &frame, &mut io, &mut app);
    assert!(reply.is_none());
    assert!(stack.sessions().is_empty());
}

#[test]
fn test_send_rr_data_without_session_is_rejected() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;

    // service 0x0E on identity, inside a SendRRData with a bogus session
    let request = [0x0E, 0x02, 0x20, 0x01, 0x24, 0x01];
    let frame = send_rr_frame(0xDEAD, &request);
    let reply = stack
        .handle_explicit_tcp_data(1, PEER, &frame, &mut io, &mut app)
        .unwrap();

    let mut reader = Reader::new(&reply);
    let header = EncapHeader::parse(&mut reader).unwrap();
    assert_eq!(header.status, EncapStatus::InvalidSessionHandle.as_u32());
}

#[test]
fn test_get_attribute_single_over_rr_data() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;
    let session = register_session(&mut stack, &mut io, &mut app);

    // identity instance 1, attribute 1 (vendor id)
    let request = [0x0E, 0x03, 0x20, 0x01, 0x24, 0x01, 0x30, 0x01];
    let frame = send_rr_frame(session, &request);
    let reply = stack
        .handle_explicit_tcp_data(1, PEER, &frame, &mut io, &mut app)
        .unwrap();

    let mr = parse_rr_reply(&reply);
    assert_eq!(mr.service, 0x8E);
    assert_eq!(mr.status, 0);
    assert!(mr.extended.is_empty());
    assert_eq!(mr.data, 357u16.to_le_bytes().to_vec());
}

#[test]
fn test_get_attribute_on_missing_instance_returns_path_destination_unknown() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;
    let session = register_session(&mut stack, &mut io, &mut app);

    // identity instance 5 does not exist
    let request = [0x0E, 0x03, 0x20, 0x01, 0x24, 0x05, 0x30, 0x01];
    let frame = send_rr_frame(session, &request);
    let reply = stack
        .handle_explicit_tcp_data(1, PEER, &frame, &mut io, &mut app)
        .unwrap();

    let mr = parse_rr_reply(&reply);
    assert_eq!(mr.status, GeneralStatus::PathDestinationUnknown.as_u8());
}

#[test]
fn test_list_identity_reports_device() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;

    let frame = encap::write_frame(
        commands::LIST_IDENTITY,
        0,
        EncapStatus::Success,
        [0xAB; 8],
        &[],
    );
    let reply = stack
        .handle_explicit_tcp_data(1, PEER, &frame, &mut io, &mut app)
        .unwrap();

    let mut reader = Reader::new(&reply);
    let header = EncapHeader::parse(&mut reader).unwrap();
    assert_eq!(header.command, commands::LIST_IDENTITY);
    assert_eq!(header.sender_context, [0xAB; 8]);

    let cpf = Cpf::parse(&mut reader).unwrap();
    let item = cpf.find(cpf_item::LIST_IDENTITY_RESPONSE).unwrap();
    let mut content = Reader::new(item);
    assert_eq!(content.get_u16().unwrap(), 1); // protocol version
    content.get_bytes(16).unwrap(); // sockaddr
    assert_eq!(content.get_u16().unwrap(), 357); // vendor id
}

#[test]
fn test_list_services_announces_udp_io_capability() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;

    let frame = encap::write_frame(commands::LIST_SERVICES, 0, EncapStatus::Success, [0; 8], &[]);
    let reply = stack
        .handle_explicit_udp_data(PEER, &frame, true, &mut io, &mut app)
        .unwrap();

    let mut reader = Reader::new(&reply);
    EncapHeader::parse(&mut reader).unwrap();
    let cpf = Cpf::parse(&mut reader).unwrap();
    let item = cpf.find(cpf_item::LIST_SERVICES_RESPONSE).unwrap();
    let mut content = Reader::new(item);
    assert_eq!(content.get_u16().unwrap(), 1);
    assert_eq!(content.get_u16().unwrap(), 0x0120);
}

#[test]
fn test_nop_and_unknown_commands() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;

    let nop = encap::write_frame(commands::NOP, 0, EncapStatus::Success, [0; 8], &[]);
    assert!(stack
        .handle_explicit_tcp_data(1, PEER, &nop, &mut io, &mut app)
        .is_none());

    let bogus = encap::write_frame(0x0042, 0, EncapStatus::Success, [0; 8], &[]);
    let reply = stack
        .handle_explicit_tcp_data(1, PEER, &bogus, &mut io, &mut app)
        .unwrap();
    let mut reader = Reader::new(&reply);
    let header = EncapHeader::parse(&mut reader).unwrap();
    assert_eq!(header.status, EncapStatus::InvalidCommand.as_u32());
}

#[test]
fn test_session_survives_per_socket_and_dies_with_it() {
    let mut stack = new_stack();
    let mut io = MockIo;
    let mut app = NullApplication;
    let session = register_session(&mut stack, &mut io, &mut app);
    assert!(stack.sessions().is_valid(session));

    // the platform reports the TCP peer went away
    stack.close_session(1);
    assert!(!stack.sessions().is_valid(session));
}
