// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! The adapter stack
//!
//! [`Stack`] owns the object registry, the assembly pool, the encapsulation
//! session table and the connection manager, and exposes the four entry
//! points the platform drives: explicit TCP data, explicit UDP data,
//! connected (implicit) data, and the periodic timer tick. Everything runs
//! on the caller's thread; no entry point blocks.

use std::net::SocketAddrV4;

use tracing::{debug, info};

use crate::assembly::Assemblies;
use crate::codec::{Reader, Writer};
use crate::config::AdapterConfig;
use crate::connection::ConnectionTable;
use crate::connection_manager::ConnectionManager;
use crate::encap::{
    self, commands, cpf_item, Cpf, EncapHeader, SessionTable, TcpHandle,
};
use crate::error::{AssemblyError, EipError, EncapError, EncapStatus, GeneralStatus};
use crate::host::{AdapterApplication, UdpIo};
use crate::message_router::{self, services, MessageRouterRequest, MessageRouterResponse};
use crate::objects::{self, CONNECTION_MANAGER_CLASS};
use crate::registry::ClassRegistry;

/// One EtherNet/IP adapter instance. Lifetime is init → run → shutdown.
#[derive(Debug)]
pub struct Stack {
    config: AdapterConfig,
    registry: ClassRegistry,
    assemblies: Assemblies,
    sessions: SessionTable,
    manager: ConnectionManager,
}

impl Stack {
    /// Initialize the stack: registers the standard classes and sizes the
    /// connection table. Assemblies and connection points are added by the
    /// application afterwards, before traffic arrives.
    pub fn new(config: AdapterConfig) -> Self {
        let mut registry = ClassRegistry::new();
        objects::register_standard_classes(&mut registry, &config.device, &config.network);
        let manager = ConnectionManager::new(config.limits);
        info!(
            ip = %config.network.ip,
            product = %config.device.product_name,
            "stack initialized"
        );
        Self {
            config,
            registry,
            assemblies: Assemblies::new(),
            sessions: SessionTable::new(),
            manager,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ClassRegistry {
        &mut self.registry
    }

    pub fn assemblies(&self) -> &Assemblies {
        &self.assemblies
    }

    pub fn assemblies_mut(&mut self) -> &mut Assemblies {
        &mut self.assemblies
    }

    pub fn connections(&self) -> &ConnectionTable {
        self.manager.table()
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Create an assembly instance whose attribute 3 is `data`.
    pub fn create_assembly(
        &mut self,
        instance_id: u16,
        data: Vec<u8>,
    ) -> Result<(), AssemblyError> {
        self.assemblies
            .create(&mut self.registry, instance_id, data)
    }

    pub fn configure_exclusive_owner_connection_point(
        &mut self,
        output_assembly: u16,
        input_assembly: u16,
        config_assembly: Option<u16>,
    ) -> bool {
        self.manager.points_mut().configure_exclusive_owner(
            output_assembly,
            input_assembly,
            config_assembly,
        )
    }

    pub fn configure_input_only_connection_point(
        &mut self,
        output_assembly: u16,
        input_assembly: u16,
        config_assembly: Option<u16>,
    ) -> bool {
        self.manager.points_mut().configure_input_only(
            output_assembly,
            input_assembly,
            config_assembly,
        )
    }

    pub fn configure_listen_only_connection_point(
        &mut self,
        output_assembly: u16,
        input_assembly: u16,
        config_assembly: Option<u16>,
    ) -> bool {
        self.manager.points_mut().configure_listen_only(
            output_assembly,
            input_assembly,
            config_assembly,
        )
    }

    /// Explicit message received on a TCP connection. Returns the bytes to
    /// send back, or `None` when the command produces no reply.
    pub fn handle_explicit_tcp_data(
        &mut self,
        socket: TcpHandle,
        peer: SocketAddrV4,
        data: &[u8],
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
    ) -> Option<Vec<u8>> {
        let mut reader = Reader::new(data);
        let header = match EncapHeader::parse(&mut reader) {
            Ok(header) => header,
            Err(EncapError::BadLength(_)) => {
                let mut r2 = Reader::new(&data[..encap::HEADER_LEN.min(data.len())]);
                // reparse just the fixed part for the echo
                return partial_header_reply(&mut r2, EncapStatus::InvalidLength);
            }
            Err(_) => return None,
        };
        let body = &reader.rest()[..usize::from(header.length)];

        match header.command {
            commands::NOP => None,
            commands::LIST_SERVICES => Some(reply(&header, encap::list_services_body())),
            commands::LIST_IDENTITY => Some(reply(
                &header,
                encap::list_identity_body(&self.config.device, &self.config.network),
            )),
            commands::LIST_INTERFACES => Some(reply(&header, encap::list_interfaces_body())),
            commands::REGISTER_SESSION => Some(self.register_session(socket, &header, body)),
            commands::UNREGISTER_SESSION => {
                self.sessions.unregister(header.session_handle);
                None
            }
            commands::SEND_RR_DATA => {
                if !self.sessions.is_valid(header.session_handle) {
                    return Some(status_reply(&header, EncapStatus::InvalidSessionHandle));
                }
                self.send_rr_data(&header, body, peer, io, app)
            }
            commands::SEND_UNIT_DATA => {
                if !self.sessions.is_valid(header.session_handle) {
                    return Some(status_reply(&header, EncapStatus::InvalidSessionHandle));
                }
                self.send_unit_data(&header, body, peer, io, app)
            }
            other => {
                debug!(command = other, "unsupported encapsulation command");
                Some(status_reply(&header, EncapStatus::InvalidCommand))
            }
        }
    }

    /// Explicit message received on the UDP explicit port. Session-bound
    /// commands are rejected; discovery and unconnected requests are
    /// served. `is_unicast` distinguishes broadcast discovery but does not
    /// change the reply contents.
    pub fn handle_explicit_udp_data(
        &mut self,
        from: SocketAddrV4,
        data: &[u8],
        _is_unicast: bool,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
    ) -> Option<Vec<u8>> {
        let mut reader = Reader::new(data);
        let header = EncapHeader::parse(&mut reader).ok()?;
        let body = &reader.rest()[..usize::from(header.length)];

        match header.command {
            commands::NOP => None,
            commands::LIST_SERVICES => Some(reply(&header, encap::list_services_body())),
            commands::LIST_IDENTITY => Some(reply(
                &header,
                encap::list_identity_body(&self.config.device, &self.config.network),
            )),
            commands::LIST_INTERFACES => Some(reply(&header, encap::list_interfaces_body())),
            // unconnected messaging over UDP runs sessionless
            commands::SEND_RR_DATA => self.send_rr_data(&header, body, from, io, app),
            _ => Some(status_reply(&header, EncapStatus::InvalidCommand)),
        }
    }

    /// Implicit I/O datagram received on the I/O port.
    pub fn handle_received_connected_data(
        &mut self,
        from: SocketAddrV4,
        data: &[u8],
        app: &mut dyn AdapterApplication,
    ) -> Result<(), EipError> {
        self.manager
            .handle_connected_data(from, data, &mut self.assemblies, app)
    }

    /// The timer tick: application hook, then all connection timers.
    /// Call every `config.tick_us` microseconds.
    pub fn manage_connections(&mut self, io: &mut dyn UdpIo, app: &mut dyn AdapterApplication) {
        app.handle_application(&mut self.assemblies);
        self.manager
            .manage(i64::from(self.config.tick_us), &mut self.assemblies, io, app);
    }

    /// Force production on the connection bound to (output, input) at the
    /// next tick. Call from inside `handle_application`.
    pub fn trigger_connections(&mut self, output_assembly: u16, input_assembly: u16) -> bool {
        self.manager.trigger(output_assembly, input_assembly)
    }

    /// The platform noticed a TCP peer disconnect: drop its session.
    pub fn close_session(&mut self, socket: TcpHandle) {
        self.sessions.close_for_socket(socket);
    }

    /// Close every connection and session.
    pub fn shutdown(&mut self, io: &mut dyn UdpIo, app: &mut dyn AdapterApplication) {
        self.manager.close_all(io, app);
        info!("stack shut down");
    }

    fn register_session(&mut self, socket: TcpHandle, header: &EncapHeader, body: &[u8]) -> Vec<u8> {
        let mut reader = Reader::new(body);
        let version = reader.get_u16().unwrap_or(0);
        let _options = reader.get_u16().unwrap_or(0);

        if version != encap::PROTOCOL_VERSION {
            let mut reply_body = Writer::new();
            reply_body.put_u16(encap::PROTOCOL_VERSION).expect("tiny");
            reply_body.put_u16(0).expect("tiny");
            return encap::write_frame(
                header.command,
                0,
                EncapStatus::UnsupportedProtocolVersion,
                header.sender_context,
                reply_body.as_slice(),
            );
        }

        match self.sessions.register(socket) {
            Ok(handle) => encap::write_frame(
                header.command,
                handle,
                EncapStatus::Success,
                header.sender_context,
                body,
            ),
            Err(_) => status_reply(header, EncapStatus::InsufficientMemory),
        }
    }

    fn send_rr_data(
        &mut self,
        header: &EncapHeader,
        body: &[u8],
        originator: SocketAddrV4,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
    ) -> Option<Vec<u8>> {
        let mut reader = Reader::new(body);
        let _interface_handle = reader.get_u32().ok()?;
        let _timeout = reader.get_u16().ok()?;
        let cpf = match Cpf::parse(&mut reader) {
            Ok(cpf) => cpf,
            Err(_) => return Some(status_reply(header, EncapStatus::IncorrectData)),
        };
        let Some(request_bytes) = cpf.find(cpf_item::UNCONNECTED_DATA) else {
            return Some(status_reply(header, EncapStatus::IncorrectData));
        };
        let t_to_o_sockaddr = cpf
            .find(cpf_item::SOCKADDR_T_TO_O)
            .and_then(encap::parse_sockaddr);

        let mut request_reader = Reader::new(request_bytes);
        let response = match MessageRouterRequest::parse(&mut request_reader) {
            Ok(request) => self.route(&request, originator, t_to_o_sockaddr, io, app),
            Err(_) => {
                // no service echo available; report the path failure bare
                MessageRouterResponse::error(0, GeneralStatus::PathSegmentError)
            }
        };

        let mut encoded = Writer::new();
        if response.encode(&mut encoded).is_err() {
            return Some(status_reply(header, EncapStatus::InvalidLength));
        }

        let mut reply_body = Writer::new();
        reply_body.put_u32(0).expect("bounded reply"); // interface handle
        reply_body.put_u16(0).expect("bounded reply"); // timeout
        Cpf::write(
            &mut reply_body,
            &[
                (cpf_item::NULL_ADDRESS, &[][..]),
                (cpf_item::UNCONNECTED_DATA, encoded.as_slice()),
            ],
        );
        Some(reply(header, reply_body.into_bytes()))
    }

    fn send_unit_data(
        &mut self,
        header: &EncapHeader,
        body: &[u8],
        originator: SocketAddrV4,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
    ) -> Option<Vec<u8>> {
        let mut reader = Reader::new(body);
        let _interface_handle = reader.get_u32().ok()?;
        let _timeout = reader.get_u16().ok()?;
        let cpf = match Cpf::parse(&mut reader) {
            Ok(cpf) => cpf,
            Err(_) => return Some(status_reply(header, EncapStatus::IncorrectData)),
        };
        let (Some(address), Some(data)) = (
            cpf.find(cpf_item::CONNECTED_ADDRESS),
            cpf.find(cpf_item::CONNECTED_DATA),
        ) else {
            return Some(status_reply(header, EncapStatus::IncorrectData));
        };
        if address.len() < 4 || data.len() < 2 {
            return Some(status_reply(header, EncapStatus::IncorrectData));
        }
        let connection_id = u32::from_le_bytes([address[0], address[1], address[2], address[3]]);
        let sequence = u16::from_le_bytes([data[0], data[1]]);

        // only an established class-3 connection may carry this
        let Some(reply_connection_id) = self.manager.touch_explicit(connection_id) else {
            debug!(connection_id, "unit data for unknown connection");
            return Some(status_reply(header, EncapStatus::IncorrectData));
        };

        let mut request_reader = Reader::new(&data[2..]);
        let response = match MessageRouterRequest::parse(&mut request_reader) {
            Ok(request) => self.route(&request, originator, None, io, app),
            Err(_) => MessageRouterResponse::error(0, GeneralStatus::PathSegmentError),
        };

        let mut encoded = Writer::new();
        encoded.put_u16(sequence).expect("bounded reply");
        if response.encode(&mut encoded).is_err() {
            return Some(status_reply(header, EncapStatus::InvalidLength));
        }

        let reply_address = reply_connection_id.to_le_bytes();
        let mut reply_body = Writer::new();
        reply_body.put_u32(0).expect("bounded reply");
        reply_body.put_u16(0).expect("bounded reply");
        Cpf::write(
            &mut reply_body,
            &[
                (cpf_item::CONNECTED_ADDRESS, &reply_address[..]),
                (cpf_item::CONNECTED_DATA, encoded.as_slice()),
            ],
        );
        Some(reply(header, reply_body.into_bytes()))
    }

    /// Route one Message Router request: Connection Manager state services
    /// go to the manager, everything else to the generic dispatcher.
    fn route(
        &mut self,
        request: &MessageRouterRequest,
        originator: SocketAddrV4,
        t_to_o_sockaddr: Option<SocketAddrV4>,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
    ) -> MessageRouterResponse {
        let is_conn_mgr_service = request.path.class == CONNECTION_MANAGER_CLASS
            && matches!(
                request.service,
                services::FORWARD_OPEN
                    | services::LARGE_FORWARD_OPEN
                    | services::FORWARD_CLOSE
                    | services::GET_CONNECTION_OWNER
            );
        if is_conn_mgr_service {
            self.manager.dispatch(
                &self.config.device,
                &self.config.network,
                &mut self.assemblies,
                io,
                app,
                request,
                originator,
                t_to_o_sockaddr,
            )
        } else {
            message_router::dispatch(&mut self.registry, &mut self.assemblies, app, request)
        }
    }
}

fn reply(header: &EncapHeader, body: Vec<u8>) -> Vec<u8> {
    encap::write_frame(
        header.command,
        header.session_handle,
        EncapStatus::Success,
        header.sender_context,
        &body,
    )
}

fn status_reply(header: &EncapHeader, status: EncapStatus) -> Vec<u8> {
    encap::write_frame(
        header.command,
        header.session_handle,
        status,
        header.sender_context,
        &[],
    )
}

/// Best-effort echo for frames whose length field is inconsistent: reparse
/// only the fixed header fields.
fn partial_header_reply(reader: &mut Reader, status: EncapStatus) -> Option<Vec<u8>> {
    let command = reader.get_u16().ok()?;
    let _length = reader.get_u16().ok()?;
    let session_handle = reader.get_u32().ok()?;
    let _status = reader.get_u32().ok()?;
    let mut sender_context = [0u8; 8];
    sender_context.copy_from_slice(reader.get_bytes(8).ok()?);
    Some(encap::write_frame(
        command,
        session_handle,
        status,
        sender_context,
        &[],
    ))
}
