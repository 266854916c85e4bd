// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Connection Manager (class 0x06)
//!
//! Forward-Open, Large-Forward-Open and Forward-Close against the
//! connection-point configuration, the connection slot table, multicast
//! producer election, and the periodic timer sweep that drives production
//! and watchdog expiry.

use std::net::SocketAddrV4;

use tracing::{debug, info, warn};

use crate::assembly::Assemblies;
use crate::codec::{Reader, Writer};
use crate::config::{ConnectionLimits, DeviceConfig, NetworkConfig};
use crate::conn_point::{ConnPoints, IoPathRequest};
use crate::connection::{
    self, CipConn, ConnInstanceType, ConnState, ConnectionTable, ConnectionTriad, IoConnType,
    NetConnParams, IO_UDP_PORT,
};
use crate::epath::{parse_connection_path, AppPath, ConnectionPath, ElectronicKey};
use crate::error::{CodecError, ConnMgrStatus, EipError, GeneralStatus};
use crate::host::{AdapterApplication, IoConnectionEvent, UdpDirection, UdpIo};
use crate::message_router::{services, MessageRouterRequest, MessageRouterResponse};

/// Transport class bits of the transport class/trigger byte.
const TRANSPORT_CLASS_MASK: u8 = 0x0F;
const TRANSPORT_CLASS_1: u8 = 1;
const TRANSPORT_CLASS_3: u8 = 3;

/// Bytes of connected-frame overhead in the O→T direction for a data
/// assembly: 16-bit sequence count plus the 32-bit run/idle header.
const O_TO_T_DATA_OVERHEAD: u16 = 6;
/// A heartbeat carries the sequence count only.
const HEARTBEAT_OVERHEAD: u16 = 2;
/// T→O frames carry the sequence count only.
const T_TO_O_OVERHEAD: u16 = 2;

/// A decoded Forward-Open request.
#[derive(Debug, Clone)]
pub struct ForwardOpenRequest {
    pub priority_time_tick: u8,
    pub timeout_ticks: u8,
    pub o_to_t_connection_id: u32,
    pub t_to_o_connection_id: u32,
    pub triad: ConnectionTriad,
    pub timeout_multiplier: u8,
    pub o_to_t_rpi_us: u32,
    pub o_to_t_ncp: NetConnParams,
    pub t_to_o_rpi_us: u32,
    pub t_to_o_ncp: NetConnParams,
    pub transport_class_trigger: u8,
    pub path: ConnectionPath,
}

impl ForwardOpenRequest {
    /// Parse the request body; `large` selects the 32-bit network
    /// connection parameter form.
    pub fn parse(input: &mut Reader, large: bool) -> Result<Self, CodecError> {
        let priority_time_tick = input.get_u8()?;
        let timeout_ticks = input.get_u8()?;
        let o_to_t_connection_id = input.get_u32()?;
        let t_to_o_connection_id = input.get_u32()?;
        let connection_serial = input.get_u16()?;
        let originator_vendor_id = input.get_u16()?;
        let originator_serial = input.get_u32()?;
        let timeout_multiplier = input.get_u8()?;
        input.skip(3)?; // reserved
        let o_to_t_rpi_us = input.get_u32()?;
        let o_to_t_ncp = if large {
            NetConnParams::from_dword(input.get_u32()?)
        } else {
            NetConnParams::from_word(input.get_u16()?)
        };
        let t_to_o_rpi_us = input.get_u32()?;
        let t_to_o_ncp = if large {
            NetConnParams::from_dword(input.get_u32()?)
        } else {
            NetConnParams::from_word(input.get_u16()?)
        };
        let transport_class_trigger = input.get_u8()?;
        let path_words = input.get_u8()?;
        let path = parse_connection_path(input, usize::from(path_words) * 2)?;

        Ok(Self {
            priority_time_tick,
            timeout_ticks,
            o_to_t_connection_id,
            t_to_o_connection_id,
            triad: ConnectionTriad {
                connection_serial,
                originator_vendor_id,
                originator_serial,
            },
            timeout_multiplier,
            o_to_t_rpi_us,
            o_to_t_ncp,
            t_to_o_rpi_us,
            t_to_o_ncp,
            transport_class_trigger,
            path,
        })
    }

    fn transport_class(&self) -> u8 {
        self.transport_class_trigger & TRANSPORT_CLASS_MASK
    }
}

/// A decoded Forward-Close request.
#[derive(Debug, Clone)]
pub struct ForwardCloseRequest {
    pub triad: ConnectionTriad,
}

impl ForwardCloseRequest {
    pub fn parse(input: &mut Reader) -> Result<Self, CodecError> {
        input.skip(2)?; // priority/time-tick, timeout ticks
        let connection_serial = input.get_u16()?;
        let originator_vendor_id = input.get_u16()?;
        let originator_serial = input.get_u32()?;
        // connection path, reference only
        let path_words = input.get_u8()?;
        input.skip(1)?; // reserved
        input.skip(usize::from(path_words) * 2)?;
        Ok(Self {
            triad: ConnectionTriad {
                connection_serial,
                originator_vendor_id,
                originator_serial,
            },
        })
    }
}

/// The Connection Manager: configuration tables plus the live connection
/// slot table.
#[derive(Debug)]
pub struct ConnectionManager {
    points: ConnPoints,
    table: ConnectionTable,
}

impl ConnectionManager {
    pub fn new(limits: ConnectionLimits) -> Self {
        Self {
            points: ConnPoints::new(limits),
            table: ConnectionTable::with_capacity(limits.total_slots()),
        }
    }

    pub fn points_mut(&mut self) -> &mut ConnPoints {
        &mut self.points
    }

    pub fn table(&self) -> &ConnectionTable {
        &self.table
    }

    /// Dispatch one Connection Manager service.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        device: &DeviceConfig,
        network: &NetworkConfig,
        assemblies: &mut Assemblies,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
        request: &MessageRouterRequest,
        originator: SocketAddrV4,
        t_to_o_sockaddr: Option<SocketAddrV4>,
    ) -> MessageRouterResponse {
        match request.service {
            services::FORWARD_OPEN | services::LARGE_FORWARD_OPEN => self.forward_open(
                device,
                network,
                assemblies,
                io,
                app,
                request,
                originator,
                t_to_o_sockaddr,
            ),
            services::FORWARD_CLOSE => self.forward_close(io, app, request),
            services::GET_CONNECTION_OWNER => {
                MessageRouterResponse::error(request.service, GeneralStatus::ServiceNotSupported)
            }
            _ => MessageRouterResponse::error(request.service, GeneralStatus::ServiceNotSupported),
        }
    }

    /// Forward-Open / Large-Forward-Open.
    #[allow(clippy::too_many_arguments)]
    pub fn forward_open(
        &mut self,
        device: &DeviceConfig,
        network: &NetworkConfig,
        assemblies: &mut Assemblies,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
        request: &MessageRouterRequest,
        originator: SocketAddrV4,
        t_to_o_sockaddr: Option<SocketAddrV4>,
    ) -> MessageRouterResponse {
        let large = request.service == services::LARGE_FORWARD_OPEN;
        let mut reader = Reader::new(request.data);
        let open = match ForwardOpenRequest::parse(&mut reader, large) {
            Ok(open) => open,
            Err(_) => {
                return MessageRouterResponse::error(request.service, GeneralStatus::NotEnoughData)
            }
        };

        match self.try_open(
            device, network, assemblies, io, app, &open, originator, t_to_o_sockaddr,
        ) {
            Ok(reply) => reply_success(request.service, &open, reply),
            Err(rejection) => {
                debug!(
                    serial = open.triad.connection_serial,
                    status = ?rejection,
                    "forward open rejected"
                );
                match rejection {
                    OpenRejection::Extended(status) => {
                        reply_open_error(request.service, &open, status)
                    }
                    OpenRejection::General(status) => {
                        let mut response = MessageRouterResponse::error(request.service, status);
                        response.data = error_body(&open.triad);
                        response
                    }
                }
            }
        }
    }

    /// The validation pipeline. Any failure backs out without touching the
    /// connection table.
    #[allow(clippy::too_many_arguments)]
    fn try_open(
        &mut self,
        device: &DeviceConfig,
        network: &NetworkConfig,
        assemblies: &mut Assemblies,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
        open: &ForwardOpenRequest,
        originator: SocketAddrV4,
        t_to_o_sockaddr: Option<SocketAddrV4>,
    ) -> Result<OpenedIds, OpenRejection> {
        if let Some(key) = &open.path.key {
            check_electronic_key(key, device).map_err(OpenRejection::Extended)?;
        }
        if open.o_to_t_rpi_us == 0 || open.t_to_o_rpi_us == 0 {
            return Err(OpenRejection::Extended(ConnMgrStatus::RpiNotSupported));
        }
        if open.o_to_t_ncp.conn_type == IoConnType::Reserved {
            return Err(OpenRejection::Extended(
                ConnMgrStatus::InvalidOToTConnectionType,
            ));
        }
        if open.t_to_o_ncp.conn_type == IoConnType::Reserved {
            return Err(OpenRejection::Extended(
                ConnMgrStatus::InvalidTToOConnectionType,
            ));
        }

        match open.transport_class() {
            TRANSPORT_CLASS_3 => self.open_explicit(open, originator),
            TRANSPORT_CLASS_1 => self.open_io(
                device, network, assemblies, io, app, open, originator, t_to_o_sockaddr,
            ),
            _ => Err(OpenRejection::Extended(
                ConnMgrStatus::InconsistentApplicationPathCombo,
            )),
        }
    }

    /// Class-3 explicit connection: no sockets, watchdog only.
    fn open_explicit(
        &mut self,
        open: &ForwardOpenRequest,
        originator: SocketAddrV4,
    ) -> Result<OpenedIds, OpenRejection> {
        let mut conn = new_conn(open, originator, ConnInstanceType::ExplicitMessaging);
        conn.consuming_point = 0;
        conn.producing_point = 0;
        conn.config_point = None;
        conn.state = ConnState::Established;
        conn.arm();

        let ids = OpenedIds {
            o_to_t_connection_id: conn.consumed_connection_id,
            t_to_o_connection_id: conn.produced_connection_id,
        };
        self.table
            .insert(conn)
            .map_err(|_| OpenRejection::Extended(ConnMgrStatus::OutOfConnections))?;
        info!(
            serial = open.triad.connection_serial,
            "class-3 explicit connection established"
        );
        Ok(ids)
    }

    /// Class-1 I/O connection: path binding, arbitration, size checks,
    /// config apply, socket setup.
    #[allow(clippy::too_many_arguments)]
    fn open_io(
        &mut self,
        _device: &DeviceConfig,
        network: &NetworkConfig,
        assemblies: &mut Assemblies,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
        open: &ForwardOpenRequest,
        originator: SocketAddrV4,
        t_to_o_sockaddr: Option<SocketAddrV4>,
    ) -> Result<OpenedIds, OpenRejection> {
        let (config_path, consuming_path, producing_path) = split_app_paths(&open.path.app_paths)
            .ok_or(OpenRejection::Extended(
            ConnMgrStatus::InconsistentApplicationPathCombo,
        ))?;

        let consuming_point = consuming_path.instance_or_conn_point().ok_or(
            OpenRejection::Extended(ConnMgrStatus::InvalidConsumingApplicationPath),
        )?;
        let producing_point = producing_path.instance_or_conn_point().ok_or(
            OpenRejection::Extended(ConnMgrStatus::InvalidProducingApplicationPath),
        )?;
        let config_point = match config_path {
            Some(path) => Some(path.instance_or_conn_point().ok_or(OpenRejection::Extended(
                ConnMgrStatus::InvalidConfigApplicationPath,
            ))?),
            None => None,
        };

        // arbitration against the registered triples
        let selection = self
            .points
            .select(
                &self.table,
                &IoPathRequest {
                    consuming_point,
                    producing_point,
                    config_point,
                    t_to_o_multicast: open.t_to_o_ncp.conn_type == IoConnType::Multicast,
                },
            )
            .map_err(OpenRejection::Extended)?;

        // application points must exist and sizes must line up with the
        // assembly lengths plus the fixed per-frame overhead
        let consuming_len = assemblies.len_of(consuming_point).map_err(|_| {
            OpenRejection::Extended(ConnMgrStatus::InvalidConsumingApplicationPath)
        })? as u16;
        let producing_len = assemblies.len_of(producing_point).map_err(|_| {
            OpenRejection::Extended(ConnMgrStatus::InvalidProducingApplicationPath)
        })? as u16;

        let expected_o_to_t = if consuming_len == 0 {
            HEARTBEAT_OVERHEAD
        } else {
            consuming_len + O_TO_T_DATA_OVERHEAD
        };
        if open.o_to_t_ncp.conn_type != IoConnType::Null && open.o_to_t_ncp.size != expected_o_to_t
        {
            return Err(OpenRejection::Extended(
                ConnMgrStatus::InvalidOToTConnectionSize,
            ));
        }
        let expected_t_to_o = producing_len + T_TO_O_OVERHEAD;
        if open.t_to_o_ncp.conn_type != IoConnType::Null && open.t_to_o_ncp.size != expected_t_to_o
        {
            return Err(OpenRejection::Extended(
                ConnMgrStatus::InvalidTToOConnectionSize,
            ));
        }

        // configuration data appended to the connection path
        if let Some(config_point) = config_point {
            if !open.path.config_data.is_empty() {
                apply_config_data(assemblies, app, config_point, &open.path.config_data)
                    .map_err(OpenRejection::General)?;
            }
        }

        // a free slot must exist before any socket is created
        if self.table.active_count() >= self.table.capacity() {
            return Err(OpenRejection::Extended(ConnMgrStatus::OutOfConnections));
        }

        let mut conn = new_conn(open, originator, selection.instance_type);
        conn.consuming_point = consuming_point;
        conn.producing_point = producing_point;
        conn.config_point = config_point;
        conn.has_run_idle_header = conn.consumes() && consuming_len > 0;

        self.bind_sockets(network, io, &mut conn, t_to_o_sockaddr)?;

        conn.state = ConnState::Established;
        conn.arm();
        let ids = OpenedIds {
            o_to_t_connection_id: conn.consumed_connection_id,
            t_to_o_connection_id: conn.produced_connection_id,
        };

        let instance_type = conn.instance_type;
        if let Err(e) = self.table.insert(conn) {
            warn!(error = %e, "connection table full after validation");
            return Err(OpenRejection::Extended(ConnMgrStatus::OutOfConnections));
        }
        info!(
            %instance_type,
            output = consuming_point,
            input = producing_point,
            o_to_t_rpi_us = open.o_to_t_rpi_us,
            t_to_o_rpi_us = open.t_to_o_rpi_us,
            "i/o connection established"
        );
        app.check_io_connection_event(consuming_point, producing_point, IoConnectionEvent::Opened);
        Ok(ids)
    }

    /// Create the UDP endpoints for each non-null direction. The multicast
    /// coordinator rules live here: the first multicast producer for an
    /// input assembly owns the socket, later ones attach to it.
    fn bind_sockets(
        &mut self,
        network: &NetworkConfig,
        io: &mut dyn UdpIo,
        conn: &mut CipConn,
        t_to_o_sockaddr: Option<SocketAddrV4>,
    ) -> Result<(), OpenRejection> {
        if conn.consumes() {
            let local = SocketAddrV4::new(network.ip, IO_UDP_PORT);
            let socket = io
                .create_udp_socket(UdpDirection::Consuming, local)
                .map_err(|e| {
                    warn!(error = %e, "consuming socket creation failed");
                    OpenRejection::Extended(ConnMgrStatus::OutOfConnections)
                })?;
            conn.consuming_socket = Some(socket);
        }

        match conn.t_to_o.conn_type {
            IoConnType::Null => {}
            IoConnType::Multicast => {
                conn.produce_to = SocketAddrV4::new(network.multicast_address(), IO_UDP_PORT);
                if self
                    .table
                    .multicast_producer_master(conn.producing_point)
                    .is_some()
                {
                    // attach to the master's socket
                    conn.producing_socket = None;
                } else {
                    match io.create_udp_socket(UdpDirection::Producing, conn.produce_to) {
                        Ok(socket) => conn.producing_socket = Some(socket),
                        Err(e) => {
                            warn!(error = %e, "producing socket creation failed");
                            release_sockets(io, conn);
                            return Err(OpenRejection::Extended(ConnMgrStatus::OutOfConnections));
                        }
                    }
                }
            }
            IoConnType::PointToPoint => {
                conn.produce_to = t_to_o_sockaddr
                    .unwrap_or_else(|| SocketAddrV4::new(*conn.originator.ip(), IO_UDP_PORT));
                match io.create_udp_socket(UdpDirection::Producing, conn.produce_to) {
                    Ok(socket) => conn.producing_socket = Some(socket),
                    Err(e) => {
                        warn!(error = %e, "producing socket creation failed");
                        release_sockets(io, conn);
                        return Err(OpenRejection::Extended(ConnMgrStatus::OutOfConnections));
                    }
                }
            }
            IoConnType::Reserved => unreachable!("rejected during validation"),
        }
        Ok(())
    }

    /// Forward-Close: triad lookup, socket release (with producer
    /// promotion), unlink.
    pub fn forward_close(
        &mut self,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
        request: &MessageRouterRequest,
    ) -> MessageRouterResponse {
        let mut reader = Reader::new(request.data);
        let close = match ForwardCloseRequest::parse(&mut reader) {
            Ok(close) => close,
            Err(_) => {
                return MessageRouterResponse::error(request.service, GeneralStatus::NotEnoughData)
            }
        };

        match self.table.find_by_triad(&close.triad) {
            Some(index) => {
                self.close_connection(index, io, app, Some(IoConnectionEvent::Closed));
                let mut response = MessageRouterResponse::ok(request.service, Vec::new());
                response.data = close_body(&close.triad);
                response
            }
            None => {
                debug!(
                    serial = close.triad.connection_serial,
                    "forward close for unknown connection"
                );
                let mut response =
                    MessageRouterResponse::error(request.service, GeneralStatus::ConnectionFailure);
                response.extended_status = vec![ConnMgrStatus::ConnectionNotFoundAtTarget.as_u16()];
                response.data = error_body(&close.triad);
                response
            }
        }
    }

    /// Tear a connection down: release or transfer sockets, notify the
    /// application, free the slot.
    pub fn close_connection(
        &mut self,
        index: usize,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
        event: Option<IoConnectionEvent>,
    ) {
        let Some(mut conn) = self.table.remove(index) else {
            return;
        };
        conn.state = ConnState::Closing;

        if let Some(socket) = conn.consuming_socket.take() {
            io.close_udp_socket(socket);
        }
        if let Some(socket) = conn.producing_socket.take() {
            if conn.is_multicast_producer() {
                // transfer socket ownership to the first attached peer
                if let Some(peer_index) = self.table.next_non_master_peer(conn.producing_point) {
                    let peer = self.table.get_mut(peer_index).expect("index from lookup");
                    peer.producing_socket = Some(socket);
                    info!(
                        input = conn.producing_point,
                        "multicast producer ownership transferred"
                    );
                } else {
                    io.close_udp_socket(socket);
                    // no producer left: listen-only peers lose their flow
                    self.close_listen_only_for_input(conn.producing_point, io, app);
                }
            } else {
                io.close_udp_socket(socket);
            }
        }

        if conn.is_io() {
            if let Some(event) = event {
                app.check_io_connection_event(conn.consuming_point, conn.producing_point, event);
            }
        }
        conn.state = ConnState::NonExistent;
        debug!(serial = conn.triad.connection_serial, "connection closed");
    }

    /// Close every listen-only connection receiving `producing_point`.
    fn close_listen_only_for_input(
        &mut self,
        producing_point: u16,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
    ) {
        let doomed: Vec<usize> = self
            .table
            .iter()
            .filter(|(_, c)| {
                c.instance_type == ConnInstanceType::IoListenOnly
                    && c.producing_point == producing_point
            })
            .map(|(index, _)| index)
            .collect();
        for index in doomed {
            self.close_connection(index, io, app, Some(IoConnectionEvent::Closed));
        }
    }

    /// Close every live connection (stack shutdown).
    pub fn close_all(&mut self, io: &mut dyn UdpIo, app: &mut dyn AdapterApplication) {
        for index in 0..self.table.capacity() {
            if self.table.get(index).is_some() {
                self.close_connection(index, io, app, Some(IoConnectionEvent::Closed));
            }
        }
    }

    /// One timer tick: advance all transmission triggers first, then all
    /// watchdogs, so a consume earlier in this tick always preempts its own
    /// timeout.
    pub fn manage(
        &mut self,
        tick_us: i64,
        assemblies: &mut Assemblies,
        io: &mut dyn UdpIo,
        app: &mut dyn AdapterApplication,
    ) {
        for index in 0..self.table.capacity() {
            let Some(conn) = self.table.get_mut(index) else {
                continue;
            };
            if conn.state != ConnState::Established {
                continue;
            }
            conn.trigger_timer_us -= tick_us;
            if conn.trigger_timer_us <= 0 {
                if conn.produces() {
                    let _ = connection::produce(conn, assemblies, io, app);
                }
                conn.trigger_timer_us = i64::from(conn.t_to_o_api_us);
            }
        }

        for index in 0..self.table.capacity() {
            let Some(conn) = self.table.get_mut(index) else {
                continue;
            };
            if conn.state != ConnState::Established {
                continue;
            }
            conn.watchdog_timer_us -= tick_us;
            if conn.watchdog_timer_us <= 0 {
                conn.state = ConnState::TimedOut;
                warn!(
                    serial = conn.triad.connection_serial,
                    instance_type = %conn.instance_type,
                    "connection watchdog expired"
                );
                let notify = if conn.is_io() {
                    Some(IoConnectionEvent::TimedOut)
                } else {
                    None
                };
                // report once; close without a second event
                if let Some(event) = notify {
                    let (output, input) = (conn.consuming_point, conn.producing_point);
                    app.check_io_connection_event(output, input, event);
                }
                self.close_connection(index, io, app, None);
            }
        }
    }

    /// Route a received implicit frame to its connection.
    pub fn handle_connected_data(
        &mut self,
        from: SocketAddrV4,
        data: &[u8],
        assemblies: &mut Assemblies,
        app: &mut dyn AdapterApplication,
    ) -> Result<(), EipError> {
        let frame = connection::parse_connected_frame(data)?;
        let index = self
            .table
            .find_by_consumed_id(frame.connection_id)
            .ok_or(crate::error::ConnectionError::UnknownConnectionId(
                frame.connection_id,
            ))?;
        let conn = self.table.get_mut(index).expect("index from lookup");

        if conn.originator.ip() != from.ip() {
            warn!(
                connection_id = frame.connection_id,
                from = %from,
                "connected frame from foreign address dropped"
            );
            return Err(crate::error::ConnectionError::OriginatorMismatch.into());
        }

        if let Err(status) = connection::consume(conn, assemblies, app, &frame) {
            debug!(connection_id = frame.connection_id, status = ?status, "consume failed");
        }
        Ok(())
    }

    /// Reset the explicit-messaging watchdog for a Class-3 connection and
    /// return its producing connection id for the reply address item.
    pub fn touch_explicit(&mut self, consumed_connection_id: u32) -> Option<u32> {
        let index = self.table.find_by_consumed_id(consumed_connection_id)?;
        let conn = self.table.get_mut(index)?;
        if conn.instance_type != ConnInstanceType::ExplicitMessaging {
            return None;
        }
        conn.reset_watchdog();
        Some(conn.produced_connection_id)
    }

    /// Application-triggered production: force the matching connection's
    /// trigger to fire on the next tick.
    pub fn trigger(&mut self, output_assembly: u16, input_assembly: u16) -> bool {
        for index in 0..self.table.capacity() {
            let Some(conn) = self.table.get_mut(index) else {
                continue;
            };
            if conn.state == ConnState::Established
                && conn.consuming_point == output_assembly
                && conn.producing_point == input_assembly
            {
                conn.trigger_timer_us = 0;
                return true;
            }
        }
        false
    }
}

fn release_sockets(io: &mut dyn UdpIo, conn: &mut CipConn) {
    if let Some(socket) = conn.consuming_socket.take() {
        io.close_udp_socket(socket);
    }
    if let Some(socket) = conn.producing_socket.take() {
        io.close_udp_socket(socket);
    }
}

struct OpenedIds {
    o_to_t_connection_id: u32,
    t_to_o_connection_id: u32,
}

#[derive(Debug)]
enum OpenRejection {
    /// General status 0x01 plus a 16-bit extended status word.
    Extended(ConnMgrStatus),
    /// A bare general status (config-data application failure).
    General(GeneralStatus),
}

fn new_conn(
    open: &ForwardOpenRequest,
    originator: SocketAddrV4,
    instance_type: ConnInstanceType,
) -> CipConn {
    // the watchdog runs on the consuming interval scaled by the requested
    // multiplier; the target does not coerce either interval
    let factor = i64::from(open.timeout_multiplier.max(1));
    CipConn {
        state: ConnState::Configuring,
        instance_type,
        triad: open.triad,
        consuming_point: 0,
        producing_point: 0,
        config_point: None,
        o_to_t: open.o_to_t_ncp,
        t_to_o: open.t_to_o_ncp,
        o_to_t_rpi_us: open.o_to_t_rpi_us,
        t_to_o_rpi_us: open.t_to_o_rpi_us,
        o_to_t_api_us: open.o_to_t_rpi_us,
        t_to_o_api_us: open.t_to_o_rpi_us,
        consumed_connection_id: open.o_to_t_connection_id,
        produced_connection_id: open.t_to_o_connection_id,
        sequence_count_producing: 0,
        sequence_count_consuming: None,
        run_idle_state: None,
        has_run_idle_header: false,
        timeout_us: i64::from(open.o_to_t_rpi_us) * factor,
        trigger_timer_us: 0,
        watchdog_timer_us: 0,
        originator,
        produce_to: originator,
        producing_socket: None,
        consuming_socket: None,
    }
}

/// Split the application paths of an I/O connection path into
/// (config, consuming, producing) following their wire order.
fn split_app_paths(paths: &[AppPath]) -> Option<(Option<&AppPath>, &AppPath, &AppPath)> {
    match paths.len() {
        2 => Some((None, &paths[0], &paths[1])),
        3 => Some((Some(&paths[0]), &paths[1], &paths[2])),
        _ => None,
    }
}

fn check_electronic_key(key: &ElectronicKey, device: &DeviceConfig) -> Result<(), ConnMgrStatus> {
    // zero fields are wildcards
    if key.vendor_id != 0 && key.vendor_id != device.vendor_id {
        return Err(ConnMgrStatus::VendorOrProductCodeMismatch);
    }
    if key.product_code != 0 && key.product_code != device.product_code {
        return Err(ConnMgrStatus::VendorOrProductCodeMismatch);
    }
    if key.device_type != 0 && key.device_type != device.device_type {
        return Err(ConnMgrStatus::DeviceTypeMismatch);
    }
    if key.major_revision != 0 {
        if key.major_revision != device.revision_major {
            return Err(ConnMgrStatus::RevisionMismatch);
        }
        if key.compatibility {
            // device must be able to emulate at least the keyed minor
            if device.revision_minor < key.minor_revision {
                return Err(ConnMgrStatus::RevisionMismatch);
            }
        } else if key.minor_revision != 0 && key.minor_revision != device.revision_minor {
            return Err(ConnMgrStatus::RevisionMismatch);
        }
    }
    Ok(())
}

fn apply_config_data(
    assemblies: &mut Assemblies,
    app: &mut dyn AdapterApplication,
    config_point: u16,
    data: &[u8],
) -> Result<(), GeneralStatus> {
    let expected = assemblies
        .len_of(config_point)
        .map_err(|_| GeneralStatus::PrivilegeViolation)?;
    if data.len() != expected {
        return Err(GeneralStatus::PrivilegeViolation);
    }
    assemblies.write(config_point, data).expect("length checked");
    app.after_assembly_data_received(assemblies, config_point)
        .map_err(|_| GeneralStatus::PrivilegeViolation)
}

fn reply_success(
    service: u8,
    open: &ForwardOpenRequest,
    ids: OpenedIds,
) -> MessageRouterResponse {
    let mut w = Writer::new();
    w.put_u32(ids.o_to_t_connection_id).expect("reply fits");
    w.put_u32(ids.t_to_o_connection_id).expect("reply fits");
    w.put_u16(open.triad.connection_serial).expect("reply fits");
    w.put_u16(open.triad.originator_vendor_id).expect("reply fits");
    w.put_u32(open.triad.originator_serial).expect("reply fits");
    w.put_u32(open.o_to_t_rpi_us).expect("reply fits"); // O→T API
    w.put_u32(open.t_to_o_rpi_us).expect("reply fits"); // T→O API
    w.put_u8(0).expect("reply fits"); // application reply size
    w.put_u8(0).expect("reply fits"); // reserved
    MessageRouterResponse::ok(service, w.into_bytes())
}

fn reply_open_error(
    service: u8,
    open: &ForwardOpenRequest,
    status: ConnMgrStatus,
) -> MessageRouterResponse {
    let mut response = MessageRouterResponse::error(service, GeneralStatus::ConnectionFailure);
    response.extended_status = vec![status.as_u16()];
    response.data = error_body(&open.triad);
    response
}

/// Unsuccessful Forward-Open / Forward-Close body: the triad plus the
/// remaining-path-size and reserved bytes.
fn error_body(triad: &ConnectionTriad) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u16(triad.connection_serial).expect("reply fits");
    w.put_u16(triad.originator_vendor_id).expect("reply fits");
    w.put_u32(triad.originator_serial).expect("reply fits");
    w.put_u8(0).expect("reply fits"); // remaining path size
    w.put_u8(0).expect("reply fits"); // reserved
    w.into_bytes()
}

/// Successful Forward-Close body.
fn close_body(triad: &ConnectionTriad) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u16(triad.connection_serial).expect("reply fits");
    w.put_u16(triad.originator_vendor_id).expect("reply fits");
    w.put_u32(triad.originator_serial).expect("reply fits");
    w.put_u8(0).expect("reply fits"); // application reply size
    w.put_u8(0).expect("reply fits"); // reserved
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_body(large: bool) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(0x03).unwrap();
        w.put_u8(0xFA).unwrap();
        w.put_u32(0xAAAA_0001).unwrap();
        w.put_u32(0xBBBB_0001).unwrap();
        w.put_u16(0x1234).unwrap();
        w.put_u16(0x004D).unwrap();
        w.put_u32(0xCAFE_F00D).unwrap();
        w.put_u8(4).unwrap();
        w.put_bytes(&[0, 0, 0]).unwrap();
        w.put_u32(10_000).unwrap();
        if large {
            w.put_u32(0x4000_0000 | 134).unwrap();
        } else {
            w.put_u16(0x4000 | 134).unwrap();
        }
        w.put_u32(10_000).unwrap();
        if large {
            w.put_u32(0x4000_0000 | 130).unwrap();
        } else {
            w.put_u16(0x4000 | 130).unwrap();
        }
        w.put_u8(0x01).unwrap();
        w.put_u8(4).unwrap();
        w.put_bytes(&[0x20, 0x04, 0x24, 151, 0x2C, 150, 0x2C, 100]).unwrap();
        w.into_bytes()
    }

    #[test]
    fn test_forward_open_parse() {
        let body = open_body(false);
        let mut r = Reader::new(&body);
        let open = ForwardOpenRequest::parse(&mut r, false).unwrap();
        assert_eq!(open.o_to_t_connection_id, 0xAAAA_0001);
        assert_eq!(open.t_to_o_connection_id, 0xBBBB_0001);
        assert_eq!(open.triad.connection_serial, 0x1234);
        assert_eq!(open.timeout_multiplier, 4);
        assert_eq!(open.o_to_t_rpi_us, 10_000);
        assert_eq!(open.o_to_t_ncp.size, 134);
        assert_eq!(open.o_to_t_ncp.conn_type, IoConnType::PointToPoint);
        assert_eq!(open.transport_class(), 1);
        assert_eq!(open.path.app_paths.len(), 3);
        assert!(r.is_empty());
    }

    #[test]
    fn test_large_forward_open_parse() {
        let body = open_body(true);
        let mut r = Reader::new(&body);
        let open = ForwardOpenRequest::parse(&mut r, true).unwrap();
        assert_eq!(open.o_to_t_ncp.size, 134);
        assert_eq!(open.t_to_o_ncp.size, 130);
    }

    #[test]
    fn test_truncated_forward_open_fails() {
        let body = open_body(false);
        let mut r = Reader::new(&body[..20]);
        assert!(ForwardOpenRequest::parse(&mut r, false).is_err());
    }

    #[test]
    fn test_forward_close_parse_skips_reference_path() {
        let mut w = Writer::new();
        w.put_u8(0x03).unwrap();
        w.put_u8(0xFA).unwrap();
        w.put_u16(0x1234).unwrap();
        w.put_u16(0x004D).unwrap();
        w.put_u32(0xCAFE_F00D).unwrap();
        w.put_u8(2).unwrap(); // path words
        w.put_u8(0).unwrap(); // reserved
        w.put_bytes(&[0x20, 0x04, 0x2C, 150]).unwrap();
        let body = w.into_bytes();

        let mut r = Reader::new(&body);
        let close = ForwardCloseRequest::parse(&mut r).unwrap();
        assert_eq!(close.triad.connection_serial, 0x1234);
        assert_eq!(close.triad.originator_vendor_id, 0x004D);
        assert!(r.is_empty());
    }

    #[test]
    fn test_electronic_key_matching() {
        let device = DeviceConfig {
            vendor_id: 357,
            device_type: 0x000C,
            product_code: 100,
            revision_major: 1,
            revision_minor: 3,
            ..Default::default()
        };
        let mut key = ElectronicKey {
            vendor_id: 357,
            device_type: 0x000C,
            product_code: 100,
            major_revision: 1,
            compatibility: false,
            minor_revision: 3,
        };
        assert!(check_electronic_key(&key, &device).is_ok());

        // zero fields are wildcards
        key.vendor_id = 0;
        key.product_code = 0;
        key.major_revision = 0;
        assert!(check_electronic_key(&key, &device).is_ok());

        key.vendor_id = 999;
        assert_eq!(
            check_electronic_key(&key, &device),
            Err(ConnMgrStatus::VendorOrProductCodeMismatch)
        );

        key.vendor_id = 357;
        key.device_type = 0x0044;
        assert_eq!(
            check_electronic_key(&key, &device),
            Err(ConnMgrStatus::DeviceTypeMismatch)
        );

        // exact match demanded, wrong minor
        key.device_type = 0x000C;
        key.major_revision = 1;
        key.minor_revision = 4;
        assert_eq!(
            check_electronic_key(&key, &device),
            Err(ConnMgrStatus::RevisionMismatch)
        );

        // compatibility bit: device minor 3 can emulate keyed minor 2
        key.compatibility = true;
        key.minor_revision = 2;
        assert!(check_electronic_key(&key, &device).is_ok());
        key.minor_revision = 4;
        assert!(check_electronic_key(&key, &device).is_err());
    }
}
