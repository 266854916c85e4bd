// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Connection records and per-connection runtime
//!
//! A [`CipConn`] is the live record of one Class-1 or Class-3 connection:
//! its application paths, network connection parameters, microsecond
//! countdown timers, 16-bit sequence counters and socket handles. Frame
//! production and consumption for the implicit I/O path live here; opening
//! and closing is the connection manager's job.

use std::net::SocketAddrV4;

use tracing::trace;

use crate::assembly::Assemblies;
use crate::codec::Writer;
use crate::error::{ConnectionError, GeneralStatus};
use crate::host::{AdapterApplication, SocketHandle, UdpIo};

/// UDP port for implicit (connected Class-0/1) I/O.
pub const IO_UDP_PORT: u16 = 0x08AE;

/// Connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    NonExistent,
    Configuring,
    Established,
    TimedOut,
    Closing,
}

/// What kind of connection a record is; dispatch over this replaces the
/// per-record behavior pointers of classic adapter stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnInstanceType {
    ExplicitMessaging,
    IoExclusiveOwner,
    IoInputOnly,
    IoListenOnly,
}

impl std::fmt::Display for ConnInstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnInstanceType::ExplicitMessaging => write!(f, "explicit"),
            ConnInstanceType::IoExclusiveOwner => write!(f, "exclusive owner"),
            ConnInstanceType::IoInputOnly => write!(f, "input only"),
            ConnInstanceType::IoListenOnly => write!(f, "listen only"),
        }
    }
}

/// Connection type bits of the network connection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoConnType {
    Null,
    Multicast,
    PointToPoint,
    Reserved,
}

/// Decoded network connection parameters for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetConnParams {
    pub size: u16,
    pub conn_type: IoConnType,
    pub priority: u8,
    pub variable: bool,
    pub redundant_owner: bool,
}

impl NetConnParams {
    /// Decode the 16-bit form used by Forward-Open.
    pub fn from_word(word: u16) -> Self {
        Self {
            size: word & 0x01FF,
            conn_type: Self::conn_type_bits((word >> 13) & 0x03),
            priority: ((word >> 10) & 0x03) as u8,
            variable: word & 0x0200 != 0,
            redundant_owner: word & 0x8000 != 0,
        }
    }

    /// Decode the 32-bit form used by Large-Forward-Open.
    pub fn from_dword(dword: u32) -> Self {
        Self {
            size: dword as u16,
            conn_type: Self::conn_type_bits(((dword >> 29) & 0x03) as u16),
            priority: ((dword >> 26) & 0x03) as u8,
            variable: dword & 0x0200_0000 != 0,
            redundant_owner: dword & 0x8000_0000 != 0,
        }
    }

    fn conn_type_bits(bits: u16) -> IoConnType {
        match bits {
            0 => IoConnType::Null,
            1 => IoConnType::Multicast,
            2 => IoConnType::PointToPoint,
            _ => IoConnType::Reserved,
        }
    }
}

/// The (connection serial, originator vendor, originator serial) triple
/// that identifies a connection at the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTriad {
    pub connection_serial: u16,
    pub originator_vendor_id: u16,
    pub originator_serial: u32,
}

/// One live connection.
#[derive(Debug, Clone)]
pub struct CipConn {
    pub state: ConnState,
    pub instance_type: ConnInstanceType,
    pub triad: ConnectionTriad,

    /// O→T application point (the assembly this connection writes).
    pub consuming_point: u16,
    /// T→O application point (the assembly this connection reads).
    pub producing_point: u16,
    pub config_point: Option<u16>,

    pub o_to_t: NetConnParams,
    pub t_to_o: NetConnParams,
    pub o_to_t_rpi_us: u32,
    pub t_to_o_rpi_us: u32,
    pub o_to_t_api_us: u32,
    pub t_to_o_api_us: u32,

    /// Network connection id of frames we consume.
    pub consumed_connection_id: u32,
    /// Network connection id of frames we produce.
    pub produced_connection_id: u32,

    pub sequence_count_producing: u16,
    pub sequence_count_consuming: Option<u16>,
    /// Last observed 32-bit run/idle word, when the O→T format carries one.
    pub run_idle_state: Option<u32>,
    pub has_run_idle_header: bool,

    /// Watchdog reload value, microseconds.
    pub timeout_us: i64,
    pub trigger_timer_us: i64,
    pub watchdog_timer_us: i64,

    /// Where the originator's frames come from; consumed frames from any
    /// other source are dropped.
    pub originator: SocketAddrV4,
    /// Destination of produced frames (originator or multicast group).
    pub produce_to: SocketAddrV4,

    pub producing_socket: Option<SocketHandle>,
    pub consuming_socket: Option<SocketHandle>,
}

impl CipConn {
    /// True when this record owns an outbound data flow: a non-null T→O
    /// direction with its own socket. Multicast peers that share a master's
    /// socket do not drive production themselves.
    pub fn produces(&self) -> bool {
        self.t_to_o.conn_type != IoConnType::Null && self.producing_socket.is_some()
    }

    pub fn consumes(&self) -> bool {
        self.o_to_t.conn_type != IoConnType::Null
    }

    pub fn is_io(&self) -> bool {
        self.instance_type != ConnInstanceType::ExplicitMessaging
    }

    pub fn is_multicast_producer(&self) -> bool {
        self.t_to_o.conn_type == IoConnType::Multicast
            && matches!(
                self.instance_type,
                ConnInstanceType::IoExclusiveOwner | ConnInstanceType::IoInputOnly
            )
    }

    /// Arm both timers for a freshly established connection.
    pub fn arm(&mut self) {
        self.trigger_timer_us = i64::from(self.t_to_o_api_us);
        self.watchdog_timer_us = self.timeout_us;
    }

    pub fn reset_watchdog(&mut self) {
        self.watchdog_timer_us = self.timeout_us;
    }
}

/// Fixed-capacity slot table holding every live connection record. The
/// "active list" is an iteration over occupied slots; ascending slot index
/// is the production order. Removing a slot during iteration is safe
/// because iteration is by index, never by reference chain.
#[derive(Debug)]
pub struct ConnectionTable {
    slots: Vec<Option<CipConn>>,
}

impl ConnectionTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Place a connection in the first free slot.
    pub fn insert(&mut self, conn: CipConn) -> Result<usize, ConnectionError> {
        match self.slots.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            Some((index, slot)) => {
                *slot = Some(conn);
                Ok(index)
            }
            None => Err(ConnectionError::TableFull),
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<CipConn> {
        self.slots.get_mut(index)?.take()
    }

    pub fn get(&self, index: usize) -> Option<&CipConn> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut CipConn> {
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &CipConn)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|conn| (index, conn)))
    }

    pub fn find_by_consumed_id(&self, connection_id: u32) -> Option<usize> {
        self.iter()
            .find(|(_, c)| {
                c.state == ConnState::Established && c.consumed_connection_id == connection_id
            })
            .map(|(index, _)| index)
    }

    pub fn find_by_triad(&self, triad: &ConnectionTriad) -> Option<usize> {
        self.iter()
            .find(|(_, c)| c.state != ConnState::NonExistent && c.triad == *triad)
            .map(|(index, _)| index)
    }

    /// Is some I/O connection already consuming on this output assembly?
    pub fn output_assembly_in_use(&self, output_assembly: u16) -> bool {
        self.iter().any(|(_, c)| {
            c.is_io()
                && c.consuming_point == output_assembly
                && matches!(c.state, ConnState::Configuring | ConnState::Established)
        })
    }

    /// Count of live connections of `instance_type` consuming on this
    /// output assembly; bounds the per-triple slot usage.
    pub fn slots_in_use(&self, instance_type: ConnInstanceType, output_assembly: u16) -> usize {
        self.iter()
            .filter(|(_, c)| {
                c.instance_type == instance_type
                    && c.consuming_point == output_assembly
                    && c.state != ConnState::NonExistent
            })
            .count()
    }

    /// The multicast producer master for an input assembly: an established
    /// exclusive-owner or input-only connection that owns its socket.
    pub fn multicast_producer_master(&self, producing_point: u16) -> Option<usize> {
        self.iter()
            .find(|(_, c)| {
                c.is_multicast_producer()
                    && c.producing_point == producing_point
                    && c.producing_socket.is_some()
                    && c.state == ConnState::Established
            })
            .map(|(index, _)| index)
    }

    /// The first multicast producer on the same input assembly that shares
    /// somebody else's socket; the promotion candidate when a master closes.
    pub fn next_non_master_peer(&self, producing_point: u16) -> Option<usize> {
        self.iter()
            .find(|(_, c)| {
                c.is_multicast_producer()
                    && c.producing_point == producing_point
                    && c.producing_socket.is_none()
                    && c.state == ConnState::Established
            })
            .map(|(index, _)| index)
    }
}

/// A parsed implicit I/O frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectedFrame<'a> {
    pub connection_id: u32,
    pub sequence: u16,
    pub payload: &'a [u8],
}

/// Split a received UDP datagram into connection id, sequence count and
/// payload. The run/idle header, being per-connection, is peeled later.
pub fn parse_connected_frame(data: &[u8]) -> Result<ConnectedFrame<'_>, ConnectionError> {
    if data.len() < 6 {
        return Err(ConnectionError::ShortFrame);
    }
    Ok(ConnectedFrame {
        connection_id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
        sequence: u16::from_le_bytes([data[4], data[5]]),
        payload: &data[6..],
    })
}

/// Build and send one produced frame, advancing the sequence counter.
pub fn produce(
    conn: &mut CipConn,
    assemblies: &mut Assemblies,
    io: &mut dyn UdpIo,
    app: &mut dyn AdapterApplication,
) -> Result<(), ConnectionError> {
    let socket = match conn.producing_socket {
        Some(socket) => socket,
        None => return Ok(()),
    };

    app.before_assembly_data_send(assemblies, conn.producing_point);

    conn.sequence_count_producing = conn.sequence_count_producing.wrapping_add(1);

    let mut frame = Writer::new();
    frame
        .put_u32(conn.produced_connection_id)
        .expect("frame header fits");
    frame
        .put_u16(conn.sequence_count_producing)
        .expect("frame header fits");
    if let Some(assembly) = assemblies.get(conn.producing_point) {
        frame.put_bytes(assembly.data()).expect("assembly bounded");
    }

    trace!(
        connection_id = conn.produced_connection_id,
        sequence = conn.sequence_count_producing,
        bytes = frame.len(),
        "producing frame"
    );
    if let Err(e) = io.send_udp(socket, conn.produce_to, frame.as_slice()) {
        // a failed send is dropped; the originator's own watchdog notices
        tracing::warn!(error = %e, "produced frame send failed");
    }
    Ok(())
}

/// Outcome of feeding a consumed frame into a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Accepted,
    /// Same sequence count as the previous frame; watchdog reset only.
    Duplicate,
}

/// Handle one consuming frame already matched to this connection: sequence
/// duplicate suppression, run/idle tracking, assembly update, application
/// notification, watchdog reset.
pub fn consume(
    conn: &mut CipConn,
    assemblies: &mut Assemblies,
    app: &mut dyn AdapterApplication,
    frame: &ConnectedFrame,
) -> Result<ConsumeOutcome, GeneralStatus> {
    if conn.sequence_count_consuming == Some(frame.sequence) {
        conn.reset_watchdog();
        return Ok(ConsumeOutcome::Duplicate);
    }
    conn.sequence_count_consuming = Some(frame.sequence);

    let mut payload = frame.payload;
    if conn.has_run_idle_header {
        if payload.len() < 4 {
            return Err(GeneralStatus::NotEnoughData);
        }
        let run_idle = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        payload = &payload[4..];
        if conn.run_idle_state != Some(run_idle) {
            conn.run_idle_state = Some(run_idle);
            app.run_idle_changed(run_idle);
        }
    }

    let expected = assemblies
        .len_of(conn.consuming_point)
        .map_err(|_| GeneralStatus::PathDestinationUnknown)?;
    if payload.len() != expected {
        return Err(if payload.len() < expected {
            GeneralStatus::NotEnoughData
        } else {
            GeneralStatus::TooMuchData
        });
    }
    if expected > 0 {
        assemblies
            .write(conn.consuming_point, payload)
            .expect("length checked");
        app.after_assembly_data_received(assemblies, conn.consuming_point)?;
    }

    conn.reset_watchdog();
    Ok(ConsumeOutcome::Accepted)
}
