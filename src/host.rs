// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Host integration surfaces
//!
//! The stack is single-threaded and sans-socket: the platform implements
//! [`UdpIo`] and feeds received bytes into the stack's entry points, and the
//! device application implements [`AdapterApplication`] to be told about
//! connection events and assembly data movement. Callbacks are invoked
//! synchronously on the caller's context and must not block.

use std::net::SocketAddrV4;

use crate::assembly::Assemblies;
use crate::error::{EipError, GeneralStatus};
use crate::stack::Stack;

/// Opaque handle for a UDP socket created by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub u32);

/// Direction of a UDP socket requested by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpDirection {
    Consuming,
    Producing,
}

/// Socket operations supplied by the platform.
pub trait UdpIo {
    /// Create a UDP endpoint. For `Consuming`, `addr` is the local address
    /// to receive on; for `Producing`, the remote address frames will be
    /// sent to (a multicast group or the originator).
    fn create_udp_socket(
        &mut self,
        direction: UdpDirection,
        addr: SocketAddrV4,
    ) -> Result<SocketHandle, EipError>;

    fn send_udp(
        &mut self,
        socket: SocketHandle,
        to: SocketAddrV4,
        data: &[u8],
    ) -> Result<(), EipError>;

    fn close_udp_socket(&mut self, socket: SocketHandle);
}

/// Connection lifecycle notifications forwarded to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoConnectionEvent {
    Opened,
    TimedOut,
    Closed,
}

impl std::fmt::Display for IoConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoConnectionEvent::Opened => write!(f, "opened"),
            IoConnectionEvent::TimedOut => write!(f, "timed out"),
            IoConnectionEvent::Closed => write!(f, "closed"),
        }
    }
}

/// Device application callbacks.
///
/// Every method has a default so an application only implements what it
/// cares about. Callbacks receive the assembly pool so they can read and
/// update any buffer (the sample application mirrors its output assembly
/// into its input assembly this way).
pub trait AdapterApplication {
    /// Called by the host once the stack is up, before any traffic: the
    /// place to create assemblies and register connection points.
    fn application_initialization(&mut self, _stack: &mut Stack) -> Result<(), EipError> {
        Ok(())
    }

    /// Called once at the start of every timer tick, before connection
    /// timers advance.
    fn handle_application(&mut self, _assemblies: &mut Assemblies) {}

    /// A connection on (output, input) changed state.
    fn check_io_connection_event(
        &mut self,
        _output_assembly: u16,
        _input_assembly: u16,
        _event: IoConnectionEvent,
    ) {
    }

    /// A consuming frame (or an explicit set) was written into the
    /// assembly. Returning an error status rejects the data; for a config
    /// assembly during Forward-Open this rejects the open.
    fn after_assembly_data_received(
        &mut self,
        _assemblies: &mut Assemblies,
        _instance_id: u16,
    ) -> Result<(), GeneralStatus> {
        Ok(())
    }

    /// The assembly is about to be produced; update its buffer if needed.
    /// The return value reports whether the data changed.
    fn before_assembly_data_send(
        &mut self,
        _assemblies: &mut Assemblies,
        _instance_id: u16,
    ) -> bool {
        true
    }

    /// The 32-bit run/idle header of an O→T frame changed.
    fn run_idle_changed(&mut self, _run_idle: u32) {}

    /// Identity Reset service, parameter 0.
    fn reset_device(&mut self) -> Result<(), GeneralStatus> {
        Err(GeneralStatus::ServiceNotSupported)
    }

    /// Identity Reset service, parameters 1 and 2.
    fn reset_to_initial_configuration(
        &mut self,
        _also_reset_comm_params: bool,
    ) -> Result<(), GeneralStatus> {
        Err(GeneralStatus::ServiceNotSupported)
    }
}

/// Application that accepts everything and does nothing. Useful for
/// explicit-messaging-only devices and tests.
#[derive(Debug, Default)]
pub struct NullApplication;

impl AdapterApplication for NullApplication {}
