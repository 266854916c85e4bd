// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! The core library for the EIPA adapter stack.
//!
//! An EtherNet/IP target (adapter) implementation of the CIP object model:
//! explicit messaging over the encapsulation layer, Class-1 cyclic I/O
//! connections with ownership arbitration and multicast producer election,
//! and a registry of CIP objects the Message Router dispatches into.
//!
//! The stack is single-threaded and host-driven: the platform feeds bytes
//! into [`stack::Stack`]'s entry points and calls
//! [`stack::Stack::manage_connections`] once per timer tick. A sample
//! POSIX host lives in [`shim`].

// Public module declarations
pub mod assembly;
pub mod codec;
pub mod config;
pub mod conn_point;
pub mod connection;
pub mod connection_manager;
pub mod encap;
pub mod epath;
pub mod error;
pub mod host;
pub mod message_router;
pub mod objects;
pub mod registry;
pub mod shim;
pub mod stack;

// Re-export commonly used types
pub use assembly::{Assemblies, Assembly};
pub use codec::{DataType, Reader, Value, Writer};
pub use config::{AdapterConfig, ConnectionLimits, DeviceConfig, NetworkConfig};
pub use conn_point::{ConnPointTriple, ConnPoints};
pub use connection::{
    CipConn, ConnInstanceType, ConnState, ConnectionTable, ConnectionTriad, IoConnType,
    NetConnParams, IO_UDP_PORT,
};
pub use connection_manager::{ConnectionManager, ForwardCloseRequest, ForwardOpenRequest};
pub use encap::{Cpf, EncapHeader, SessionTable, ENCAP_PORT};
pub use epath::{AppPath, ConnectionPath, ElectronicKey};
pub use error::{
    AssemblyError, CodecError, ConnMgrStatus, ConnectionError, EipError, EncapError, EncapStatus,
    GeneralStatus, RegistryError,
};
pub use host::{AdapterApplication, IoConnectionEvent, NullApplication, SocketHandle, UdpIo};
pub use message_router::{MessageRouterRequest, MessageRouterResponse};
pub use registry::{CipAttribute, CipClass, CipInstance, ClassRegistry};
pub use stack::Stack;
