// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Message Router
//!
//! Decodes a Message Router request (service code, request path, request
//! data), resolves the addressed class or instance through the registry and
//! runs the service. The generic attribute services live here; Connection
//! Manager services are routed by the stack because they need the socket
//! surface.

use tracing::debug;

use crate::assembly::{Assemblies, ASSEMBLY_CLASS, ASSEMBLY_DATA_ATTRIBUTE};
use crate::codec::{Reader, Value, Writer};
use crate::epath::{parse_request_path, AppPath};
use crate::error::{CodecError, GeneralStatus};
use crate::host::AdapterApplication;
use crate::objects::IDENTITY_CLASS;
use crate::registry::ClassRegistry;

/// Service codes handled by this stack.
pub mod services {
    pub const GET_ATTRIBUTE_ALL: u8 = 0x01;
    pub const RESET: u8 = 0x05;
    pub const GET_ATTRIBUTE_SINGLE: u8 = 0x0E;
    pub const SET_ATTRIBUTE_SINGLE: u8 = 0x10;
    pub const FORWARD_CLOSE: u8 = 0x4E;
    pub const FORWARD_OPEN: u8 = 0x54;
    pub const GET_CONNECTION_OWNER: u8 = 0x5A;
    pub const LARGE_FORWARD_OPEN: u8 = 0x5B;
}

/// Set on the service code of every response.
pub const REPLY_SERVICE_FLAG: u8 = 0x80;

/// A decoded Message Router request.
#[derive(Debug, Clone)]
pub struct MessageRouterRequest<'a> {
    pub service: u8,
    pub path: AppPath,
    pub data: &'a [u8],
}

impl<'a> MessageRouterRequest<'a> {
    /// Parse from the body of an unconnected or connected data item.
    pub fn parse(input: &mut Reader<'a>) -> Result<Self, CodecError> {
        let service = input.get_u8()?;
        let path_words = input.get_u8()?;
        let path = parse_request_path(input, path_words)?;
        let data = input.rest();
        Ok(Self {
            service,
            path,
            data,
        })
    }
}

/// A Message Router response ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRouterResponse {
    /// Request service code; the reply bit is set during encoding.
    pub service: u8,
    pub general_status: u8,
    pub extended_status: Vec<u16>,
    pub data: Vec<u8>,
}

impl MessageRouterResponse {
    pub fn ok(service: u8, data: Vec<u8>) -> Self {
        Self {
            service,
            general_status: GeneralStatus::Success.as_u8(),
            extended_status: Vec::new(),
            data,
        }
    }

    pub fn error(service: u8, status: GeneralStatus) -> Self {
        Self {
            service,
            general_status: status.as_u8(),
            extended_status: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.general_status == GeneralStatus::Success.as_u8()
    }

    pub fn encode(&self, out: &mut Writer) -> Result<(), CodecError> {
        out.put_u8(self.service | REPLY_SERVICE_FLAG)?;
        out.put_u8(0)?; // reserved
        out.put_u8(self.general_status)?;
        out.put_u8(self.extended_status.len() as u8)?;
        for word in &self.extended_status {
            out.put_u16(*word)?;
        }
        out.put_bytes(&self.data)
    }
}

/// Run a non-Connection-Manager service against the registry.
pub fn dispatch(
    registry: &mut ClassRegistry,
    assemblies: &mut Assemblies,
    app: &mut dyn AdapterApplication,
    request: &MessageRouterRequest,
) -> MessageRouterResponse {
    let service = request.service;
    let path = request.path;

    let Some(class) = registry.class(path.class) else {
        debug!(class = path.class, "request for unregistered class");
        return MessageRouterResponse::error(service, GeneralStatus::PathDestinationUnknown);
    };

    let instance_id = path.instance_or_conn_point().unwrap_or(0);
    let supported = if instance_id == 0 {
        class.supports_class_service(service)
    } else {
        class.supports_instance_service(service)
    };
    if !supported {
        return MessageRouterResponse::error(service, GeneralStatus::ServiceNotSupported);
    }
    if instance_id != 0 && class.instance(instance_id).is_none() {
        return MessageRouterResponse::error(service, GeneralStatus::PathDestinationUnknown);
    }

    match service {
        services::GET_ATTRIBUTE_SINGLE => {
            get_attribute_single(registry, assemblies, app, &path, instance_id, service)
        }
        services::SET_ATTRIBUTE_SINGLE => set_attribute_single(
            registry,
            assemblies,
            app,
            &path,
            instance_id,
            service,
            request.data,
        ),
        services::GET_ATTRIBUTE_ALL => get_attribute_all(registry, &path, instance_id, service),
        services::RESET if path.class == IDENTITY_CLASS => reset(app, service, request.data),
        _ => MessageRouterResponse::error(service, GeneralStatus::ServiceNotSupported),
    }
}

fn encode_value(service: u8, value: &Value) -> MessageRouterResponse {
    let mut w = Writer::new();
    match value.encode(&mut w) {
        Ok(()) => MessageRouterResponse::ok(service, w.into_bytes()),
        Err(_) => MessageRouterResponse::error(service, GeneralStatus::ReplyDataTooLarge),
    }
}

fn get_attribute_single(
    registry: &ClassRegistry,
    assemblies: &mut Assemblies,
    app: &mut dyn AdapterApplication,
    path: &AppPath,
    instance_id: u16,
    service: u8,
) -> MessageRouterResponse {
    let Some(attribute_id) = path.attribute else {
        return MessageRouterResponse::error(service, GeneralStatus::PathSegmentError);
    };
    let class = registry.class(path.class).expect("checked by dispatch");

    if instance_id == 0 {
        return match class.class_attribute(attribute_id) {
            Some(value) => encode_value(service, &value),
            None => MessageRouterResponse::error(service, GeneralStatus::AttributeNotSupported),
        };
    }

    // Assembly data reads go to the buffer pool, refreshed by the
    // application first.
    if path.class == ASSEMBLY_CLASS && attribute_id == ASSEMBLY_DATA_ATTRIBUTE {
        app.before_assembly_data_send(assemblies, instance_id);
        let Some(assembly) = assemblies.get(instance_id) else {
            return MessageRouterResponse::error(service, GeneralStatus::PathDestinationUnknown);
        };
        return MessageRouterResponse::ok(service, assembly.data().to_vec());
    }

    let instance = class.instance(instance_id).expect("checked by dispatch");
    match instance.attribute(attribute_id) {
        Some(attribute) if attribute.gettable => encode_value(service, &attribute.value),
        Some(_) => MessageRouterResponse::error(service, GeneralStatus::ServiceNotSupported),
        None => MessageRouterResponse::error(service, GeneralStatus::AttributeNotSupported),
    }
}

fn set_attribute_single(
    registry: &mut ClassRegistry,
    assemblies: &mut Assemblies,
    app: &mut dyn AdapterApplication,
    path: &AppPath,
    instance_id: u16,
    service: u8,
    data: &[u8],
) -> MessageRouterResponse {
    let Some(attribute_id) = path.attribute else {
        return MessageRouterResponse::error(service, GeneralStatus::PathSegmentError);
    };

    if instance_id == 0 {
        return MessageRouterResponse::error(service, GeneralStatus::AttributeNotSettable);
    }

    if path.class == ASSEMBLY_CLASS && attribute_id == ASSEMBLY_DATA_ATTRIBUTE {
        let expected = match assemblies.len_of(instance_id) {
            Ok(len) => len,
            Err(_) => {
                return MessageRouterResponse::error(service, GeneralStatus::PathDestinationUnknown)
            }
        };
        if data.len() < expected {
            return MessageRouterResponse::error(service, GeneralStatus::NotEnoughData);
        }
        if data.len() > expected {
            return MessageRouterResponse::error(service, GeneralStatus::TooMuchData);
        }
        assemblies.write(instance_id, data).expect("length checked");
        return match app.after_assembly_data_received(assemblies, instance_id) {
            Ok(()) => MessageRouterResponse::ok(service, Vec::new()),
            Err(status) => MessageRouterResponse::error(service, status),
        };
    }

    let Some(instance) = registry.instance_mut(path.class, instance_id) else {
        return MessageRouterResponse::error(service, GeneralStatus::PathDestinationUnknown);
    };
    let Some(attribute) = instance.attribute_mut(attribute_id) else {
        return MessageRouterResponse::error(service, GeneralStatus::AttributeNotSupported);
    };
    if !attribute.settable {
        return MessageRouterResponse::error(service, GeneralStatus::AttributeNotSettable);
    }

    let mut reader = Reader::new(data);
    let value = match Value::decode(attribute.value.data_type(), &mut reader) {
        Ok(value) => value,
        Err(CodecError::Underflow { .. }) => {
            return MessageRouterResponse::error(service, GeneralStatus::NotEnoughData)
        }
        Err(_) => return MessageRouterResponse::error(service, GeneralStatus::InvalidAttributeValue),
    };
    if !reader.is_empty() {
        return MessageRouterResponse::error(service, GeneralStatus::TooMuchData);
    }
    attribute.value = value;
    MessageRouterResponse::ok(service, Vec::new())
}

fn get_attribute_all(
    registry: &ClassRegistry,
    path: &AppPath,
    instance_id: u16,
    service: u8,
) -> MessageRouterResponse {
    let class = registry.class(path.class).expect("checked by dispatch");
    let mut w = Writer::new();

    if instance_id == 0 {
        for attribute_id in 1..=3 {
            let value = class.class_attribute(attribute_id).expect("attrs 1..3");
            if value.encode(&mut w).is_err() {
                return MessageRouterResponse::error(service, GeneralStatus::ReplyDataTooLarge);
            }
        }
        return MessageRouterResponse::ok(service, w.into_bytes());
    }

    let instance = class.instance(instance_id).expect("checked by dispatch");
    for attribute in instance.attributes() {
        if attribute.value.encode(&mut w).is_err() {
            return MessageRouterResponse::error(service, GeneralStatus::ReplyDataTooLarge);
        }
    }
    MessageRouterResponse::ok(service, w.into_bytes())
}

fn reset(
    app: &mut dyn AdapterApplication,
    service: u8,
    data: &[u8],
) -> MessageRouterResponse {
    let parameter = data.first().copied().unwrap_or(0);
    let outcome = match parameter {
        0 => app.reset_device(),
        1 => app.reset_to_initial_configuration(true),
        2 => app.reset_to_initial_configuration(false),
        _ => Err(GeneralStatus::InvalidAttributeValue),
    };
    match outcome {
        Ok(()) => MessageRouterResponse::ok(service, Vec::new()),
        Err(status) => MessageRouterResponse::error(service, status),
    }
}
