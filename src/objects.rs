// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Standard object classes
//!
//! Builders for the classes every adapter registers at init: Identity
//! (0x01), Message Router (0x02), Assembly (0x04), Connection Manager
//! (0x06), TCP/IP Interface (0xF5) and Ethernet Link (0xF6). Attribute
//! tables are populated from the adapter configuration; the Message Router
//! dispatches their services generically.

use crate::codec::{Value, Writer};
use crate::config::{DeviceConfig, NetworkConfig};
use crate::message_router::services;
use crate::registry::{CipAttribute, CipClass, ClassRegistry};

pub const IDENTITY_CLASS: u16 = 0x01;
pub const MESSAGE_ROUTER_CLASS: u16 = 0x02;
pub const CONNECTION_MANAGER_CLASS: u16 = 0x06;
pub const TCP_IP_CLASS: u16 = 0xF5;
pub const ETHERNET_LINK_CLASS: u16 = 0xF6;

/// Identity object attribute numbers used by ListIdentity as well.
pub mod identity_attr {
    pub const VENDOR_ID: u16 = 1;
    pub const DEVICE_TYPE: u16 = 2;
    pub const PRODUCT_CODE: u16 = 3;
    pub const REVISION: u16 = 4;
    pub const STATUS: u16 = 5;
    pub const SERIAL_NUMBER: u16 = 6;
    pub const PRODUCT_NAME: u16 = 7;
}

pub fn identity_class(device: &DeviceConfig) -> CipClass {
    let mut class = CipClass::new(IDENTITY_CLASS, "Identity", 1);
    class.instance_services = vec![
        services::GET_ATTRIBUTE_ALL,
        services::RESET,
        services::GET_ATTRIBUTE_SINGLE,
    ];
    class.class_services = vec![services::GET_ATTRIBUTE_ALL, services::GET_ATTRIBUTE_SINGLE];

    let instance = class.create_instance(1).expect("fresh class");
    instance.insert_attribute(CipAttribute::read_only(
        identity_attr::VENDOR_ID,
        Value::Uint(device.vendor_id),
    ));
    instance.insert_attribute(CipAttribute::read_only(
        identity_attr::DEVICE_TYPE,
        Value::Uint(device.device_type),
    ));
    instance.insert_attribute(CipAttribute::read_only(
        identity_attr::PRODUCT_CODE,
        Value::Uint(device.product_code),
    ));
    instance.insert_attribute(CipAttribute::read_only(
        identity_attr::REVISION,
        Value::UsintUsint(device.revision_major, device.revision_minor),
    ));
    instance.insert_attribute(CipAttribute::read_only(identity_attr::STATUS, Value::Word(0)));
    instance.insert_attribute(CipAttribute::read_only(
        identity_attr::SERIAL_NUMBER,
        Value::Udint(device.serial_number),
    ));
    instance.insert_attribute(CipAttribute::read_only(
        identity_attr::PRODUCT_NAME,
        Value::ShortString(device.product_name.clone()),
    ));
    class
}

pub fn message_router_class() -> CipClass {
    let mut class = CipClass::new(MESSAGE_ROUTER_CLASS, "Message Router", 1);
    class.instance_services = vec![services::GET_ATTRIBUTE_SINGLE];
    class.class_services = vec![services::GET_ATTRIBUTE_SINGLE];
    class.create_instance(1).expect("fresh class");
    class
}

pub fn assembly_class() -> CipClass {
    let mut class = CipClass::new(crate::assembly::ASSEMBLY_CLASS, "Assembly", 2);
    class.instance_services = vec![
        services::GET_ATTRIBUTE_SINGLE,
        services::SET_ATTRIBUTE_SINGLE,
    ];
    class.class_services = vec![services::GET_ATTRIBUTE_SINGLE];
    class
}

pub fn connection_manager_class() -> CipClass {
    let mut class = CipClass::new(CONNECTION_MANAGER_CLASS, "Connection Manager", 1);
    class.instance_services = vec![
        services::GET_ATTRIBUTE_SINGLE,
        services::FORWARD_OPEN,
        services::LARGE_FORWARD_OPEN,
        services::FORWARD_CLOSE,
        services::GET_CONNECTION_OWNER,
    ];
    class.class_services = vec![services::GET_ATTRIBUTE_SINGLE];
    class.create_instance(1).expect("fresh class");
    class
}

pub fn tcp_ip_class(network: &NetworkConfig) -> CipClass {
    let mut class = CipClass::new(TCP_IP_CLASS, "TCP/IP Interface", 4);
    class.instance_services = vec![
        services::GET_ATTRIBUTE_ALL,
        services::GET_ATTRIBUTE_SINGLE,
        services::SET_ATTRIBUTE_SINGLE,
    ];
    class.class_services = vec![services::GET_ATTRIBUTE_ALL, services::GET_ATTRIBUTE_SINGLE];

    let instance = class.create_instance(1).expect("fresh class");
    // status: interface configured from stored/supplied values
    instance.insert_attribute(CipAttribute::read_only(1, Value::Dword(0x0000_0001)));
    // capability: settable configuration supported
    instance.insert_attribute(CipAttribute::read_only(2, Value::Dword(0x0000_0004)));
    // control: configuration source; accepted but not persisted
    instance.insert_attribute(CipAttribute::read_write(3, Value::Dword(0)));
    instance.insert_attribute(CipAttribute::read_only(
        4,
        Value::UsintArray(physical_link_path()),
    ));
    instance.insert_attribute(CipAttribute::read_only(
        5,
        Value::UsintArray(interface_config_blob(network)),
    ));
    instance.insert_attribute(CipAttribute::read_only(
        6,
        Value::String(network.host_name.clone()),
    ));
    class
}

pub fn ethernet_link_class(network: &NetworkConfig) -> CipClass {
    let mut class = CipClass::new(ETHERNET_LINK_CLASS, "Ethernet Link", 4);
    class.instance_services = vec![services::GET_ATTRIBUTE_ALL, services::GET_ATTRIBUTE_SINGLE];
    class.class_services = vec![services::GET_ATTRIBUTE_ALL, services::GET_ATTRIBUTE_SINGLE];

    let instance = class.create_instance(1).expect("fresh class");
    // interface speed, Mbit/s
    instance.insert_attribute(CipAttribute::read_only(1, Value::Udint(100)));
    // interface flags: link up, full duplex
    instance.insert_attribute(CipAttribute::read_only(2, Value::Dword(0x0000_0003)));
    instance.insert_attribute(CipAttribute::read_only(
        3,
        Value::UsintArray(network.mac.to_vec()),
    ));
    class
}

/// Register the complete standard set on a fresh registry.
pub fn register_standard_classes(
    registry: &mut ClassRegistry,
    device: &DeviceConfig,
    network: &NetworkConfig,
) {
    registry
        .register_class(identity_class(device))
        .expect("fresh registry");
    registry
        .register_class(message_router_class())
        .expect("fresh registry");
    registry
        .register_class(assembly_class())
        .expect("fresh registry");
    registry
        .register_class(connection_manager_class())
        .expect("fresh registry");
    registry
        .register_class(tcp_ip_class(network))
        .expect("fresh registry");
    registry
        .register_class(ethernet_link_class(network))
        .expect("fresh registry");
}

/// EPATH to the Ethernet Link instance, with a leading word count.
fn physical_link_path() -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u16(2).expect("tiny");
    w.put_bytes(&[0x20, ETHERNET_LINK_CLASS as u8, 0x24, 0x01])
        .expect("tiny");
    w.into_bytes()
}

/// TCP/IP attribute 5: ip, netmask, gateway, two name servers, domain name.
fn interface_config_blob(network: &NetworkConfig) -> Vec<u8> {
    let mut w = Writer::new();
    w.put_u32(u32::from(network.ip)).expect("tiny");
    w.put_u32(u32::from(network.netmask)).expect("tiny");
    w.put_u32(u32::from(network.gateway)).expect("tiny");
    w.put_u32(0).expect("tiny"); // name server
    w.put_u32(0).expect("tiny"); // name server 2
    Value::String(network.domain_name.clone())
        .encode(&mut w)
        .expect("bounded by config");
    if w.len() % 2 != 0 {
        w.put_u8(0).expect("tiny"); // pad to word
    }
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_set_registers_all_six() {
        let mut registry = ClassRegistry::new();
        register_standard_classes(
            &mut registry,
            &DeviceConfig::default(),
            &NetworkConfig::default(),
        );
        for class_id in [0x01, 0x02, 0x04, 0x06, 0xF5, 0xF6] {
            assert!(registry.class(class_id).is_some(), "class {class_id:#x}");
        }
    }

    #[test]
    fn test_identity_attributes() {
        let device = DeviceConfig {
            vendor_id: 0x1234,
            product_name: "widget".to_string(),
            ..Default::default()
        };
        let class = identity_class(&device);
        let instance = class.instance(1).unwrap();
        assert_eq!(
            instance.attribute(identity_attr::VENDOR_ID).unwrap().value,
            Value::Uint(0x1234)
        );
        assert_eq!(
            instance.attribute(identity_attr::PRODUCT_NAME).unwrap().value,
            Value::ShortString("widget".to_string())
        );
        assert!(class.supports_instance_service(services::RESET));
    }

    #[test]
    fn test_ethernet_link_mac() {
        let network = NetworkConfig {
            mac: [1, 2, 3, 4, 5, 6],
            ..Default::default()
        };
        let class = ethernet_link_class(&network);
        assert_eq!(
            class.instance(1).unwrap().attribute(3).unwrap().value,
            Value::UsintArray(vec![1, 2, 3, 4, 5, 6])
        );
    }

    #[test]
    fn test_interface_config_blob_word_aligned() {
        let network = NetworkConfig {
            domain_name: "odd".to_string(),
            ..Default::default()
        };
        assert_eq!(interface_config_blob(&network).len() % 2, 0);
    }
}
