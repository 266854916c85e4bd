// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Configuration for an adapter instance
//!
//! Supports both command-line arguments and TOML configuration files; the
//! application supplies the full configuration on every boot, nothing is
//! persisted by the stack. Covers device identity (what the Identity object
//! and ListIdentity report), network parameters (what the TCP/IP Interface
//! and Ethernet Link objects report) and stack limits.

use clap::Parser;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::error::EipError;

/// Identity of the device as reported over CIP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub revision_major: u8,
    pub revision_minor: u8,
    pub serial_number: u32,
    pub product_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: 357,
            device_type: 0x000C, // communications adapter
            product_code: 100,
            revision_major: 1,
            revision_minor: 1,
            serial_number: 0x0060_0001,
            product_name: "EIPA adapter".to_string(),
        }
    }
}

/// Network interface parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: [u8; 6],
    pub host_name: String,
    pub domain_name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip: Ipv4Addr::new(192, 168, 0, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 0, 1),
            mac: [0, 0, 0, 0, 0, 0],
            host_name: "eipa".to_string(),
            domain_name: String::new(),
        }
    }
}

impl NetworkConfig {
    /// The device's I/O multicast group, derived from the host part of its
    /// IP address inside the CIP range 239.192.0.0/14.
    pub fn multicast_address(&self) -> Ipv4Addr {
        let ip = u32::from(self.ip);
        let mask = u32::from(self.netmask);
        let host = ip & !mask;
        Ipv4Addr::from(0xEFC0_0100 | (host.wrapping_sub(1) & 0x3FF))
    }
}

/// Connection-slot bounds. Fixed at init; steady-state operation never
/// grows past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionLimits {
    pub exclusive_owner_points: usize,
    pub input_only_points: usize,
    pub listen_only_points: usize,
    pub input_only_slots_per_point: usize,
    pub listen_only_slots_per_point: usize,
    pub explicit_slots: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            exclusive_owner_points: 4,
            input_only_points: 4,
            listen_only_points: 4,
            input_only_slots_per_point: 3,
            listen_only_slots_per_point: 3,
            explicit_slots: 6,
        }
    }
}

impl ConnectionLimits {
    /// Upper bound of simultaneously live connection records.
    pub fn total_slots(&self) -> usize {
        self.exclusive_owner_points
            + self.input_only_points * self.input_only_slots_per_point
            + self.listen_only_points * self.listen_only_slots_per_point
            + self.explicit_slots
    }
}

/// Full adapter configuration handed to [`crate::stack::Stack::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub device: DeviceConfig,
    pub network: NetworkConfig,
    pub limits: ConnectionLimits,
    /// Timer tick period in microseconds; granularity of every connection
    /// timer. Defaults to 1 ms.
    pub tick_us: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            network: NetworkConfig::default(),
            limits: ConnectionLimits::default(),
            tick_us: DEFAULT_TICK_US,
        }
    }
}

impl AdapterConfig {
    pub fn new(device: DeviceConfig, network: NetworkConfig) -> Self {
        Self {
            device,
            network,
            ..Default::default()
        }
    }
}

pub const DEFAULT_TICK_US: u32 = 1_000;

/// Command-line arguments for the sample adapter binary.
#[derive(Parser, Debug)]
#[command(name = "eipa")]
#[command(author = "EIPA Contributors")]
#[command(version = "0.1.0")]
#[command(about = "EtherNet/IP adapter sample device", long_about = None)]
pub struct CliArgs {
    /// Path to a TOML configuration file (CLI flags override its values)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Device IP address
    #[arg(long, value_name = "ADDR")]
    pub ip: Option<Ipv4Addr>,

    /// Subnet mask
    #[arg(long, value_name = "MASK")]
    pub netmask: Option<Ipv4Addr>,

    /// Gateway address
    #[arg(long, value_name = "ADDR")]
    pub gateway: Option<Ipv4Addr>,

    /// MAC address, colon-separated (e.g. "00:15:c5:bf:d0:87")
    #[arg(long, value_name = "MAC")]
    pub mac: Option<String>,

    /// Host name
    #[arg(long, value_name = "NAME")]
    pub host_name: Option<String>,

    /// Domain name
    #[arg(long, value_name = "NAME")]
    pub domain_name: Option<String>,

    /// Device serial number
    #[arg(long, value_name = "SERIAL")]
    pub serial_number: Option<u32>,
}

/// TOML configuration file structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub device: TomlDevice,
    pub network: TomlNetwork,
    pub limits: ConnectionLimits,
    pub tick_us: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlDevice {
    pub vendor_id: Option<u16>,
    pub device_type: Option<u16>,
    pub product_code: Option<u16>,
    pub revision_major: Option<u8>,
    pub revision_minor: Option<u8>,
    pub serial_number: Option<u32>,
    pub product_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlNetwork {
    pub ip: Option<Ipv4Addr>,
    pub netmask: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
    pub mac: Option<String>,
    pub host_name: Option<String>,
    pub domain_name: Option<String>,
}

/// Parse a colon-separated MAC address string.
pub fn parse_mac(s: &str) -> Result<[u8; 6], EipError> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(EipError::Config(format!("invalid MAC address: {}", s)));
    }
    let mut mac = [0u8; 6];
    for (byte, part) in mac.iter_mut().zip(parts) {
        *byte = u8::from_str_radix(part, 16)
            .map_err(|_| EipError::Config(format!("invalid MAC address: {}", s)))?;
    }
    Ok(mac)
}

/// Resolve the effective configuration: defaults, overlaid by the TOML file
/// when given, overlaid by CLI flags.
pub fn resolve(args: &CliArgs) -> Result<AdapterConfig, EipError> {
    let mut config = AdapterConfig::default();

    if let Some(path) = &args.config {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EipError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let toml: TomlConfig = toml::from_str(&text)
            .map_err(|e| EipError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        apply_toml(&mut config, toml)?;
    }

    if let Some(ip) = args.ip {
        config.network.ip = ip;
    }
    if let Some(netmask) = args.netmask {
        config.network.netmask = netmask;
    }
    if let Some(gateway) = args.gateway {
        config.network.gateway = gateway;
    }
    if let Some(mac) = &args.mac {
        config.network.mac = parse_mac(mac)?;
    }
    if let Some(host_name) = &args.host_name {
        config.network.host_name = host_name.clone();
    }
    if let Some(domain_name) = &args.domain_name {
        config.network.domain_name = domain_name.clone();
    }
    if let Some(serial) = args.serial_number {
        config.device.serial_number = serial;
    }

    Ok(config)
}

fn apply_toml(config: &mut AdapterConfig, toml: TomlConfig) -> Result<(), EipError> {
    let d = toml.device;
    if let Some(v) = d.vendor_id {
        config.device.vendor_id = v;
    }
    if let Some(v) = d.device_type {
        config.device.device_type = v;
    }
    if let Some(v) = d.product_code {
        config.device.product_code = v;
    }
    if let Some(v) = d.revision_major {
        config.device.revision_major = v;
    }
    if let Some(v) = d.revision_minor {
        config.device.revision_minor = v;
    }
    if let Some(v) = d.serial_number {
        config.device.serial_number = v;
    }
    if let Some(v) = d.product_name {
        config.device.product_name = v;
    }

    let n = toml.network;
    if let Some(v) = n.ip {
        config.network.ip = v;
    }
    if let Some(v) = n.netmask {
        config.network.netmask = v;
    }
    if let Some(v) = n.gateway {
        config.network.gateway = v;
    }
    if let Some(v) = n.mac {
        config.network.mac = parse_mac(&v)?;
    }
    if let Some(v) = n.host_name {
        config.network.host_name = v;
    }
    if let Some(v) = n.domain_name {
        config.network.domain_name = v;
    }

    config.limits = toml.limits;
    if let Some(tick) = toml.tick_us {
        config.tick_us = tick;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mac() {
        assert_eq!(
            parse_mac("00:15:c5:bf:d0:87").unwrap(),
            [0x00, 0x15, 0xC5, 0xBF, 0xD0, 0x87]
        );
        assert!(parse_mac("00:15:c5").is_err());
        assert!(parse_mac("zz:15:c5:bf:d0:87").is_err());
    }

    #[test]
    fn test_multicast_address_derivation() {
        let network = NetworkConfig {
            ip: Ipv4Addr::new(192, 168, 0, 2),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            ..Default::default()
        };
        let mcast = network.multicast_address();
        assert!(mcast.is_multicast());
        assert_eq!(mcast, Ipv4Addr::new(239, 192, 1, 1));
    }

    #[test]
    fn test_toml_overlay() {
        let text = r#"
            tick_us = 500

            [device]
            vendor_id = 1234
            product_name = "widget"

            [network]
            ip = "10.0.0.9"
            mac = "02:00:00:00:00:01"

            [limits]
            explicit_slots = 2
        "#;
        let toml: TomlConfig = toml::from_str(text).unwrap();
        let mut config = AdapterConfig::default();
        apply_toml(&mut config, toml).unwrap();

        assert_eq!(config.device.vendor_id, 1234);
        assert_eq!(config.device.product_name, "widget");
        assert_eq!(config.network.ip, Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(config.network.mac, [2, 0, 0, 0, 0, 1]);
        assert_eq!(config.limits.explicit_slots, 2);
        assert_eq!(config.tick_us, 500);
        // untouched values keep their defaults
        assert_eq!(config.device.device_type, 0x000C);
    }

    #[test]
    fn test_total_slots() {
        let limits = ConnectionLimits::default();
        assert_eq!(limits.total_slots(), 4 + 12 + 12 + 6);
    }
}
