// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! EPATH segment encoding and decoding
//!
//! Padded EPATHs address classes, instances, attributes and connection
//! points. A Forward-Open connection path may additionally carry an
//! electronic key, port segments, a production-inhibit network segment and
//! a trailing simple data segment with configuration bytes.

use crate::codec::{Reader, Writer};
use crate::error::CodecError;

// Segment header bytes, padded (even) forms.
const SEG_CLASS_8: u8 = 0x20;
const SEG_CLASS_16: u8 = 0x21;
const SEG_INSTANCE_8: u8 = 0x24;
const SEG_INSTANCE_16: u8 = 0x25;
const SEG_CONN_POINT_8: u8 = 0x2C;
const SEG_CONN_POINT_16: u8 = 0x2D;
const SEG_ATTRIBUTE_8: u8 = 0x30;
const SEG_ATTRIBUTE_16: u8 = 0x31;
const SEG_ELECTRONIC_KEY: u8 = 0x34;
const SEG_NETWORK_INHIBIT: u8 = 0x43;
const SEG_SIMPLE_DATA: u8 = 0x80;

const KEY_FORMAT: u8 = 0x04;

/// One application path: a class plus an instance or connection point,
/// optionally narrowed to an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppPath {
    pub class: u16,
    pub instance: Option<u16>,
    pub conn_point: Option<u16>,
    pub attribute: Option<u16>,
}

impl AppPath {
    pub fn new(class: u16, instance: u16) -> Self {
        Self {
            class,
            instance: Some(instance),
            ..Default::default()
        }
    }

    pub fn with_attribute(class: u16, instance: u16, attribute: u16) -> Self {
        Self {
            class,
            instance: Some(instance),
            conn_point: None,
            attribute: Some(attribute),
        }
    }

    /// The instance, or failing that the connection point. Connection paths
    /// may address an assembly either way.
    pub fn instance_or_conn_point(&self) -> Option<u16> {
        self.instance.or(self.conn_point)
    }

    /// True if any addressing segment was present.
    pub fn has_any(&self) -> bool {
        self.instance.is_some() || self.conn_point.is_some() || self.attribute.is_some()
    }

    /// Serialize as a padded EPATH, 8-bit forms where the value allows.
    pub fn encode(&self, out: &mut Writer) -> Result<(), CodecError> {
        write_logical(out, SEG_CLASS_8, self.class)?;
        if let Some(instance) = self.instance {
            write_logical(out, SEG_INSTANCE_8, instance)?;
        }
        if let Some(cp) = self.conn_point {
            write_logical(out, SEG_CONN_POINT_8, cp)?;
        }
        if let Some(attribute) = self.attribute {
            write_logical(out, SEG_ATTRIBUTE_8, attribute)?;
        }
        Ok(())
    }
}

fn write_logical(out: &mut Writer, base: u8, value: u16) -> Result<(), CodecError> {
    if value <= 0xFF {
        out.put_u8(base)?;
        out.put_u8(value as u8)
    } else {
        out.put_u8(base | 0x01)?;
        out.put_u8(0)?; // pad
        out.put_u16(value)
    }
}

fn read_logical_value(input: &mut Reader, header: u8) -> Result<u16, CodecError> {
    if header & 0x01 == 0 {
        Ok(u16::from(input.get_u8()?))
    } else {
        input.skip(1)?; // pad
        input.get_u16()
    }
}

/// Electronic key segment contents (format 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectronicKey {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub major_revision: u8,
    /// Compatibility bit from the major-revision byte: accept any device
    /// able to emulate the keyed revision.
    pub compatibility: bool,
    pub minor_revision: u8,
}

impl ElectronicKey {
    pub fn encode(&self, out: &mut Writer) -> Result<(), CodecError> {
        out.put_u8(SEG_ELECTRONIC_KEY)?;
        out.put_u8(KEY_FORMAT)?;
        out.put_u16(self.vendor_id)?;
        out.put_u16(self.device_type)?;
        out.put_u16(self.product_code)?;
        out.put_u8(self.major_revision | if self.compatibility { 0x80 } else { 0 })?;
        out.put_u8(self.minor_revision)
    }

    fn decode(input: &mut Reader) -> Result<Self, CodecError> {
        let format = input.get_u8()?;
        if format != KEY_FORMAT {
            return Err(CodecError::BadSegment(format));
        }
        let vendor_id = input.get_u16()?;
        let device_type = input.get_u16()?;
        let product_code = input.get_u16()?;
        let major = input.get_u8()?;
        let minor_revision = input.get_u8()?;
        Ok(Self {
            vendor_id,
            device_type,
            product_code,
            major_revision: major & 0x7F,
            compatibility: major & 0x80 != 0,
            minor_revision,
        })
    }
}

/// A fully decoded Forward-Open connection path.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPath {
    pub key: Option<ElectronicKey>,
    /// Application paths in wire order (config, consuming, producing when
    /// all three are present).
    pub app_paths: Vec<AppPath>,
    /// Bytes of a trailing simple data segment, if any.
    pub config_data: Vec<u8>,
    /// Production inhibit time from a network segment, milliseconds.
    pub production_inhibit_ms: Option<u8>,
}

/// Parse exactly `byte_len` bytes of padded connection path.
///
/// Grouping rule: a class segment opens a new application path context;
/// every instance or connection-point segment closes one application path
/// inheriting the current class; an attribute segment narrows the path it
/// follows. Port segments (unconnected routing hops) are skipped.
pub fn parse_connection_path(
    input: &mut Reader,
    byte_len: usize,
) -> Result<ConnectionPath, CodecError> {
    if input.remaining() < byte_len {
        return Err(CodecError::Underflow {
            needed: byte_len,
            remaining: input.remaining(),
        });
    }
    let end = input.position() + byte_len;
    let mut path = ConnectionPath::default();
    let mut current_class: Option<u16> = None;

    while input.position() < end {
        let header = input.get_u8()?;
        match header {
            SEG_ELECTRONIC_KEY => {
                path.key = Some(ElectronicKey::decode(input)?);
            }
            SEG_CLASS_8 | SEG_CLASS_16 => {
                current_class = Some(read_logical_value(input, header)?);
            }
            SEG_INSTANCE_8 | SEG_INSTANCE_16 => {
                let class = current_class.ok_or(CodecError::BadSegment(header))?;
                let value = read_logical_value(input, header)?;
                path.app_paths.push(AppPath {
                    class,
                    instance: Some(value),
                    conn_point: None,
                    attribute: None,
                });
            }
            SEG_CONN_POINT_8 | SEG_CONN_POINT_16 => {
                let class = current_class.ok_or(CodecError::BadSegment(header))?;
                let value = read_logical_value(input, header)?;
                path.app_paths.push(AppPath {
                    class,
                    instance: None,
                    conn_point: Some(value),
                    attribute: None,
                });
            }
            SEG_ATTRIBUTE_8 | SEG_ATTRIBUTE_16 => {
                let value = read_logical_value(input, header)?;
                match path.app_paths.last_mut() {
                    Some(last) => last.attribute = Some(value),
                    None => return Err(CodecError::BadSegment(header)),
                }
            }
            SEG_NETWORK_INHIBIT => {
                path.production_inhibit_ms = Some(input.get_u8()?);
            }
            SEG_SIMPLE_DATA => {
                let words = input.get_u8()? as usize;
                path.config_data = input.get_bytes(words * 2)?.to_vec();
            }
            // Port segment: low nibble is the port, bit 4 selects an
            // extended link address (u8 size, padded to even length).
            h if h & 0xE0 == 0x00 => {
                if h & 0x10 != 0 {
                    let size = input.get_u8()? as usize;
                    let padded = size + (size & 1);
                    input.skip(padded)?;
                } else {
                    input.skip(1)?;
                }
            }
            other => return Err(CodecError::BadSegment(other)),
        }
    }

    if input.position() != end {
        return Err(CodecError::BadSegment(0));
    }
    Ok(path)
}

/// Parse a Message Router request path of `words` 16-bit words: class,
/// then optional instance / connection point / attribute.
pub fn parse_request_path(input: &mut Reader, words: u8) -> Result<AppPath, CodecError> {
    let parsed = parse_connection_path(input, usize::from(words) * 2)?;
    match parsed.app_paths.first() {
        Some(first) => Ok(*first),
        None => Err(CodecError::BadSegment(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_path(paths: &[AppPath]) -> Vec<u8> {
        let mut w = Writer::new();
        for p in paths {
            p.encode(&mut w).unwrap();
        }
        w.into_bytes()
    }

    #[test]
    fn test_request_path_class_instance_attribute() {
        let bytes = encode_path(&[AppPath::with_attribute(0x01, 1, 7)]);
        assert_eq!(bytes, vec![0x20, 0x01, 0x24, 0x01, 0x30, 0x07]);

        let mut r = Reader::new(&bytes);
        let path = parse_request_path(&mut r, 3).unwrap();
        assert_eq!(path.class, 0x01);
        assert_eq!(path.instance, Some(1));
        assert_eq!(path.attribute, Some(7));
    }

    #[test]
    fn test_16_bit_logical_forms() {
        let bytes = encode_path(&[AppPath::new(0x04, 0x0301)]);
        assert_eq!(bytes, vec![0x20, 0x04, 0x25, 0x00, 0x01, 0x03]);

        let mut r = Reader::new(&bytes);
        let path = parse_request_path(&mut r, 3).unwrap();
        assert_eq!(path.instance, Some(0x0301));
    }

    #[test]
    fn test_connection_path_three_assemblies() {
        // class 4 once, then config / consuming / producing connection points
        let bytes = vec![0x20, 0x04, 0x24, 151, 0x2C, 150, 0x2C, 100];
        let mut r = Reader::new(&bytes);
        let path = parse_connection_path(&mut r, bytes.len()).unwrap();

        assert_eq!(path.app_paths.len(), 3);
        for p in &path.app_paths {
            assert_eq!(p.class, 0x04);
        }
        assert_eq!(path.app_paths[0].instance_or_conn_point(), Some(151));
        assert_eq!(path.app_paths[1].instance_or_conn_point(), Some(150));
        assert_eq!(path.app_paths[2].instance_or_conn_point(), Some(100));
    }

    #[test]
    fn test_electronic_key_roundtrip() {
        let key = ElectronicKey {
            vendor_id: 0x1234,
            device_type: 0x000C,
            product_code: 0x0042,
            major_revision: 1,
            compatibility: true,
            minor_revision: 3,
        };
        let mut w = Writer::new();
        key.encode(&mut w).unwrap();
        let mut tail = vec![0x20, 0x04, 0x2C, 150, 0x2C, 100];
        let mut bytes = w.into_bytes();
        bytes.append(&mut tail);

        let mut r = Reader::new(&bytes);
        let path = parse_connection_path(&mut r, bytes.len()).unwrap();
        assert_eq!(path.key, Some(key));
        assert_eq!(path.app_paths.len(), 2);
    }

    #[test]
    fn test_simple_data_segment_carries_config() {
        let bytes = vec![0x20, 0x04, 0x24, 151, 0x2C, 150, 0x2C, 100, 0x80, 0x02, 1, 2, 3, 4];
        let mut r = Reader::new(&bytes);
        let path = parse_connection_path(&mut r, bytes.len()).unwrap();
        assert_eq!(path.config_data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_port_segments_are_skipped() {
        // port 1, link 0; then class 2 instance 1
        let bytes = vec![0x01, 0x00, 0x20, 0x02, 0x24, 0x01];
        let mut r = Reader::new(&bytes);
        let path = parse_connection_path(&mut r, bytes.len()).unwrap();
        assert_eq!(path.app_paths.len(), 1);
        assert_eq!(path.app_paths[0].class, 0x02);
    }

    #[test]
    fn test_truncated_path_is_underflow() {
        let bytes = vec![0x20, 0x04, 0x24];
        let mut r = Reader::new(&bytes);
        assert!(parse_connection_path(&mut r, 4).is_err());
    }

    #[test]
    fn test_unknown_segment_rejected() {
        let bytes = vec![0x91, 0x02, b'a', b'b'];
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            parse_connection_path(&mut r, bytes.len()),
            Err(CodecError::BadSegment(0x91))
        ));
    }
}
