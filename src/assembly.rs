// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Assembly object layer (class 0x04)
//!
//! An assembly is a CIP instance whose attribute 3 is a contiguous byte
//! buffer used as the I/O payload surface. Buffer length is fixed at
//! creation and outlives every connection that binds to it. A length-zero
//! assembly is the heartbeat form consumed by input-only and listen-only
//! connections.

use std::collections::BTreeMap;

use crate::codec::Value;
use crate::error::{AssemblyError, RegistryError};
use crate::registry::{CipAttribute, ClassRegistry};

pub const ASSEMBLY_CLASS: u16 = 0x04;
/// Attribute holding the data buffer.
pub const ASSEMBLY_DATA_ATTRIBUTE: u16 = 3;
/// Attribute holding the buffer byte count.
pub const ASSEMBLY_SIZE_ATTRIBUTE: u16 = 4;

/// One assembly instance and its buffer.
#[derive(Debug)]
pub struct Assembly {
    pub instance_id: u16,
    data: Vec<u8>,
}

impl Assembly {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Pool of all assembly buffers, keyed by instance id. The stack borrows
/// buffers per operation; the pool (and through it the application, which
/// reads and writes the buffers inside its callbacks) owns them.
#[derive(Debug, Default)]
pub struct Assemblies {
    map: BTreeMap<u16, Assembly>,
}

impl Assemblies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembly instance holding `data`, registering the matching
    /// class-4 instance. An empty `data` creates a heartbeat assembly.
    pub fn create(
        &mut self,
        registry: &mut ClassRegistry,
        instance_id: u16,
        data: Vec<u8>,
    ) -> Result<(), AssemblyError> {
        if self.map.contains_key(&instance_id) {
            return Err(AssemblyError::AlreadyExists(instance_id));
        }
        let class = registry
            .class_mut(ASSEMBLY_CLASS)
            .ok_or(AssemblyError::NotFound(instance_id))?;
        let instance = match class.create_instance(instance_id) {
            Ok(instance) => instance,
            Err(RegistryError::DuplicateInstance(_, _)) => {
                return Err(AssemblyError::AlreadyExists(instance_id))
            }
            Err(_) => return Err(AssemblyError::NotFound(instance_id)),
        };
        instance.insert_attribute(CipAttribute::read_only(
            ASSEMBLY_SIZE_ATTRIBUTE,
            Value::Uint(data.len() as u16),
        ));

        self.map.insert(instance_id, Assembly { instance_id, data });
        Ok(())
    }

    pub fn get(&self, instance_id: u16) -> Option<&Assembly> {
        self.map.get(&instance_id)
    }

    pub fn get_mut(&mut self, instance_id: u16) -> Option<&mut Assembly> {
        self.map.get_mut(&instance_id)
    }

    pub fn contains(&self, instance_id: u16) -> bool {
        self.map.contains_key(&instance_id)
    }

    /// Buffer length; `NotFound` for an unknown instance.
    pub fn len_of(&self, instance_id: u16) -> Result<usize, AssemblyError> {
        self.get(instance_id)
            .map(Assembly::len)
            .ok_or(AssemblyError::NotFound(instance_id))
    }

    /// Length-checked full-buffer overwrite.
    pub fn write(&mut self, instance_id: u16, bytes: &[u8]) -> Result<(), AssemblyError> {
        let assembly = self
            .map
            .get_mut(&instance_id)
            .ok_or(AssemblyError::NotFound(instance_id))?;
        if bytes.len() != assembly.len() {
            return Err(AssemblyError::LengthMismatch {
                expected: assembly.len(),
                got: bytes.len(),
            });
        }
        assembly.data.copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects;

    fn registry_with_assembly_class() -> ClassRegistry {
        let mut registry = ClassRegistry::new();
        registry.register_class(objects::assembly_class()).unwrap();
        registry
    }

    #[test]
    fn test_create_and_write() {
        let mut registry = registry_with_assembly_class();
        let mut assemblies = Assemblies::new();
        assemblies.create(&mut registry, 100, vec![0; 4]).unwrap();

        assemblies.write(100, &[1, 2, 3, 4]).unwrap();
        assert_eq!(assemblies.get(100).unwrap().data(), &[1, 2, 3, 4]);

        // buffer length is constant after creation
        assert_eq!(
            assemblies.write(100, &[1, 2, 3]),
            Err(AssemblyError::LengthMismatch {
                expected: 4,
                got: 3
            })
        );
        assert_eq!(assemblies.len_of(100), Ok(4));
    }

    #[test]
    fn test_duplicate_assembly_rejected() {
        let mut registry = registry_with_assembly_class();
        let mut assemblies = Assemblies::new();
        assemblies.create(&mut registry, 100, vec![0; 4]).unwrap();
        assert_eq!(
            assemblies.create(&mut registry, 100, vec![0; 4]),
            Err(AssemblyError::AlreadyExists(100))
        );
    }

    #[test]
    fn test_heartbeat_assembly() {
        let mut registry = registry_with_assembly_class();
        let mut assemblies = Assemblies::new();
        assemblies.create(&mut registry, 152, Vec::new()).unwrap();

        assert!(assemblies.get(152).unwrap().is_heartbeat());
        assemblies.write(152, &[]).unwrap();
    }

    #[test]
    fn test_registry_instance_carries_size_attribute() {
        let mut registry = registry_with_assembly_class();
        let mut assemblies = Assemblies::new();
        assemblies.create(&mut registry, 100, vec![0; 128]).unwrap();

        let instance = registry.instance(ASSEMBLY_CLASS, 100).unwrap();
        assert_eq!(
            instance.attribute(ASSEMBLY_SIZE_ATTRIBUTE).unwrap().value,
            Value::Uint(128)
        );
    }
}
