// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! CIP object registry
//!
//! Process-wide mapping from class id to [`CipClass`] and, within a class,
//! instance id to [`CipInstance`]. Registration is one-shot per class id.
//! Instance 0 addresses the class itself; its attributes (revision, max
//! instance, instance count) are derived rather than stored.

use std::collections::BTreeMap;

use crate::codec::Value;
use crate::error::RegistryError;

/// A single attribute: number, stored value and access bits.
#[derive(Debug, Clone)]
pub struct CipAttribute {
    pub id: u16,
    pub value: Value,
    pub gettable: bool,
    pub settable: bool,
}

impl CipAttribute {
    pub fn read_only(id: u16, value: Value) -> Self {
        Self {
            id,
            value,
            gettable: true,
            settable: false,
        }
    }

    pub fn read_write(id: u16, value: Value) -> Self {
        Self {
            id,
            value,
            gettable: true,
            settable: true,
        }
    }
}

/// A class member. Attributes are kept sorted by id so Get_Attributes_All
/// emits them in numeric order.
#[derive(Debug, Clone)]
pub struct CipInstance {
    pub id: u16,
    attributes: Vec<CipAttribute>,
}

impl CipInstance {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            attributes: Vec::new(),
        }
    }

    pub fn insert_attribute(&mut self, attribute: CipAttribute) {
        match self.attributes.binary_search_by_key(&attribute.id, |a| a.id) {
            Ok(at) => self.attributes[at] = attribute,
            Err(at) => self.attributes.insert(at, attribute),
        }
    }

    pub fn attribute(&self, id: u16) -> Option<&CipAttribute> {
        self.attributes
            .binary_search_by_key(&id, |a| a.id)
            .ok()
            .map(|at| &self.attributes[at])
    }

    pub fn attribute_mut(&mut self, id: u16) -> Option<&mut CipAttribute> {
        match self.attributes.binary_search_by_key(&id, |a| a.id) {
            Ok(at) => Some(&mut self.attributes[at]),
            Err(_) => None,
        }
    }

    pub fn attributes(&self) -> &[CipAttribute] {
        &self.attributes
    }
}

/// An object class: identity, service tables and its instances.
#[derive(Debug, Clone)]
pub struct CipClass {
    pub class_id: u16,
    pub name: &'static str,
    pub revision: u16,
    /// Service codes answered when addressed at an instance.
    pub instance_services: Vec<u8>,
    /// Service codes answered when addressed at instance 0.
    pub class_services: Vec<u8>,
    instances: BTreeMap<u16, CipInstance>,
}

impl CipClass {
    pub fn new(class_id: u16, name: &'static str, revision: u16) -> Self {
        Self {
            class_id,
            name,
            revision,
            instance_services: Vec::new(),
            class_services: Vec::new(),
            instances: BTreeMap::new(),
        }
    }

    pub fn create_instance(&mut self, instance_id: u16) -> Result<&mut CipInstance, RegistryError> {
        if self.instances.contains_key(&instance_id) {
            return Err(RegistryError::DuplicateInstance(self.class_id, instance_id));
        }
        Ok(self
            .instances
            .entry(instance_id)
            .or_insert_with(|| CipInstance::new(instance_id)))
    }

    pub fn instance(&self, instance_id: u16) -> Option<&CipInstance> {
        self.instances.get(&instance_id)
    }

    pub fn instance_mut(&mut self, instance_id: u16) -> Option<&mut CipInstance> {
        self.instances.get_mut(&instance_id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &CipInstance> {
        self.instances.values()
    }

    pub fn instance_count(&self) -> u16 {
        self.instances.len() as u16
    }

    pub fn max_instance(&self) -> u16 {
        self.instances.keys().next_back().copied().unwrap_or(0)
    }

    /// Derived instance-0 attribute values.
    pub fn class_attribute(&self, attribute_id: u16) -> Option<Value> {
        match attribute_id {
            1 => Some(Value::Uint(self.revision)),
            2 => Some(Value::Uint(self.max_instance())),
            3 => Some(Value::Uint(self.instance_count())),
            _ => None,
        }
    }

    pub fn supports_instance_service(&self, service: u8) -> bool {
        self.instance_services.contains(&service)
    }

    pub fn supports_class_service(&self, service: u8) -> bool {
        self.class_services.contains(&service)
    }
}

/// The registry itself. `BTreeMap` keeps both lookups logarithmic and the
/// iteration order deterministic.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: BTreeMap<u16, CipClass>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot registration; a duplicate class id fails.
    pub fn register_class(&mut self, class: CipClass) -> Result<(), RegistryError> {
        if self.classes.contains_key(&class.class_id) {
            return Err(RegistryError::DuplicateClass(class.class_id));
        }
        self.classes.insert(class.class_id, class);
        Ok(())
    }

    pub fn class(&self, class_id: u16) -> Option<&CipClass> {
        self.classes.get(&class_id)
    }

    pub fn class_mut(&mut self, class_id: u16) -> Option<&mut CipClass> {
        self.classes.get_mut(&class_id)
    }

    pub fn instance(&self, class_id: u16, instance_id: u16) -> Option<&CipInstance> {
        self.class(class_id)?.instance(instance_id)
    }

    pub fn instance_mut(&mut self, class_id: u16, instance_id: u16) -> Option<&mut CipInstance> {
        self.class_mut(class_id)?.instance_mut(instance_id)
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_class() -> CipClass {
        let mut class = CipClass::new(0x42, "test object", 1);
        class.instance_services = vec![0x0E, 0x10];
        class.class_services = vec![0x0E];
        class
    }

    #[test]
    fn test_duplicate_class_registration_fails() {
        let mut registry = ClassRegistry::new();
        registry.register_class(sample_class()).unwrap();
        assert_eq!(
            registry.register_class(sample_class()),
            Err(RegistryError::DuplicateClass(0x42))
        );
        assert_eq!(registry.class_count(), 1);
    }

    #[test]
    fn test_duplicate_instance_fails() {
        let mut class = sample_class();
        class.create_instance(1).unwrap();
        assert!(matches!(
            class.create_instance(1),
            Err(RegistryError::DuplicateInstance(0x42, 1))
        ));
    }

    #[test]
    fn test_attribute_insert_and_lookup() {
        let mut class = sample_class();
        let instance = class.create_instance(1).unwrap();
        instance.insert_attribute(CipAttribute::read_only(7, Value::Uint(55)));
        instance.insert_attribute(CipAttribute::read_write(3, Value::Usint(9)));

        // kept sorted by attribute number
        let ids: Vec<u16> = instance.attributes().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 7]);
        assert_eq!(instance.attribute(7).unwrap().value, Value::Uint(55));
        assert!(instance.attribute(7).unwrap().gettable);
        assert!(!instance.attribute(7).unwrap().settable);
        assert!(instance.attribute(4).is_none());
    }

    #[test]
    fn test_class_attributes_are_derived() {
        let mut class = sample_class();
        class.create_instance(3).unwrap();
        class.create_instance(9).unwrap();

        assert_eq!(class.class_attribute(1), Some(Value::Uint(1)));
        assert_eq!(class.class_attribute(2), Some(Value::Uint(9)));
        assert_eq!(class.class_attribute(3), Some(Value::Uint(2)));
        assert_eq!(class.class_attribute(4), None);
    }

    #[test]
    fn test_registry_instance_lookup() {
        let mut registry = ClassRegistry::new();
        let mut class = sample_class();
        class.create_instance(5).unwrap();
        registry.register_class(class).unwrap();

        assert!(registry.instance(0x42, 5).is_some());
        assert!(registry.instance(0x42, 6).is_none());
        assert!(registry.instance(0x43, 5).is_none());
    }
}
