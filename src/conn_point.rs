// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present EIPA Contributors

//! Connection-point configuration and ownership arbitration
//!
//! The application registers (output, input, config) assembly triples before
//! runtime, in three flavors with distinct matching rules. A Forward-Open's
//! application paths are matched against these tables in a fixed order:
//! exclusive owner first, then input only, then listen only; the first
//! table that recognizes the output assembly decides, and its specific
//! rejection wins over any later table.

use crate::config::ConnectionLimits;
use crate::connection::{ConnInstanceType, ConnectionTable};
use crate::error::ConnMgrStatus;

/// One registered triple. `config: None` means the config path may be
/// omitted by the originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnPointTriple {
    pub output_assembly: u16,
    pub input_assembly: u16,
    pub config_assembly: Option<u16>,
}

/// The three configuration tables. Triples are immutable once registered.
#[derive(Debug)]
pub struct ConnPoints {
    exclusive_owner: Vec<ConnPointTriple>,
    input_only: Vec<ConnPointTriple>,
    listen_only: Vec<ConnPointTriple>,
    limits: ConnectionLimits,
}

/// What a successful match selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoPathSelection {
    pub instance_type: ConnInstanceType,
    pub triple: ConnPointTriple,
}

/// The application paths extracted from a Forward-Open, as the matcher
/// sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoPathRequest {
    pub consuming_point: u16,
    pub producing_point: u16,
    pub config_point: Option<u16>,
    pub t_to_o_multicast: bool,
}

impl ConnPoints {
    pub fn new(limits: ConnectionLimits) -> Self {
        Self {
            exclusive_owner: Vec::new(),
            input_only: Vec::new(),
            listen_only: Vec::new(),
            limits,
        }
    }

    /// Register an exclusive-owner connection point. Returns false when the
    /// configured table is full.
    pub fn configure_exclusive_owner(
        &mut self,
        output_assembly: u16,
        input_assembly: u16,
        config_assembly: Option<u16>,
    ) -> bool {
        if self.exclusive_owner.len() >= self.limits.exclusive_owner_points {
            return false;
        }
        self.exclusive_owner.push(ConnPointTriple {
            output_assembly,
            input_assembly,
            config_assembly,
        });
        true
    }

    pub fn configure_input_only(
        &mut self,
        output_assembly: u16,
        input_assembly: u16,
        config_assembly: Option<u16>,
    ) -> bool {
        if self.input_only.len() >= self.limits.input_only_points {
            return false;
        }
        self.input_only.push(ConnPointTriple {
            output_assembly,
            input_assembly,
            config_assembly,
        });
        true
    }

    pub fn configure_listen_only(
        &mut self,
        output_assembly: u16,
        input_assembly: u16,
        config_assembly: Option<u16>,
    ) -> bool {
        if self.listen_only.len() >= self.limits.listen_only_points {
            return false;
        }
        self.listen_only.push(ConnPointTriple {
            output_assembly,
            input_assembly,
            config_assembly,
        });
        true
    }

    pub fn limits(&self) -> &ConnectionLimits {
        &self.limits
    }

    /// Match a Forward-Open against the three tables.
    ///
    /// Each table either produces a selection, produces a specific
    /// rejection that stops the search, or passes. A request that no table
    /// recognizes at all is rejected as an inconsistent application path
    /// combination.
    // TODO recheck that fall-through status against the ODVA conformance suite
    pub fn select(
        &self,
        table: &ConnectionTable,
        request: &IoPathRequest,
    ) -> Result<IoPathSelection, ConnMgrStatus> {
        if let Some(outcome) = self.select_exclusive_owner(table, request) {
            return outcome;
        }
        if let Some(outcome) = self.select_input_only(table, request) {
            return outcome;
        }
        if let Some(outcome) = self.select_listen_only(table, request) {
            return outcome;
        }
        Err(ConnMgrStatus::InconsistentApplicationPathCombo)
    }

    fn select_exclusive_owner(
        &self,
        table: &ConnectionTable,
        request: &IoPathRequest,
    ) -> Option<Result<IoPathSelection, ConnMgrStatus>> {
        for triple in &self.exclusive_owner {
            if triple.output_assembly == request.consuming_point
                && triple.input_assembly == request.producing_point
                && triple.config_assembly == request.config_point
            {
                // one owner per output assembly, across all triples
                if table.output_assembly_in_use(request.consuming_point) {
                    return Some(Err(ConnMgrStatus::OwnershipConflict));
                }
                return Some(Ok(IoPathSelection {
                    instance_type: ConnInstanceType::IoExclusiveOwner,
                    triple: *triple,
                }));
            }
        }
        None
    }

    fn select_input_only(
        &self,
        table: &ConnectionTable,
        request: &IoPathRequest,
    ) -> Option<Result<IoPathSelection, ConnMgrStatus>> {
        for triple in &self.input_only {
            if triple.output_assembly != request.consuming_point {
                continue;
            }
            if triple.input_assembly != request.producing_point {
                return Some(Err(ConnMgrStatus::InvalidProducingApplicationPath));
            }
            if triple.config_assembly != request.config_point {
                return Some(Err(ConnMgrStatus::InconsistentApplicationPathCombo));
            }
            let in_use = table.slots_in_use(ConnInstanceType::IoInputOnly, triple.output_assembly);
            if in_use >= self.limits.input_only_slots_per_point {
                return Some(Err(ConnMgrStatus::TargetObjectOutOfConnections));
            }
            return Some(Ok(IoPathSelection {
                instance_type: ConnInstanceType::IoInputOnly,
                triple: *triple,
            }));
        }
        None
    }

    fn select_listen_only(
        &self,
        table: &ConnectionTable,
        request: &IoPathRequest,
    ) -> Option<Result<IoPathSelection, ConnMgrStatus>> {
        // a listen-only connection has to be a multicast connection
        if !request.t_to_o_multicast {
            return Some(Err(ConnMgrStatus::NonListenOnlyConnectionNotOpened));
        }
        for triple in &self.listen_only {
            if triple.output_assembly != request.consuming_point {
                continue;
            }
            if triple.input_assembly != request.producing_point {
                return Some(Err(ConnMgrStatus::InvalidProducingApplicationPath));
            }
            if triple.config_assembly != request.config_point {
                return Some(Err(ConnMgrStatus::InconsistentApplicationPathCombo));
            }
            if table
                .multicast_producer_master(triple.input_assembly)
                .is_none()
            {
                return Some(Err(ConnMgrStatus::NonListenOnlyConnectionNotOpened));
            }
            let in_use = table.slots_in_use(ConnInstanceType::IoListenOnly, triple.output_assembly);
            if in_use >= self.limits.listen_only_slots_per_point {
                return Some(Err(ConnMgrStatus::TargetObjectOutOfConnections));
            }
            return Some(Ok(IoPathSelection {
                instance_type: ConnInstanceType::IoListenOnly,
                triple: *triple,
            }));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnState, IoConnType};

    fn points() -> ConnPoints {
        let mut points = ConnPoints::new(ConnectionLimits::default());
        assert!(points.configure_exclusive_owner(150, 100, Some(151)));
        assert!(points.configure_input_only(152, 100, Some(151)));
        assert!(points.configure_listen_only(153, 100, Some(151)));
        points
    }

    fn request(consuming: u16, producing: u16, config: Option<u16>) -> IoPathRequest {
        IoPathRequest {
            consuming_point: consuming,
            producing_point: producing,
            config_point: config,
            t_to_o_multicast: false,
        }
    }

    fn empty_table() -> ConnectionTable {
        ConnectionTable::with_capacity(8)
    }

    fn established(instance_type: ConnInstanceType, consuming: u16, producing: u16) -> crate::connection::CipConn {
        let mut conn = crate::connection::tests::test_conn();
        conn.instance_type = instance_type;
        conn.consuming_point = consuming;
        conn.producing_point = producing;
        conn.state = ConnState::Established;
        conn
    }

    #[test]
    fn test_exclusive_owner_match() {
        let points = points();
        let selection = points
            .select(&empty_table(), &request(150, 100, Some(151)))
            .unwrap();
        assert_eq!(selection.instance_type, ConnInstanceType::IoExclusiveOwner);
        assert_eq!(selection.triple.output_assembly, 150);
    }

    #[test]
    fn test_ownership_conflict() {
        let points = points();
        let mut table = empty_table();
        table
            .insert(established(ConnInstanceType::IoExclusiveOwner, 150, 100))
            .unwrap();
        assert_eq!(
            points.select(&table, &request(150, 100, Some(151))),
            Err(ConnMgrStatus::OwnershipConflict)
        );
    }

    #[test]
    fn test_unregistered_triple_is_inconsistent_combo() {
        let points = points();
        assert_eq!(
            points.select(&empty_table(), &request(42, 43, Some(44))),
            Err(ConnMgrStatus::NonListenOnlyConnectionNotOpened)
        );
        // multicast variant falls through all tables instead
        let mut req = request(42, 43, Some(44));
        req.t_to_o_multicast = true;
        assert_eq!(
            points.select(&empty_table(), &req),
            Err(ConnMgrStatus::InconsistentApplicationPathCombo)
        );
    }

    #[test]
    fn test_absent_config_only_matches_optional_config_triple() {
        let mut points = points();
        let mut req = request(150, 100, None);
        req.t_to_o_multicast = true;
        // registered triple demands config 151
        assert_eq!(
            points.select(&empty_table(), &req),
            Err(ConnMgrStatus::InconsistentApplicationPathCombo)
        );

        // a second triple registered with optional config accepts it
        assert!(points.configure_exclusive_owner(150, 100, None));
        let selection = points.select(&empty_table(), &req).unwrap();
        assert_eq!(selection.triple.config_assembly, None);
    }

    #[test]
    fn test_input_only_producing_path_mismatch() {
        let points = points();
        assert_eq!(
            points.select(&empty_table(), &request(152, 99, Some(151))),
            Err(ConnMgrStatus::InvalidProducingApplicationPath)
        );
    }

    #[test]
    fn test_input_only_slots_exhausted() {
        let limits = ConnectionLimits {
            input_only_slots_per_point: 1,
            ..Default::default()
        };
        let mut points = ConnPoints::new(limits);
        points.configure_input_only(152, 100, Some(151));

        let mut table = empty_table();
        table
            .insert(established(ConnInstanceType::IoInputOnly, 152, 100))
            .unwrap();
        assert_eq!(
            points.select(&table, &request(152, 100, Some(151))),
            Err(ConnMgrStatus::TargetObjectOutOfConnections)
        );
    }

    #[test]
    fn test_listen_only_requires_running_producer() {
        let points = points();
        let mut req = request(153, 100, Some(151));
        req.t_to_o_multicast = true;
        assert_eq!(
            points.select(&empty_table(), &req),
            Err(ConnMgrStatus::NonListenOnlyConnectionNotOpened)
        );

        // with a multicast master producing assembly 100 the match succeeds
        let mut table = empty_table();
        let mut master = established(ConnInstanceType::IoExclusiveOwner, 150, 100);
        master.t_to_o = crate::connection::NetConnParams::from_word(0x2000 | 130);
        assert_eq!(master.t_to_o.conn_type, IoConnType::Multicast);
        table.insert(master).unwrap();

        let selection = points.select(&table, &req).unwrap();
        assert_eq!(selection.instance_type, ConnInstanceType::IoListenOnly);
    }

    #[test]
    fn test_configure_respects_limits() {
        let limits = ConnectionLimits {
            exclusive_owner_points: 1,
            ..Default::default()
        };
        let mut points = ConnPoints::new(limits);
        assert!(points.configure_exclusive_owner(150, 100, Some(151)));
        assert!(!points.configure_exclusive_owner(160, 101, Some(161)));
    }
}
