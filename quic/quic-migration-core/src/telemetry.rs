// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget observability hooks. Presence or absence of either
//! collaborator here MUST NOT affect the manager's control flow — that
//! invariant is why both are plain traits with default no-op methods
//! rather than something the manager branches on.

use crate::{
    migration::{MigrationCause, MigrationStatus, ProbingResult},
    network::NetworkHandle,
};

/// A thin interface over the host process's metrics sink. The manager
/// records counters and histograms through this instead of calling global
/// histogram macros directly.
pub trait Telemetry {
    fn record_network_connected(&mut self, _network: NetworkHandle) {}
    fn record_network_disconnected(&mut self, _network: NetworkHandle) {}
    fn record_network_made_default(&mut self, _network: NetworkHandle) {}
    fn record_migration_attempted(&mut self, _cause: MigrationCause) {}
    fn record_migration_status(&mut self, _cause: MigrationCause, _status: MigrationStatus) {}
    fn record_probing_result(&mut self, _cause: MigrationCause, _result: ProbingResult) {}
    fn record_migrate_back_retry(&mut self, _attempt: u32) {}
}

/// A single-method notification hook for every significant migration
/// decision. Optional: the manager is constructed with `Option<Box<dyn
/// MigrationDebugVisitor>>` and every call site already tolerates `None`.
pub trait MigrationDebugVisitor {
    fn on_network_connected(&mut self, _network: NetworkHandle) {}
    fn on_network_disconnected(&mut self, _network: NetworkHandle) {}
    fn on_network_made_default(&mut self, _network: NetworkHandle) {}
    fn on_migration_started(&mut self, _cause: MigrationCause, _target: NetworkHandle) {}
    fn on_migration_succeeded(&mut self, _cause: MigrationCause) {}
    fn on_migration_failed(&mut self, _cause: MigrationCause, _status: MigrationStatus, _reason: &str) {}
    fn on_probe_result(&mut self, _cause: MigrationCause, _result: ProbingResult) {}
    fn on_wait_for_new_network(&mut self, _waiting: bool) {}
    fn on_migrate_back_retry(&mut self, _attempt: u32) {}
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    /// A single recorded telemetry/debug-visitor event, flattened into one
    /// enum so tests can assert on an ordered event log.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Event {
        NetworkConnected(NetworkHandle),
        NetworkDisconnected(NetworkHandle),
        NetworkMadeDefault(NetworkHandle),
        MigrationAttempted(MigrationCause),
        MigrationStatus(MigrationCause, MigrationStatus),
        ProbingResult(MigrationCause, ProbingResult),
        MigrateBackRetry(u32),
    }

    /// Records every call it receives, in order, for assertion in tests.
    #[derive(Default)]
    pub struct RecordingTelemetry {
        pub events: Vec<Event>,
    }

    impl Telemetry for RecordingTelemetry {
        fn record_network_connected(&mut self, network: NetworkHandle) {
            self.events.push(Event::NetworkConnected(network));
        }

        fn record_network_disconnected(&mut self, network: NetworkHandle) {
            self.events.push(Event::NetworkDisconnected(network));
        }

        fn record_network_made_default(&mut self, network: NetworkHandle) {
            self.events.push(Event::NetworkMadeDefault(network));
        }

        fn record_migration_attempted(&mut self, cause: MigrationCause) {
            self.events.push(Event::MigrationAttempted(cause));
        }

        fn record_migration_status(&mut self, cause: MigrationCause, status: MigrationStatus) {
            self.events.push(Event::MigrationStatus(cause, status));
        }

        fn record_probing_result(&mut self, cause: MigrationCause, result: ProbingResult) {
            self.events.push(Event::ProbingResult(cause, result));
        }

        fn record_migrate_back_retry(&mut self, attempt: u32) {
            self.events.push(Event::MigrateBackRetry(attempt));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn recording_telemetry_preserves_call_order() {
        let mut telemetry = RecordingTelemetry::default();
        telemetry.record_network_connected(NetworkHandle::new(1));
        telemetry.record_migration_status(MigrationCause::OnWriteError, MigrationStatus::Success);
        assert_eq!(
            telemetry.events,
            vec![
                Event::NetworkConnected(NetworkHandle::new(1)),
                Event::MigrationStatus(MigrationCause::OnWriteError, MigrationStatus::Success),
            ]
        );
    }
}
