// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;

/// Read-only migration policy for a session, fixed at construction time.
///
/// Mirrors the negotiated/experimental knobs a Chromium-style QUIC client
/// exposes for connection migration. Validate with [`MigrationConfig::validate`]
/// before handing a config to [`crate::migration::manager::MigrationManager`];
/// a violated invariant is a configuration bug, not a runtime condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Master enable. If false, no migration of any kind is attempted.
    pub migrate_session_on_network_change: bool,
    /// Probe and migrate off the current network as soon as it starts path
    /// degrading, instead of waiting for the platform's network-change
    /// signals. Requires `migrate_session_on_network_change`.
    pub migrate_session_early: bool,
    /// On path degrading, try a new local port on the same network before
    /// falling back to a full network migration.
    pub allow_port_migration: bool,
    /// Allow migrating sessions that currently have no open request streams.
    pub migrate_idle_session: bool,
    /// Maximum time since the last stream closed for which an idle session
    /// may still be migrated.
    pub idle_migration_period: Duration,
    /// Once migrated off the default network, how long to keep retrying to
    /// migrate back before giving up and draining the session.
    pub max_time_on_non_default_network: Duration,
    /// Cap on migrations to a non-default network triggered by write errors,
    /// reset every time the platform picks a new default network.
    pub max_migrations_to_non_default_network_on_write_error: u32,
    /// Cap on migrations to a non-default network triggered by path
    /// degrading, reset on the same schedule as the write-error cap.
    pub max_migrations_to_non_default_network_on_path_degrading: u32,
    /// Cap on port-only migrations for the lifetime of the session.
    pub max_port_migrations_per_session: u32,
    /// Ignore `OnNetworkDisconnected` while the cause is
    /// `OnNetworkMadeDefault`, to avoid reacting to the old network's
    /// teardown right after migrating off it.
    pub ignore_disconnect_signal_during_probing: bool,
    /// Suspend blackhole detection for the duration of an immediate
    /// migration, since the old path is about to be abandoned anyway.
    pub disable_blackhole_detection_on_immediate_migrate: bool,
    /// Honor a server-preferred address advertised in transport parameters.
    pub allow_server_preferred_address: bool,
}

/// The error returned by [`MigrationConfig::validate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, displaydoc::Display)]
pub enum ConfigError {
    /// migrate_session_early requires migrate_session_on_network_change
    EarlyMigrationRequiresNetworkChangeMigration,
}

impl MigrationConfig {
    /// Checks the one cross-field invariant: `migrate_session_early`
    /// implies `migrate_session_on_network_change`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.migrate_session_early && !self.migrate_session_on_network_change {
            return Err(ConfigError::EarlyMigrationRequiresNetworkChangeMigration);
        }
        Ok(())
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrate_session_on_network_change: false,
            migrate_session_early: false,
            allow_port_migration: false,
            migrate_idle_session: false,
            idle_migration_period: Duration::from_secs(30),
            max_time_on_non_default_network: Duration::from_secs(128),
            max_migrations_to_non_default_network_on_write_error: 5,
            max_migrations_to_non_default_network_on_path_degrading: 5,
            max_port_migrations_per_session: 4,
            ignore_disconnect_signal_during_probing: true,
            disable_blackhole_detection_on_immediate_migrate: true,
            allow_server_preferred_address: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(MigrationConfig::default().validate(), Ok(()));
    }

    #[test]
    fn early_migration_requires_master_enable() {
        let config = MigrationConfig {
            migrate_session_early: true,
            migrate_session_on_network_change: false,
            ..MigrationConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::EarlyMigrationRequiresNetworkChangeMigration)
        );
    }

    #[test]
    fn early_migration_with_master_enable_is_valid() {
        let config = MigrationConfig {
            migrate_session_early: true,
            migrate_session_on_network_change: true,
            ..MigrationConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
