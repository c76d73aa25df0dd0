// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Classifies the event that triggered a migration attempt.
///
/// Used for policy decisions (some causes probe first, others migrate
/// immediately), telemetry, and the close-reason string surfaced when a
/// forced migration fails. `Debug` output intentionally matches the
/// camel-case spelling used in those close-reason strings (e.g.
/// `"Migration for cause {cause:?} timed out"`); don't rename variants
/// without checking [`crate::connection::CloseReason::reason_phrase`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum MigrationCause {
    #[default]
    Unknown,
    /// no probing: the only possible network is migrated to directly
    OnNetworkConnected,
    /// no probing: reacting to the loss of the active network
    OnNetworkDisconnected,
    /// no probing: reacting to a write failure on the active path
    OnWriteError,
    /// with probing: the platform chose a new default network
    OnNetworkMadeDefault,
    /// with probing: retrying to land back on the default network
    OnMigrateBackToDefaultNetwork,
    /// with probing: path degrading, migrating to a different network
    OnPathDegrading,
    /// with probing: path degrading, migrating to a different port only
    ChangePortOnPathDegrading,
    /// with probing: a network connected after path degrading was already
    /// waiting for one
    NewNetworkConnectedPostPathDegrading,
    /// with probing: the peer advertised a server-preferred address
    OnServerPreferredAddressAvailable,
}

impl MigrationCause {
    /// Causes that migrate directly, without first running a PATH_CHALLENGE
    /// probe against the candidate path.
    #[inline]
    pub fn probes_before_migrating(self) -> bool {
        !matches!(
            self,
            Self::Unknown | Self::OnNetworkConnected | Self::OnNetworkDisconnected | Self::OnWriteError
        )
    }
}
