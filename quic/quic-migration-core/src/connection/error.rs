// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::migration::{MigrationCause, MigrationStatus};

/// The reason a connection was closed as a side effect of a migration decision.
///
/// This is distinct from [`MigrationStatus`]: a refused migration does not
/// always close the connection (e.g. a probing migration simply gives up and
/// stays on the current path), but when it does, this enum names the
/// CONNECTION_CLOSE-equivalent error surfaced to the peer and application.
#[derive(PartialEq, Eq, Debug, Copy, Clone, displaydoc::Display)]
#[non_exhaustive]
pub enum CloseReason {
    /// no migratable streams were open when migration was required
    NoMigratableStreams,
    /// the session's idle period exceeded the configured migration window
    NetworkIdleTimeout,
    /// a write error could not be recovered by migrating
    PacketWriteError,
    /// the platform's default network changed and migration failed
    NetworkChanged,
    /// no new network appeared within the wait-for-network timeout
    NoNewNetworkForMigration,
    /// the network disconnected before the handshake was confirmed
    HandshakeUnconfirmed,
    /// migration is disabled by peer configuration
    DisabledByConfig,
    /// an internal invariant was violated while migrating
    InternalError,
}

impl CloseReason {
    /// Returns the human-readable close reason string surfaced to the peer,
    /// matching the wording used in telemetry and the debug visitor.
    pub fn reason_phrase(self, cause: MigrationCause) -> String {
        format!("Migration for cause {cause:?} {}", self.phrase_suffix())
    }

    fn phrase_suffix(self) -> &'static str {
        match self {
            Self::NoMigratableStreams => "found no migratable streams",
            Self::NetworkIdleTimeout => "exceeded the idle migration period",
            Self::PacketWriteError => "could not recover from a write error",
            Self::NetworkChanged => "failed after a network change",
            Self::NoNewNetworkForMigration => "timed out",
            Self::HandshakeUnconfirmed => "occurred before the handshake was confirmed",
            Self::DisabledByConfig => "is disabled by peer configuration",
            Self::InternalError => "hit an internal error",
        }
    }
}

impl std::error::Error for CloseReason {}

/// Maps a terminal [`MigrationStatus`] to the [`CloseReason`] the connection
/// should be closed with, if any. `None` means the status does not, by
/// itself, warrant closing the connection (e.g. a probing attempt that
/// simply stays on the current path).
pub fn close_reason_for_status(status: MigrationStatus) -> Option<CloseReason> {
    use MigrationStatus::*;
    match status {
        NoMigratableStreams => Some(CloseReason::NoMigratableStreams),
        IdleMigrationTimeout => Some(CloseReason::NetworkIdleTimeout),
        Timeout => Some(CloseReason::NoNewNetworkForMigration),
        InternalError | NoUnusedConnectionId => Some(CloseReason::InternalError),
        DisabledByConfig => Some(CloseReason::DisabledByConfig),
        // the remaining statuses are policy refusals that a probing migration
        // reports without tearing down the session
        Success | AlreadyMigrated | TooManyChanges | NonMigratableStream | NotEnabled
        | NoAlternateNetwork | OnPathDegradingDisabled
        | PathDegradingNotEnabled | OnWriteErrorDisabled
        | PathDegradingBeforeHandshakeConfirmed => None,
    }
}
