// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Terminal outcome of a single migration attempt, reported to telemetry and
/// the debug visitor and used to decide whether the connection should close.
#[derive(Clone, Copy, Debug, PartialEq, Eq, displaydoc::Display)]
#[non_exhaustive]
pub enum MigrationStatus {
    /// migration completed successfully
    Success,
    /// the session had no migratable request streams
    NoMigratableStreams,
    /// already on the requested network or port
    AlreadyMigrated,
    /// an internal invariant was violated
    InternalError,
    /// too many migrations of this kind have already occurred
    TooManyChanges,
    /// a stream in the session cannot tolerate migration
    NonMigratableStream,
    /// migration is not enabled by configuration
    NotEnabled,
    /// the session could not find an alternate network to use
    NoAlternateNetwork,
    /// migration on path degrading is disabled for non-default networks
    OnPathDegradingDisabled,
    /// migration is disabled by the peer's negotiated configuration
    DisabledByConfig,
    /// migration on path degrading is not enabled by configuration
    PathDegradingNotEnabled,
    /// the wait-for-new-network timer expired
    Timeout,
    /// migration on write error is disabled by configuration
    OnWriteErrorDisabled,
    /// path degrading was reported before the handshake was confirmed
    PathDegradingBeforeHandshakeConfirmed,
    /// the idle session exceeded the configured migration period
    IdleMigrationTimeout,
    /// the connection had no unused peer connection ID to migrate with
    NoUnusedConnectionId,
}

impl MigrationStatus {
    /// Returns true if the status represents a completed migration rather
    /// than a refusal or failure.
    #[inline]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Terminal outcome of a PATH_CHALLENGE probing attempt, returned
/// synchronously to the caller of [`crate::migration::manager::MigrationManager::start_probing`]
/// while the probe itself completes asynchronously via the connection's
/// validation delegate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, displaydoc::Display)]
#[non_exhaustive]
pub enum ProbingResult {
    /// the probe was started and a result is pending
    Pending,
    /// probing is disabled because the session is idle
    DisabledWithIdleSession,
    /// probing is disabled by configuration
    DisabledByConfig,
    /// probing is disabled because of a non-migratable stream
    DisabledByNonMigrableStream,
    /// probing failed for an internal reason
    InternalError,
}

impl ProbingResult {
    #[inline]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_success_is_success() {
        assert!(MigrationStatus::Success.is_success());
        assert!(!MigrationStatus::AlreadyMigrated.is_success());
    }
}
