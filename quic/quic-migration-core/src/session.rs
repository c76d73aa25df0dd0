// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The collaborator that owns the connection, writer, migration manager,
//! and stream queue together, and answers the session-scoped questions the
//! manager cannot answer from the connection alone.

use crate::{migration::MigrationCause, network::NetworkHandle, path::PathContext};
use core::time::Duration;

/// Questions and side effects the manager needs from its owning session.
///
/// The manager receives a non-owning reference to an implementor; the
/// session owns the manager, so this trait is the one back-edge in an
/// otherwise tree-shaped ownership graph.
pub trait Session {
    /// True if the session has any open outgoing or incoming request stream.
    fn has_active_request_streams(&self) -> bool;

    /// How long it has been since the last request stream closed. Only
    /// meaningful when `has_active_request_streams` is false.
    fn time_since_last_stream_close(&self) -> Duration;

    /// Asks the session to name a network other than `current` that the
    /// connection could migrate to, if one exists.
    fn find_alternate_network(&self, current: NetworkHandle) -> Option<NetworkHandle>;

    /// Resets every stream that declared itself unable to tolerate
    /// migration, ahead of a forced migration.
    fn reset_non_migratable_streams(&mut self);

    /// Called when the manager gives up waiting for a new network to
    /// appear; the session may use this to quiesce outstanding work.
    fn on_no_new_network_for_migration(&mut self);

    /// Marks the session draining: accept no new stream requests, but let
    /// existing ones finish.
    fn start_draining(&mut self);

    /// Gives the session a chance to prepare (e.g. pause blackhole
    /// detection bookkeeping) before a probe starts on `context`.
    fn prepare_for_probing_on_path(&mut self, context: &PathContext);

    /// Notifies the session the connection is about to be closed because of
    /// a migration failure, so it can record the cause before teardown.
    fn on_connection_to_be_closed_due_to_migration_error(
        &mut self,
        cause: MigrationCause,
        reason: &str,
    );

    /// Commits a validated path context as the connection's new active
    /// path, rotating in an unused peer connection ID. Returns false (and
    /// leaves the connection on its current path) if no unused connection
    /// ID was available.
    fn migrate_to_new_path(&mut self, context: PathContext) -> bool;

    /// True if this session is running behind a proxy, which disables
    /// client-driven migration entirely.
    fn is_session_proxied(&self) -> bool;
}
