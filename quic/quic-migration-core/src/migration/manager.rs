// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The control core: a single-threaded, cooperative state machine that
//! turns network and path-quality signals into migration decisions.
//!
//! `MigrationManager` owns no collaborators directly — it is driven by its
//! session, which passes a [`Connection`](crate::connection::Connection),
//! [`Session`](crate::session::Session), [`Telemetry`], and optional
//! [`MigrationDebugVisitor`] into every event handler. This keeps the
//! manager's own state (this struct) free of lifetime parameters while
//! still letting every handler reach the full collaborator surface.

use crate::{
    connection::{close_reason_for_status, CloseReason, Connection},
    migration::{
        backoff::MigrateBackTimer, cause::MigrationCause, config::MigrationConfig,
        probe::{ProbeKind, ProbeRegistry}, status::{MigrationStatus, ProbingResult},
    },
    network::NetworkHandle,
    path::{Packet, PathContext},
    session::Session,
    telemetry::{MigrationDebugVisitor, Telemetry},
    time::Timestamp,
    writer::{WriteDelegate, WriteError},
};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Work queued by a collaborator that only has a [`WriteDelegate`]'s narrow
/// view (no session/telemetry access) for the owner to run on the next tick
/// via [`MigrationManager::run_pending_callbacks`], with the full
/// collaborator set back in scope.
enum PendingCallback {
    StartMigrateSessionOnWriteError,
}

const WAIT_TIME_FOR_NEW_NETWORK: core::time::Duration = core::time::Duration::from_secs(10);

/// Reborrows an `Option<&mut dyn MigrationDebugVisitor>` for a single call,
/// without moving the original binding out. Needed in place of
/// `Option::as_deref_mut` at call sites that reborrow more than once (e.g. in
/// a loop, or across more than one downstream call), where the invariance of
/// `&mut dyn Trait` otherwise ties the reborrow to the caller's own lifetime.
fn reborrow_visitor<'a>(
    visitor: &'a mut Option<&mut dyn MigrationDebugVisitor>,
) -> Option<&'a mut dyn MigrationDebugVisitor> {
    match visitor {
        Some(visitor) => Some(&mut **visitor),
        None => None,
    }
}

/// The manager's process-wide state, one instance per session.
pub struct MigrationManager {
    config: MigrationConfig,

    default_network: NetworkHandle,
    current_network: NetworkHandle,
    current_migration_cause: MigrationCause,

    migration_disabled: bool,
    wait_for_new_network: bool,
    pending_migrate_network_immediately: bool,
    pending_migrate_session_on_write_error: bool,

    retry_migrate_back_count: u32,
    current_migrations_to_non_default_network_on_write_error: u32,
    current_migrations_to_non_default_network_on_path_degrading: u32,
    current_migrations_to_different_port_on_path_degrading: u32,

    most_recent_path_degrading_timestamp: Option<Timestamp>,
    most_recent_network_disconnected_timestamp: Option<Timestamp>,
    most_recent_write_error_timestamp: Option<Timestamp>,

    migration_attempted: bool,
    migration_successful: bool,

    migrate_back_timer: Option<MigrateBackTimer>,
    wait_for_migration_armed_at: Option<Timestamp>,
    probes: ProbeRegistry,
    pending_callbacks: VecDeque<PendingCallback>,
}

impl MigrationManager {
    pub fn new(config: MigrationConfig, initial_network: NetworkHandle) -> Self {
        Self {
            config,
            default_network: initial_network,
            current_network: initial_network,
            current_migration_cause: MigrationCause::Unknown,
            migration_disabled: false,
            wait_for_new_network: false,
            pending_migrate_network_immediately: false,
            pending_migrate_session_on_write_error: false,
            retry_migrate_back_count: 0,
            current_migrations_to_non_default_network_on_write_error: 0,
            current_migrations_to_non_default_network_on_path_degrading: 0,
            current_migrations_to_different_port_on_path_degrading: 0,
            most_recent_path_degrading_timestamp: None,
            most_recent_network_disconnected_timestamp: None,
            most_recent_write_error_timestamp: None,
            migration_attempted: false,
            migration_successful: false,
            migrate_back_timer: None,
            wait_for_migration_armed_at: None,
            probes: ProbeRegistry::new(),
            pending_callbacks: VecDeque::new(),
        }
    }

    pub fn current_network(&self) -> NetworkHandle {
        self.current_network
    }

    pub fn default_network(&self) -> NetworkHandle {
        self.default_network
    }

    pub fn set_migration_disabled(&mut self, disabled: bool) {
        self.migration_disabled = disabled;
    }

    /// Invariant checked after every public entry point: at most one commit
    /// is ever in flight. See the manager's own tests for the positive
    /// assertion; callers in debug builds may want to assert this too.
    pub fn at_most_one_commit_pending(&self) -> bool {
        !(self.pending_migrate_network_immediately && self.pending_migrate_session_on_write_error)
    }

    fn reset_cause(&mut self) {
        self.current_migration_cause = MigrationCause::Unknown;
    }

    fn record_status(
        &mut self,
        telemetry: &mut impl Telemetry,
        visitor: Option<&mut dyn MigrationDebugVisitor>,
        status: MigrationStatus,
    ) {
        telemetry.record_migration_status(self.current_migration_cause, status);
        if let Some(visitor) = visitor {
            if status.is_success() {
                visitor.on_migration_succeeded(self.current_migration_cause);
            } else {
                let reason = format!("{status}");
                visitor.on_migration_failed(self.current_migration_cause, status, &reason);
            }
        }
        self.reset_cause();
    }

    fn close_for_status<C: Connection>(
        &mut self,
        connection: &mut C,
        status: MigrationStatus,
    ) {
        if let Some(reason) = close_reason_for_status(status) {
            let phrase = reason.reason_phrase(self.current_migration_cause);
            connection.close_connection(reason, phrase);
        }
    }

    // ---- 4.4.7 Idle session policy -------------------------------------

    /// Returns `Some(status)` with the refusal status if the session is
    /// idle and migration should be refused; `None` means migration may
    /// proceed (either there are active streams, or the idle window hasn't
    /// expired).
    fn idle_session_refusal(&self, session: &impl Session, now: Timestamp) -> Option<MigrationStatus> {
        if session.has_active_request_streams() {
            return None;
        }
        if !self.config.migrate_idle_session {
            return Some(MigrationStatus::NoMigratableStreams);
        }
        let _ = now;
        if session.time_since_last_stream_close() < self.config.idle_migration_period {
            None
        } else {
            Some(MigrationStatus::IdleMigrationTimeout)
        }
    }

    // ---- 4.4.1 OnNetworkConnected ---------------------------------------

    pub fn on_network_connected<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
        network: NetworkHandle,
    ) {
        telemetry.record_network_connected(network);
        if let Some(v) = visitor.as_deref_mut() {
            v.on_network_connected(network);
        }

        if !self.config.migrate_session_on_network_change && !connection.is_path_degrading() {
            return;
        }

        if connection.is_path_degrading() && !self.wait_for_new_network {
            self.current_migration_cause = MigrationCause::NewNetworkConnectedPostPathDegrading;
            self.on_path_degrading(connection, session, telemetry, visitor);
            return;
        }

        if self.wait_for_new_network {
            self.wait_for_new_network = false;
            self.wait_for_migration_armed_at = None;
            if self.current_migration_cause == MigrationCause::OnWriteError {
                self.current_migrations_to_non_default_network_on_write_error += 1;
            }
            self.migrate_network_immediately(connection, session, telemetry, visitor, network);
        }
    }

    // ---- 4.4.2 MigrateNetworkImmediately ---------------------------------

    pub fn migrate_network_immediately<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
        network: NetworkHandle,
    ) -> MigrationStatus {
        debug_assert!(self.config.migrate_session_on_network_change);

        session.reset_non_migratable_streams();

        if let Some(status) = self.idle_session_refusal(session, connection.clock().get_time()) {
            self.record_status(telemetry, visitor, status);
            self.close_for_status(connection, status);
            return status;
        }

        if self.migration_disabled {
            let status = MigrationStatus::DisabledByConfig;
            self.record_status(telemetry, visitor, status);
            self.close_for_status(connection, status);
            return status;
        }

        if network == self.current_network {
            let status = MigrationStatus::AlreadyMigrated;
            self.record_status(telemetry, visitor, status);
            return status;
        }

        let peer_address = connection.peer_address();
        connection.cancel_path_validation(network, peer_address);

        self.pending_migrate_network_immediately = true;
        connection.writer().force_write_blocked(true);
        if self.config.disable_blackhole_detection_on_immediate_migrate {
            connection.stop_blackhole_detection();
        }

        telemetry.record_migration_attempted(self.current_migration_cause);
        if let Some(v) = visitor.as_deref_mut() {
            v.on_migration_started(self.current_migration_cause, network);
        }

        let committed = connection.validate_path(
            PathContext::placeholder(network, peer_address),
            self.current_migration_cause,
        );

        self.pending_migrate_network_immediately = false;
        if !committed {
            connection.writer().force_write_blocked(false);
            let status = MigrationStatus::InternalError;
            self.record_status(telemetry, visitor, status);
            self.close_for_status(connection, status);
            return status;
        }

        self.finish_migrate(network);
        let status = MigrationStatus::Success;
        self.record_status(telemetry, visitor, status);
        status
    }

    fn finish_migrate(&mut self, network: NetworkHandle) {
        self.migration_attempted = true;
        self.migration_successful = true;
        self.current_network = network;
        if network != self.default_network {
            // caller arms the migrate-back timer via start_migrate_back_loop
        } else if let Some(timer) = self.migrate_back_timer.take() {
            drop(timer);
        }
    }

    // ---- 4.4.3 OnNetworkDisconnected -------------------------------------

    pub fn on_network_disconnected<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
        disconnected: NetworkHandle,
    ) {
        telemetry.record_network_disconnected(disconnected);
        if let Some(v) = visitor.as_deref_mut() {
            v.on_network_disconnected(disconnected);
        }
        self.most_recent_network_disconnected_timestamp = Some(connection.clock().get_time());

        if !self.config.migrate_session_on_network_change {
            return;
        }

        connection.cancel_path_validation(disconnected, connection.peer_address());

        if disconnected == self.default_network {
            self.default_network = NetworkHandle::INVALID;
            self.current_migrations_to_non_default_network_on_write_error = 0;
        }

        if self.current_network != disconnected {
            return;
        }

        if self.pending_migrate_session_on_write_error {
            return;
        }

        if self.config.ignore_disconnect_signal_during_probing
            && self.current_migration_cause == MigrationCause::OnNetworkMadeDefault
        {
            return;
        }

        self.current_migration_cause = MigrationCause::OnNetworkDisconnected;

        if !connection.is_handshake_confirmed() {
            let status = MigrationStatus::PathDegradingBeforeHandshakeConfirmed;
            self.record_status(telemetry, visitor, status);
            connection.close_connection(
                CloseReason::HandshakeUnconfirmed,
                "connection migration on network disconnect before handshake confirmed"
                    .to_string(),
            );
            return;
        }

        match session.find_alternate_network(self.current_network) {
            Some(alternate) => {
                self.migrate_network_immediately(connection, session, telemetry, visitor, alternate);
            }
            None => self.on_no_new_network(connection, session, visitor),
        }
    }

    // ---- 4.4.4 OnNetworkMadeDefault ---------------------------------------

    pub fn on_network_made_default<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
        new_default: NetworkHandle,
    ) {
        telemetry.record_network_made_default(new_default);
        if let Some(v) = visitor.as_deref_mut() {
            v.on_network_made_default(new_default);
        }

        let previous_default = self.default_network;
        self.default_network = new_default;
        self.current_migration_cause = MigrationCause::OnNetworkMadeDefault;
        if new_default != previous_default {
            self.current_migrations_to_non_default_network_on_write_error = 0;
            self.current_migrations_to_non_default_network_on_path_degrading = 0;
        }

        if self.current_network == new_default {
            self.migrate_back_timer = None;
            let status = MigrationStatus::AlreadyMigrated;
            self.record_status(telemetry, visitor, status);
            return;
        }

        self.start_probing(
            connection,
            session,
            telemetry,
            visitor,
            ProbeKind::Network,
            new_default,
            connection.peer_address(),
        );
    }

    // ---- 4.4.5 OnPathDegrading ---------------------------------------------

    pub fn on_path_degrading<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
    ) {
        self.most_recent_path_degrading_timestamp = Some(connection.clock().get_time());

        if session.is_session_proxied() {
            return;
        }

        if !connection.is_handshake_confirmed() {
            let status = MigrationStatus::PathDegradingBeforeHandshakeConfirmed;
            self.record_status(telemetry, visitor, status);
            return;
        }

        let peer_address = connection.peer_address();

        if self.config.allow_port_migration && !self.config.migrate_session_early {
            self.current_migration_cause = MigrationCause::ChangePortOnPathDegrading;
            if self.current_migrations_to_different_port_on_path_degrading
                >= self.config.max_port_migrations_per_session
            {
                let status = MigrationStatus::TooManyChanges;
                self.record_status(telemetry, visitor, status);
                return;
            }
            self.current_migrations_to_different_port_on_path_degrading += 1;
            self.start_probing(
                connection,
                session,
                telemetry,
                visitor,
                ProbeKind::Port,
                self.current_network,
                peer_address,
            );
            return;
        }

        self.current_migration_cause = MigrationCause::OnPathDegrading;
        if !self.config.migrate_session_early {
            let status = MigrationStatus::PathDegradingNotEnabled;
            self.record_status(telemetry, visitor, status);
            return;
        }

        if self.current_network == self.default_network
            && self.current_migrations_to_non_default_network_on_path_degrading
                >= self.config.max_migrations_to_non_default_network_on_path_degrading
        {
            let status = MigrationStatus::OnPathDegradingDisabled;
            self.record_status(telemetry, visitor, status);
            return;
        }

        let alternate = match session.find_alternate_network(self.current_network) {
            Some(alternate) => alternate,
            None => {
                let status = MigrationStatus::NoAlternateNetwork;
                self.record_status(telemetry, visitor, status);
                return;
            }
        };

        if let Some(status) = self.idle_session_refusal(session, connection.clock().get_time()) {
            self.record_status(telemetry, visitor, status);
            return;
        }

        self.current_migrations_to_non_default_network_on_path_degrading += 1;
        self.start_probing(
            connection,
            session,
            telemetry,
            visitor,
            ProbeKind::Network,
            alternate,
            peer_address,
        );
    }

    // ---- 4.4.6 Waiting for a new network ------------------------------------

    fn on_no_new_network<C: Connection, S: Session>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        _visitor: Option<&mut dyn MigrationDebugVisitor>,
    ) {
        self.wait_for_new_network = true;
        connection.writer().force_write_blocked(true);
        if self.config.disable_blackhole_detection_on_immediate_migrate {
            connection.stop_blackhole_detection();
        }
        session.on_no_new_network_for_migration();
        self.wait_for_migration_armed_at = Some(connection.clock().get_time());
    }

    /// Called by the owning session's `wait_for_migration_alarm` when it
    /// fires; the caller is responsible for arming the alarm for
    /// [`WAIT_TIME_FOR_NEW_NETWORK`] when [`Self::on_no_new_network`] runs
    /// and for not calling this if a migration started in the meantime.
    pub fn on_wait_for_migration_timeout<C: Connection>(&mut self, connection: &mut C) {
        if !self.wait_for_new_network {
            return;
        }
        self.wait_for_new_network = false;
        let status = MigrationStatus::Timeout;
        let reason = CloseReason::NoNewNetworkForMigration;
        let phrase = reason.reason_phrase(self.current_migration_cause);
        connection.close_connection(reason, phrase);
        let _ = status;
    }

    pub fn wait_for_migration_deadline(&self) -> Option<Timestamp> {
        self.wait_for_migration_armed_at
            .and_then(|armed| armed.checked_add(WAIT_TIME_FOR_NEW_NETWORK))
    }

    pub fn is_waiting_for_new_network(&self) -> bool {
        self.wait_for_new_network
    }

    // ---- 4.4.8 Probing via PATH_CHALLENGE -----------------------------------

    #[allow(clippy::too_many_arguments)]
    fn start_probing<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
        kind: ProbeKind,
        network: NetworkHandle,
        peer_address: SocketAddr,
    ) -> ProbingResult {
        if self.probes.is_probing(network, peer_address) {
            let result = ProbingResult::DisabledByConfig;
            telemetry.record_probing_result(self.current_migration_cause, result);
            return result;
        }

        self.probes.start(network, peer_address, kind);
        let context = PathContext::placeholder(network, peer_address);
        session.prepare_for_probing_on_path(&context);

        let accepted = connection.validate_path(context, self.current_migration_cause);
        let result = if accepted {
            ProbingResult::Pending
        } else {
            self.probes.finish(network, peer_address);
            ProbingResult::InternalError
        };

        telemetry.record_probing_result(self.current_migration_cause, result);
        if let Some(v) = visitor.as_deref_mut() {
            v.on_probe_result(self.current_migration_cause, result);
        }
        result
    }

    /// Completion callback for a probe that succeeded, dispatched by the
    /// tagged delegate the redesign collapsed the three Chromium
    /// subclasses into (see the migration module's probe registry).
    pub fn on_probe_succeeded<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
        context: PathContext,
    ) {
        let network = context.network();
        let peer_address = context.peer_addr();
        let kind = self.probes.finish(network, peer_address);

        session.reset_non_migratable_streams();
        if session.migrate_to_new_path(context) {
            self.finish_migrate(network);
            if network != self.default_network {
                self.start_migrate_back_loop(connection.clock().get_time());
            }
            let status = MigrationStatus::Success;
            self.record_status(telemetry, visitor, status);
        } else {
            let status = MigrationStatus::NoUnusedConnectionId;
            self.record_status(telemetry, visitor, status);
        }
        let _ = kind;
    }

    pub fn on_probe_failed<T: Telemetry>(
        &mut self,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
        network: NetworkHandle,
        peer_address: SocketAddr,
    ) {
        self.probes.finish(network, peer_address);
        let status = MigrationStatus::InternalError;
        self.record_status(telemetry, visitor, status);
    }

    // ---- 4.4.9 Migrate-back-to-default loop ---------------------------------

    fn start_migrate_back_loop(&mut self, now: Timestamp) {
        self.migrate_back_timer =
            Some(MigrateBackTimer::start(now, self.config.max_time_on_non_default_network));
        self.retry_migrate_back_count = 0;
    }

    /// Called whenever the session's event loop observes that `now` has
    /// passed the migrate-back timer's deadline.
    pub fn on_migrate_back_timer<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
        now: Timestamp,
    ) {
        let Some(timer) = self.migrate_back_timer.as_mut() else {
            return;
        };
        if !timer.is_expired(now) {
            return;
        }

        if self.pending_migrate_network_immediately || self.pending_migrate_session_on_write_error {
            timer.reschedule(now);
            return;
        }

        if self.current_network == self.default_network {
            self.migrate_back_timer = None;
            return;
        }

        if timer.has_given_up(now) {
            self.migrate_back_timer = None;
            session.start_draining();
            return;
        }

        self.retry_migrate_back_count += 1;
        telemetry.record_migrate_back_retry(self.retry_migrate_back_count);
        if let Some(v) = visitor.as_deref_mut() {
            v.on_migrate_back_retry(self.retry_migrate_back_count);
        }

        self.current_migration_cause = MigrationCause::OnMigrateBackToDefaultNetwork;
        let default_network = self.default_network;
        let peer_address = connection.peer_address();
        self.start_probing(
            connection,
            session,
            telemetry,
            visitor,
            ProbeKind::Network,
            default_network,
            peer_address,
        );

        if let Some(timer) = self.migrate_back_timer.as_mut() {
            timer.reschedule(now);
        }
    }

    /// Drains callbacks queued by [`ManagerWriteDelegate`] during the last
    /// write, now that the full collaborator set is back in scope. Called
    /// once per event-loop tick, after the write path has returned control.
    pub fn run_pending_callbacks<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
    ) {
        while let Some(callback) = self.pending_callbacks.pop_front() {
            match callback {
                PendingCallback::StartMigrateSessionOnWriteError => {
                    self.start_migrate_session_on_write_error(
                        connection,
                        session,
                        telemetry,
                        reborrow_visitor(&mut visitor),
                    );
                }
            }
        }
    }

    // ---- 4.4.10 Write-error path ---------------------------------------------

    /// Evaluates whether a write error is eligible for migration-based
    /// recovery. Returning `true` tells the caller (the writer's delegate)
    /// to report the error as "pending, data buffered" instead of fatal.
    pub fn maybe_start_migrate_session_on_write_error<C: Connection>(
        &mut self,
        connection: &mut C,
        is_msg_too_big: bool,
        is_proxied: bool,
    ) -> bool {
        if is_proxied || is_msg_too_big {
            return false;
        }
        if !self.config.migrate_session_on_network_change {
            return false;
        }
        if !connection.is_handshake_confirmed() {
            return false;
        }
        self.most_recent_write_error_timestamp = Some(connection.clock().get_time());
        true
    }

    /// Runs on the next event-loop tick after
    /// [`Self::maybe_start_migrate_session_on_write_error`] returned true.
    pub fn start_migrate_session_on_write_error<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        mut visitor: Option<&mut dyn MigrationDebugVisitor>,
    ) -> MigrationStatus {
        if self.pending_migrate_network_immediately {
            return MigrationStatus::InternalError;
        }

        self.current_migration_cause = MigrationCause::OnWriteError;

        if let Some(status) = self.idle_session_refusal(session, connection.clock().get_time()) {
            self.record_status(telemetry, visitor, status);
            self.close_for_status(connection, status);
            return status;
        }

        if !self.config.migrate_session_on_network_change {
            let status = MigrationStatus::OnWriteErrorDisabled;
            self.record_status(telemetry, visitor, status);
            return status;
        }

        if self.current_network == self.default_network
            && self.current_migrations_to_non_default_network_on_write_error
                >= self.config.max_migrations_to_non_default_network_on_write_error
        {
            let status = MigrationStatus::TooManyChanges;
            self.record_status(telemetry, visitor, status);
            connection.close_connection(
                CloseReason::PacketWriteError,
                CloseReason::PacketWriteError.reason_phrase(self.current_migration_cause),
            );
            return status;
        }

        self.pending_migrate_session_on_write_error = true;
        let alternate = session.find_alternate_network(self.current_network);
        let result = match alternate {
            // No candidate network: per 4.4.6, wait up to
            // WAIT_TIME_FOR_NEW_NETWORK for `OnNetworkConnected` rather than
            // closing. `migrate_network_immediately` is never entered, so
            // there is nothing here for the caller to close.
            None => {
                self.on_no_new_network(connection, session, reborrow_visitor(&mut visitor));
                let status = MigrationStatus::NoAlternateNetwork;
                self.record_status(telemetry, reborrow_visitor(&mut visitor), status);
                self.pending_migrate_session_on_write_error = false;
                return status;
            }
            Some(alternate) => {
                self.current_migrations_to_non_default_network_on_write_error += 1;
                self.migrate_network_immediately(connection, session, telemetry, visitor, alternate)
            }
        };
        self.pending_migrate_session_on_write_error = false;

        // `migrate_network_immediately` already closes the connection with
        // the appropriate reason on every failure path of its own; closing
        // again here would overwrite that reason with a generic one.
        if result == MigrationStatus::Success && self.current_network != self.default_network {
            self.start_migrate_back_loop(connection.clock().get_time());
        }
        result
    }

    // ---- 4.4.11 Server-preferred-address path --------------------------------

    pub fn on_server_preferred_address_available<C: Connection, S: Session, T: Telemetry>(
        &mut self,
        connection: &mut C,
        session: &mut S,
        telemetry: &mut T,
        visitor: Option<&mut dyn MigrationDebugVisitor>,
        server_address: SocketAddr,
    ) -> ProbingResult {
        if !self.config.allow_server_preferred_address {
            return ProbingResult::DisabledByConfig;
        }
        self.current_migration_cause = MigrationCause::OnServerPreferredAddressAvailable;
        self.start_probing(
            connection,
            session,
            telemetry,
            visitor,
            ProbeKind::ServerPreferredAddress,
            self.default_network,
            server_address,
        )
    }
}

/// The seam between a [`crate::writer::ForceBlockableWriter`] and the
/// manager: on a write failure eligible for recovery, defers
/// `start_migrate_session_on_write_error` to the next call to
/// [`MigrationManager::run_pending_callbacks`], since a [`WriteDelegate`]
/// only has the connection in scope, not the session or telemetry
/// `start_migrate_session_on_write_error` needs.
pub struct ManagerWriteDelegate<'a, C> {
    manager: &'a mut MigrationManager,
    connection: &'a mut C,
}

impl<'a, C: Connection> ManagerWriteDelegate<'a, C> {
    pub fn new(manager: &'a mut MigrationManager, connection: &'a mut C) -> Self {
        Self { manager, connection }
    }
}

impl<'a, C: Connection> WriteDelegate for ManagerWriteDelegate<'a, C> {
    fn handle_write_error(&mut self, error: &WriteError, _last_packet: &Packet) -> bool {
        let is_msg_too_big = matches!(error, WriteError::MsgTooBig);
        // `is_proxied` is a session-level property this delegate has no
        // access to; `run_pending_callbacks` re-evaluates the full policy
        // once the session is back in scope, so passing `false` here only
        // affects whether this eligibility pre-check can short-circuit,
        // never the final decision.
        if self
            .manager
            .maybe_start_migrate_session_on_write_error(self.connection, is_msg_too_big, false)
        {
            self.manager
                .pending_callbacks
                .push_back(PendingCallback::StartMigrateSessionOnWriteError);
            true
        } else {
            false
        }
    }

    fn on_write_error(&mut self, _error: &WriteError) {}

    fn on_write_unblocked(&mut self) {}
}

// `PathContext` carries a live boxed writer in production; tests and the
// manager's own internal probe bookkeeping only need its addressing
// fields, so this constructs a context around a writer that always reports
// blocked until swapped out by the real factory callback.
impl PathContext {
    pub(crate) fn placeholder(network: NetworkHandle, peer_addr: SocketAddr) -> Self {
        struct NullWriter;
        impl crate::writer::PacketWriter for NullWriter {
            fn write(&mut self, _data: &[u8]) -> crate::writer::WriteStatus {
                crate::writer::WriteStatus::Blocked
            }
            fn is_write_blocked(&self) -> bool {
                true
            }
        }
        Self::new(
            SocketAddr::from(([0, 0, 0, 0], 0)),
            peer_addr,
            network,
            -1,
            Box::new(NullWriter),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{path::CreationError, telemetry::testing::RecordingTelemetry, time::Clock};
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    struct FakeConnection {
        clock: crate::time::testing::Clock,
        writer: crate::writer::ForceBlockableWriter,
        peer_address: SocketAddr,
        degrading: bool,
        handshake_confirmed: bool,
        validate_result: bool,
        closed: Option<(CloseReason, String)>,
    }

    impl FakeConnection {
        fn new() -> Self {
            struct NullWriter;
            impl crate::writer::PacketWriter for NullWriter {
                fn write(&mut self, _data: &[u8]) -> crate::writer::WriteStatus {
                    crate::writer::WriteStatus::Ok
                }
                fn is_write_blocked(&self) -> bool {
                    false
                }
            }
            Self {
                clock: crate::time::testing::Clock::default(),
                writer: crate::writer::ForceBlockableWriter::new(Box::new(NullWriter)),
                peer_address: addr(443),
                degrading: false,
                handshake_confirmed: true,
                validate_result: true,
                closed: None,
            }
        }
    }

    impl Connection for FakeConnection {
        fn writer(&mut self) -> &mut crate::writer::ForceBlockableWriter {
            &mut self.writer
        }

        fn peer_address(&self) -> SocketAddr {
            self.peer_address
        }

        fn validate_path(&mut self, _context: PathContext, _cause: MigrationCause) -> bool {
            self.validate_result
        }

        fn path_validation_context(&self, _network: NetworkHandle, _peer_address: SocketAddr) -> Option<&PathContext> {
            None
        }

        fn cancel_path_validation(&mut self, _network: NetworkHandle, _peer_address: SocketAddr) {}

        fn migrate_path(&mut self, _context: PathContext) -> bool {
            true
        }

        fn is_path_degrading(&self) -> bool {
            self.degrading
        }

        fn is_handshake_confirmed(&self) -> bool {
            self.handshake_confirmed
        }

        fn close_connection(&mut self, reason: CloseReason, reason_phrase: String) {
            self.closed = Some((reason, reason_phrase));
        }

        fn clock(&self) -> &dyn Clock {
            &self.clock
        }

        fn last_activity_time(&self) -> Timestamp {
            self.clock.get_time()
        }

        fn stop_blackhole_detection(&mut self) {}
    }

    struct FakeSession {
        active_streams: bool,
        alternate: Option<NetworkHandle>,
        proxied: bool,
        migrate_result: bool,
        drained: bool,
        non_migratable_resets: u32,
    }

    impl FakeSession {
        fn new() -> Self {
            Self {
                active_streams: true,
                alternate: None,
                proxied: false,
                migrate_result: true,
                drained: false,
                non_migratable_resets: 0,
            }
        }
    }

    impl Session for FakeSession {
        fn has_active_request_streams(&self) -> bool {
            self.active_streams
        }

        fn time_since_last_stream_close(&self) -> core::time::Duration {
            core::time::Duration::ZERO
        }

        fn find_alternate_network(&self, _current: NetworkHandle) -> Option<NetworkHandle> {
            self.alternate
        }

        fn reset_non_migratable_streams(&mut self) {
            self.non_migratable_resets += 1;
        }

        fn on_no_new_network_for_migration(&mut self) {}

        fn start_draining(&mut self) {
            self.drained = true;
        }

        fn prepare_for_probing_on_path(&mut self, _context: &PathContext) {}

        fn on_connection_to_be_closed_due_to_migration_error(
            &mut self,
            _cause: MigrationCause,
            _reason: &str,
        ) {
        }

        fn migrate_to_new_path(&mut self, _context: PathContext) -> bool {
            self.migrate_result
        }

        fn is_session_proxied(&self) -> bool {
            self.proxied
        }
    }

    fn enabled_config() -> MigrationConfig {
        MigrationConfig {
            migrate_session_on_network_change: true,
            ..MigrationConfig::default()
        }
    }

    #[test]
    fn s1_graceful_network_change_commits_without_arming_migrate_back() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        manager.on_network_made_default(&mut connection, &mut session, &mut telemetry, None, NetworkHandle::new(2));
        manager.on_probe_succeeded(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
            PathContext::placeholder(NetworkHandle::new(2), addr(443)),
        );

        assert_eq!(manager.current_network(), NetworkHandle::new(2));
        assert_eq!(manager.default_network(), NetworkHandle::new(2));
        assert!(manager.migrate_back_timer.is_none());
        assert_eq!(session.non_migratable_resets, 1);
    }

    #[test]
    fn s5_idle_session_refusal_closes_with_no_migratable_streams() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        session.active_streams = false;
        let mut telemetry = RecordingTelemetry::default();

        let status = manager.migrate_network_immediately(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
            NetworkHandle::new(2),
        );

        assert_eq!(status, MigrationStatus::NoMigratableStreams);
        assert_eq!(connection.closed.unwrap().0, CloseReason::NoMigratableStreams);
    }

    #[test]
    fn already_on_requested_network_is_a_noop() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        let status = manager.migrate_network_immediately(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
            NetworkHandle::new(1),
        );

        assert_eq!(status, MigrationStatus::AlreadyMigrated);
        assert!(connection.closed.is_none());
    }

    #[test]
    fn duplicate_probe_for_same_path_is_rejected() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        let first = manager.start_probing(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
            ProbeKind::Network,
            NetworkHandle::new(2),
            addr(443),
        );
        let second = manager.start_probing(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
            ProbeKind::Network,
            NetworkHandle::new(2),
            addr(443),
        );

        assert_eq!(first, ProbingResult::Pending);
        assert_eq!(second, ProbingResult::DisabledByConfig);
    }

    #[test]
    fn s6_migrate_back_gives_up_once_max_time_exceeded() {
        let mut manager = MigrationManager::new(
            MigrationConfig {
                migrate_session_on_network_change: true,
                max_time_on_non_default_network: core::time::Duration::from_secs(5),
                ..MigrationConfig::default()
            },
            NetworkHandle::new(1),
        );
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        manager.current_network = NetworkHandle::new(2);
        manager.start_migrate_back_loop(connection.clock.get_time());
        connection.clock.inc_by(core::time::Duration::from_secs(10));
        let now = connection.clock.get_time();

        manager.on_migrate_back_timer(&mut connection, &mut session, &mut telemetry, None, now);

        assert!(manager.migrate_back_timer.is_none());
        assert!(session.drained);
    }

    #[test]
    fn path_degrading_before_handshake_confirmed_is_refused() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        connection.handshake_confirmed = false;
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        manager.on_path_degrading(&mut connection, &mut session, &mut telemetry, None);

        assert_eq!(
            telemetry.events.last(),
            Some(&crate::telemetry::testing::Event::MigrationStatus(
                MigrationCause::Unknown,
                MigrationStatus::PathDegradingBeforeHandshakeConfirmed
            ))
        );
    }

    #[test]
    fn write_error_eligibility_requires_confirmed_handshake() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        connection.handshake_confirmed = false;

        assert!(!manager.maybe_start_migrate_session_on_write_error(&mut connection, false, false));

        connection.handshake_confirmed = true;
        assert!(manager.maybe_start_migrate_session_on_write_error(&mut connection, false, false));
        assert!(!manager.maybe_start_migrate_session_on_write_error(&mut connection, true, false));
    }

    #[test]
    fn creation_error_display_matches_factory_contract() {
        let error = CreationError::NoLocalAddress;
        assert_eq!(error.to_string(), "no local address is available on the requested network");
    }

    #[test]
    fn peer_disabled_migration_closes_with_disabled_by_config() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        manager.set_migration_disabled(true);
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        let status = manager.migrate_network_immediately(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
            NetworkHandle::new(2),
        );

        assert_eq!(status, MigrationStatus::DisabledByConfig);
        assert_eq!(connection.closed.unwrap().0, CloseReason::DisabledByConfig);
    }

    /// Seed scenario S2: a write error with no alternate network waits for
    /// `OnNetworkConnected` instead of closing the connection.
    #[test]
    fn s2_write_error_with_no_alternate_network_waits_instead_of_closing() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        assert!(manager.maybe_start_migrate_session_on_write_error(&mut connection, false, false));
        let status = manager.start_migrate_session_on_write_error(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
        );

        assert_eq!(status, MigrationStatus::NoAlternateNetwork);
        assert!(connection.closed.is_none());
        assert!(manager.is_waiting_for_new_network());
    }

    /// Seed scenario S3: once S2's wait exceeds the timeout, the connection
    /// closes with the exact phrase scenario S3 pins down.
    #[test]
    fn s3_wait_for_migration_timeout_closes_with_exact_reason_phrase() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        manager.maybe_start_migrate_session_on_write_error(&mut connection, false, false);
        manager.start_migrate_session_on_write_error(&mut connection, &mut session, &mut telemetry, None);
        assert!(manager.is_waiting_for_new_network());

        manager.on_wait_for_migration_timeout(&mut connection);

        let (reason, phrase) = connection.closed.unwrap();
        assert_eq!(reason, CloseReason::NoNewNetworkForMigration);
        assert_eq!(phrase, "Migration for cause OnWriteError timed out");
    }

    /// A write error that does find an alternate network, but whose
    /// migration attempt itself fails, must be closed with the reason
    /// `migrate_network_immediately` chose — not a second, overwriting
    /// close here.
    #[test]
    fn write_error_migration_failure_is_not_double_closed() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        manager.set_migration_disabled(true);
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        session.alternate = Some(NetworkHandle::new(2));
        let mut telemetry = RecordingTelemetry::default();

        manager.maybe_start_migrate_session_on_write_error(&mut connection, false, false);
        let status = manager.start_migrate_session_on_write_error(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
        );

        // `migrate_network_immediately` already closed with `DisabledByConfig`;
        // the write-error path must not overwrite that with `PacketWriteError`.
        assert_eq!(status, MigrationStatus::DisabledByConfig);
        assert_eq!(connection.closed.unwrap().0, CloseReason::DisabledByConfig);
    }

    /// Seed scenario S4: path degrading with port migration enabled tries a
    /// new local port up to the configured cap, then refuses.
    #[test]
    fn s4_port_migration_on_path_degrading_stops_at_its_cap() {
        let mut manager = MigrationManager::new(
            MigrationConfig {
                migrate_session_on_network_change: true,
                allow_port_migration: true,
                max_port_migrations_per_session: 1,
                ..MigrationConfig::default()
            },
            NetworkHandle::new(1),
        );
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        let mut telemetry = RecordingTelemetry::default();

        manager.on_path_degrading(&mut connection, &mut session, &mut telemetry, None);
        assert_eq!(manager.current_migrations_to_different_port_on_path_degrading, 1);
        assert!(manager.probes.is_probing(NetworkHandle::new(1), connection.peer_address()));

        manager.on_path_degrading(&mut connection, &mut session, &mut telemetry, None);

        assert_eq!(
            telemetry.events.last(),
            Some(&crate::telemetry::testing::Event::MigrationStatus(
                MigrationCause::ChangePortOnPathDegrading,
                MigrationStatus::TooManyChanges
            ))
        );
        assert_eq!(manager.current_migrations_to_different_port_on_path_degrading, 1);
    }

    #[test]
    fn disconnect_is_ignored_when_master_switch_is_off() {
        let mut manager = MigrationManager::new(MigrationConfig::default(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        session.alternate = Some(NetworkHandle::new(2));
        let mut telemetry = RecordingTelemetry::default();

        manager.on_network_disconnected(
            &mut connection,
            &mut session,
            &mut telemetry,
            None,
            NetworkHandle::new(1),
        );

        assert_eq!(manager.current_network(), NetworkHandle::new(1));
        assert!(connection.closed.is_none());
    }

    /// A write error routed through `ManagerWriteDelegate` only queues the
    /// migration attempt; it runs once `run_pending_callbacks` is given the
    /// session and telemetry the delegate itself never had.
    #[test]
    fn write_delegate_defers_migration_to_pending_callbacks() {
        let mut manager = MigrationManager::new(enabled_config(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();
        let mut session = FakeSession::new();
        session.alternate = Some(NetworkHandle::new(2));
        let mut telemetry = RecordingTelemetry::default();

        let recovered = {
            let mut delegate = ManagerWriteDelegate::new(&mut manager, &mut connection);
            delegate.handle_write_error(&WriteError::HostUnreachable, &Packet::new())
        };
        assert!(recovered);
        assert!(connection.closed.is_none());

        manager.run_pending_callbacks(&mut connection, &mut session, &mut telemetry, None);

        assert_eq!(manager.current_network(), NetworkHandle::new(2));
        assert!(matches!(
            telemetry.events.last(),
            Some(&crate::telemetry::testing::Event::MigrationStatus(
                MigrationCause::OnWriteError,
                MigrationStatus::Success
            ))
        ));
    }

    #[test]
    fn write_delegate_declines_when_master_switch_is_off() {
        let mut manager = MigrationManager::new(MigrationConfig::default(), NetworkHandle::new(1));
        let mut connection = FakeConnection::new();

        let mut delegate = ManagerWriteDelegate::new(&mut manager, &mut connection);
        let recovered = delegate.handle_write_error(&WriteError::HostUnreachable, &Packet::new());

        assert!(!recovered);
    }
}
