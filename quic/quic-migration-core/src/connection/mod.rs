// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The collaborator surface the migration engine drives: everything it
//! needs from the QUIC connection/session it is attached to.

mod error;

pub use error::{close_reason_for_status, CloseReason};

use crate::{
    network::NetworkHandle,
    path::PathContext,
    time::{Clock, Timestamp},
    writer::ForceBlockableWriter,
};
use std::net::SocketAddr;

/// The subset of connection-level behavior the migration engine depends on.
///
/// A real implementation backs this with the session's actual connection
/// object; tests back it with a recording fake. The engine never reaches
/// into connection internals beyond this trait.
pub trait Connection {
    /// Returns the writer for the connection's currently active path.
    fn writer(&mut self) -> &mut ForceBlockableWriter;

    /// The peer address the connection is currently sending to.
    fn peer_address(&self) -> SocketAddr;

    /// Starts PATH_CHALLENGE validation of `context`. The connection reports
    /// the asynchronous result through the path validation delegate it was
    /// constructed with; this call only confirms the probe was accepted.
    fn validate_path(&mut self, context: PathContext, cause: crate::migration::MigrationCause) -> bool;

    /// Returns the validation context for a network/address pair currently
    /// being probed, if any.
    fn path_validation_context(
        &self,
        network: NetworkHandle,
        peer_address: SocketAddr,
    ) -> Option<&PathContext>;

    /// Cancels an in-flight path validation for the given network/address.
    fn cancel_path_validation(&mut self, network: NetworkHandle, peer_address: SocketAddr);

    /// Switches the connection's active path to an already-validated one.
    fn migrate_path(&mut self, context: PathContext) -> bool;

    /// True once this connection's path has reported degrading performance.
    fn is_path_degrading(&self) -> bool;

    /// True once the TLS handshake has been confirmed.
    fn is_handshake_confirmed(&self) -> bool;

    /// Tears the connection down with the given close reason.
    fn close_connection(&mut self, reason: CloseReason, reason_phrase: String);

    /// The connection's time source.
    fn clock(&self) -> &dyn Clock;

    /// The time the connection last sent or received a packet carrying
    /// application data, used to evaluate the idle-migration window.
    fn last_activity_time(&self) -> Timestamp;

    /// Tells blackhole detection to stop watching the current path, used
    /// while an immediate migration is already replacing it.
    fn stop_blackhole_detection(&mut self);
}
