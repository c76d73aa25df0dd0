// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The packet writer and the force-blockable wrapper the manager uses to
//! freeze egress around a migration.

use crate::path::Packet;
use core::time::Duration;

/// The outcome of a single write attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// the packet was sent
    Ok,
    /// the writer cannot accept a packet right now; a caller should treat
    /// this as backpressure and retry once `OnWriteUnblocked` fires
    Blocked,
    /// a write failed and was not recovered by the delegate
    Error(WriteError),
}

/// Kinds of write failure a [`PacketWriter`] surfaces to its delegate.
///
/// `Enobufs` is retried internally by the writer; every other kind is
/// forwarded immediately via `HandleWriteError`/`OnWriteError`.
#[derive(Clone, Debug, PartialEq, Eq, displaydoc::Display)]
pub enum WriteError {
    /// the kernel has no buffer space for the datagram
    Enobufs,
    /// the datagram exceeds the path's maximum size and cannot be migrated around
    MsgTooBig,
    /// the egress network address changed mid-write
    AddressChanged,
    /// the destination host is unreachable
    HostUnreachable,
    /// the destination refused the connection
    ConnectionRefused,
    /// an error not otherwise classified
    Other(String),
}

impl std::error::Error for WriteError {}

/// A delegate a [`PacketWriter`]'s owner installs to observe and recover
/// from write failures.
pub trait WriteDelegate {
    /// Called on a failed write that is eligible for migration-based
    /// recovery. The delegate may take ownership of `last_packet`, start a
    /// migration, and return `true` to have the writer report
    /// [`WriteStatus::Blocked`] (data buffered) instead of the error.
    /// Returning `false` surfaces the original error to the caller.
    fn handle_write_error(&mut self, error: &WriteError, last_packet: &Packet) -> bool;

    /// Called when a write failed and no recovery was attempted.
    fn on_write_error(&mut self, error: &WriteError);

    /// Called when the writer transitions from blocked to writable: the
    /// force flag is clear, the underlying socket is writable, and no
    /// async write is outstanding.
    fn on_write_unblocked(&mut self);
}

/// The minimal per-path writer contract the engine depends on.
///
/// A single attempt against the raw socket. Retrying `Enobufs` and routing
/// other failures to a [`WriteDelegate`] is [`ForceBlockableWriter`]'s job,
/// not the raw writer's.
pub trait PacketWriter {
    /// Writes `data` once.
    fn write(&mut self, data: &[u8]) -> WriteStatus;

    /// True if the underlying transport currently cannot accept a write.
    fn is_write_blocked(&self) -> bool;
}

const MAX_ENOBUFS_RETRIES: u32 = 12;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Drives the writer's internal retry loop for `Enobufs`. The loop itself
/// doesn't sleep (the engine is cooperative, single-threaded); it reports
/// how long the caller's retry alarm should wait before calling
/// [`EnobufsRetry::attempt`] again.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnobufsRetry {
    attempts: u32,
}

impl EnobufsRetry {
    pub fn new() -> Self {
        Self { attempts: 0 }
    }

    /// Records a failed attempt and returns the delay before the next one,
    /// or `None` once the retry budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= MAX_ENOBUFS_RETRIES {
            return None;
        }
        let delay = INITIAL_RETRY_DELAY.saturating_mul(1 << self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Wraps a concrete [`PacketWriter`] with an independent "force blocked"
/// flag, so the manager can freeze egress on the current path during a
/// migration without needing the underlying socket to actually be blocked.
pub struct ForceBlockableWriter {
    inner: Box<dyn PacketWriter>,
    forced_blocked: bool,
    retry: EnobufsRetry,
    held_packet: Option<Packet>,
}

impl ForceBlockableWriter {
    pub fn new(inner: Box<dyn PacketWriter>) -> Self {
        Self {
            inner,
            forced_blocked: false,
            retry: EnobufsRetry::new(),
            held_packet: None,
        }
    }

    /// Sets or clears the force-blocked override.
    pub fn force_write_blocked(&mut self, blocked: bool) {
        self.forced_blocked = blocked;
    }

    /// True if either the force flag is set or the underlying writer
    /// reports it cannot accept a packet.
    pub fn is_write_blocked(&self) -> bool {
        self.forced_blocked || self.inner.is_write_blocked()
    }

    pub fn replace_inner(&mut self, inner: Box<dyn PacketWriter>) {
        self.inner = inner;
        self.retry.reset();
        self.held_packet = None;
    }

    /// Attempts to write `packet` unless force-blocked. `Enobufs` is
    /// retried internally up to the configured budget, holding `packet` for
    /// a caller to re-send once unblocked; any other failure, and `Enobufs`
    /// once the retry budget is spent, is routed to `delegate`.
    pub fn write(&mut self, packet: &Packet, delegate: &mut dyn WriteDelegate) -> WriteStatus {
        if self.forced_blocked {
            return WriteStatus::Blocked;
        }
        match self.inner.write(packet.as_slice()) {
            WriteStatus::Error(WriteError::Enobufs) => {
                if self.retry.next_delay().is_some() {
                    self.held_packet = Some(packet.clone());
                    WriteStatus::Blocked
                } else {
                    self.retry.reset();
                    delegate.on_write_error(&WriteError::Enobufs);
                    WriteStatus::Error(WriteError::Enobufs)
                }
            }
            WriteStatus::Error(error) => {
                if delegate.handle_write_error(&error, packet) {
                    WriteStatus::Blocked
                } else {
                    delegate.on_write_error(&error);
                    WriteStatus::Error(error)
                }
            }
            WriteStatus::Ok => {
                self.retry.reset();
                WriteStatus::Ok
            }
            status @ WriteStatus::Blocked => status,
        }
    }

    pub fn enobufs_retry(&mut self) -> &mut EnobufsRetry {
        &mut self.retry
    }

    pub fn hold_packet(&mut self, packet: Packet) {
        self.held_packet = Some(packet);
    }

    pub fn take_held_packet(&mut self) -> Option<Packet> {
        self.held_packet.take()
    }
}
