// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A client-side QUIC connection-migration engine.
//!
//! This crate implements the policy that decides *when* and *where* a QUIC
//! client migrates its active path — reacting to platform network-change
//! signals, path-quality degradation, and write failures — and the
//! supporting primitives (force-blockable writer, stream request queue,
//! telemetry) that policy needs. It does not implement QUIC itself:
//! framing, recovery, and the wire protocol are out of scope, and are
//! reached only through the [`connection`] and [`session`] traits.
//!
//! This crate does not attempt `no_std` end to end: [`connection`],
//! [`path`], and [`migration::probe`] address real sockets via
//! `std::net::SocketAddr` and raw file descriptors throughout. The
//! `migration::cause`, `migration::status`, `migration::config`, and
//! [`state`] types happen to have no such dependency, which is worth
//! preserving as the crate evolves, but is not a promise the crate makes
//! today.

pub mod connection;
pub mod migration;
pub mod network;
pub mod path;
pub mod session;
pub mod state;
pub mod stream_queue;
pub mod telemetry;
pub mod time;
pub mod writer;

/// Expands to nothing; stands in for [`tracing::debug`] when the
/// `migration-tracing` feature is disabled, so [`state`]'s transition
/// macros compile either way.
#[doc(hidden)]
#[macro_export]
macro_rules! __tracing_noop__ {
    ($($arg:tt)*) => {};
}
