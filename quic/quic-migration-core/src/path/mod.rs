// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A single datagram path: a bound, connected socket plus the reader and
//! writer attached to it.

mod factory;
mod packet;

pub use factory::{CreationError, CreationResultDelegate, PathContextFactory};
pub use packet::Packet;

use crate::{network::NetworkHandle, writer::PacketWriter};
use std::{net::SocketAddr, os::fd::RawFd};

/// An owned, single-use bundle produced by a [`PathContextFactory`].
///
/// Invariant: the socket is connected to `peer_addr` via `network`; the
/// writer is bound to that same socket. Ownership moves into the connection
/// on a successful migration, or the whole bundle is simply dropped
/// (closing the socket) if the probe is abandoned.
pub struct PathContext {
    self_addr: SocketAddr,
    peer_addr: SocketAddr,
    network: NetworkHandle,
    socket: RawFd,
    writer: Box<dyn PacketWriter>,
}

impl PathContext {
    pub fn new(
        self_addr: SocketAddr,
        peer_addr: SocketAddr,
        network: NetworkHandle,
        socket: RawFd,
        writer: Box<dyn PacketWriter>,
    ) -> Self {
        Self {
            self_addr,
            peer_addr,
            network,
            socket,
            writer,
        }
    }

    pub fn self_addr(&self) -> SocketAddr {
        self.self_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn network(&self) -> NetworkHandle {
        self.network
    }

    pub fn socket(&self) -> RawFd {
        self.socket
    }

    pub fn writer(&mut self) -> &mut dyn PacketWriter {
        self.writer.as_mut()
    }

    pub fn into_writer(self) -> Box<dyn PacketWriter> {
        self.writer
    }
}

impl core::fmt::Debug for PathContext {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("PathContext")
            .field("self_addr", &self.self_addr)
            .field("peer_addr", &self.peer_addr)
            .field("network", &self.network)
            .field("socket", &self.socket)
            .finish()
    }
}
