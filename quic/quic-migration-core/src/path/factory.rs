// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::PathContext;
use crate::network::NetworkHandle;
use std::net::SocketAddr;

/// Why [`PathContextFactory::create`] failed to produce a path context.
#[derive(Clone, Debug, PartialEq, Eq, displaydoc::Display)]
pub enum CreationError {
    /// no local address is available on the requested network
    NoLocalAddress,
    /// binding the socket to the network failed: {0}
    BindFailed(String),
    /// connecting the socket to the peer failed: {0}
    ConnectFailed(String),
}

impl std::error::Error for CreationError {}

/// Receives the terminal result of an asynchronous [`PathContextFactory::create`]
/// call. Between the call and the terminal callback, the factory owns the
/// partially-constructed context; the manager does not need to cancel it —
/// on teardown it simply drops its delegate and discards a late callback.
pub trait CreationResultDelegate {
    fn on_creation_succeeded(&mut self, context: PathContext);
    fn on_creation_failed(&mut self, network: NetworkHandle, error: CreationError);
}

/// Asynchronously allocates, binds, and connects a datagram socket on a
/// given network toward a given peer, handing the result to a delegate.
///
/// Implementations are responsible for non-blocking I/O, send/receive
/// buffer sizing, and any platform "do not fragment" option; none of that
/// is visible to the migration engine.
pub trait PathContextFactory {
    /// Starts creating a path context. `delegate` receives exactly one of
    /// `on_creation_succeeded`/`on_creation_failed`, asynchronously.
    fn create(
        &mut self,
        network: NetworkHandle,
        peer_address: SocketAddr,
        delegate: Box<dyn CreationResultDelegate>,
    );
}
