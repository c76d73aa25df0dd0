// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tracks in-flight path validation probes so the manager never starts two
//! PATH_CHALLENGE probes against the same candidate path at once.

use crate::network::NetworkHandle;
use smallvec::SmallVec;
use std::net::SocketAddr;

/// The amount of concurrent probes that can be tracked without using the heap.
const STATIC_DEFAULT_PROBES: usize = 4;

/// What a pending probe is for, carried through so the completion delegate
/// knows which follow-up action to take without needing its own subtype.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProbeKind {
    /// validating a candidate network before a full migration
    Network,
    /// validating a new local port on the same network
    Port,
    /// validating the peer's server-preferred address
    ServerPreferredAddress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ProbeKey {
    network: NetworkHandle,
    peer_address: SocketAddr,
}

struct PendingProbe {
    key: ProbeKey,
    kind: ProbeKind,
}

/// A registry of path validations currently in flight.
///
/// Mirrors the key used by the server-side path manager's dedup lookup
/// (network, peer address) but here the registry only tracks *pending*
/// probes rather than owning the path state itself: the candidate path is
/// created asynchronously via [`crate::path::factory::PathContextFactory`]
/// and only promoted to an active path once validation succeeds.
#[derive(Default)]
pub struct ProbeRegistry {
    pending: SmallVec<[PendingProbe; STATIC_DEFAULT_PROBES]>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self {
            pending: SmallVec::new(),
        }
    }

    /// Returns true if a probe for this (network, peer address) pair is
    /// already running.
    pub fn is_probing(&self, network: NetworkHandle, peer_address: SocketAddr) -> bool {
        let key = ProbeKey {
            network,
            peer_address,
        };
        self.pending.iter().any(|probe| probe.key == key)
    }

    /// Registers a new probe. Returns `false` without inserting if one for
    /// the same (network, peer address) is already pending.
    pub fn start(
        &mut self,
        network: NetworkHandle,
        peer_address: SocketAddr,
        kind: ProbeKind,
    ) -> bool {
        if self.is_probing(network, peer_address) {
            return false;
        }
        self.pending.push(PendingProbe {
            key: ProbeKey {
                network,
                peer_address,
            },
            kind,
        });
        true
    }

    /// Removes and returns the kind of a completed probe, if one was pending.
    pub fn finish(&mut self, network: NetworkHandle, peer_address: SocketAddr) -> Option<ProbeKind> {
        let key = ProbeKey {
            network,
            peer_address,
        };
        let index = self.pending.iter().position(|probe| probe.key == key)?;
        Some(self.pending.remove(index).kind)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn starting_a_duplicate_probe_is_rejected() {
        let mut registry = ProbeRegistry::new();
        let net = NetworkHandle::new(1);
        assert!(registry.start(net, addr(443), ProbeKind::Network));
        assert!(!registry.start(net, addr(443), ProbeKind::Network));
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn different_peers_on_same_network_dont_collide() {
        let mut registry = ProbeRegistry::new();
        let net = NetworkHandle::new(1);
        assert!(registry.start(net, addr(443), ProbeKind::Network));
        assert!(registry.start(net, addr(444), ProbeKind::Port));
        assert_eq!(registry.pending_count(), 2);
    }

    #[test]
    fn finish_removes_and_returns_kind() {
        let mut registry = ProbeRegistry::new();
        let net = NetworkHandle::new(2);
        registry.start(net, addr(9000), ProbeKind::ServerPreferredAddress);
        assert_eq!(
            registry.finish(net, addr(9000)),
            Some(ProbeKind::ServerPreferredAddress)
        );
        assert_eq!(registry.finish(net, addr(9000)), None);
    }
}
