// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The retry loop that keeps trying to migrate a session back onto the
//! platform's default network after it was forced onto a non-default one.

use crate::time::{Timer, Timestamp};
use core::time::Duration;

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Drives the exponentially-backed-off retries of
/// `OnMigrateBackToDefaultNetwork`, starting at one second and doubling on
/// every failed attempt, until `max_time_on_non_default_network` has elapsed
/// since the session first left the default network.
pub struct MigrateBackTimer {
    timer: Timer,
    next_delay: Duration,
    deadline: Timestamp,
    max_time_on_non_default_network: Duration,
}

impl MigrateBackTimer {
    /// Starts the loop: `left_default_at` is when the session was forced off
    /// the default network, and the first retry is armed one second later.
    pub fn start(left_default_at: Timestamp, max_time_on_non_default_network: Duration) -> Self {
        let mut timer = Timer::default();
        timer.set(left_default_at + INITIAL_RETRY_DELAY);
        Self {
            timer,
            next_delay: INITIAL_RETRY_DELAY,
            deadline: left_default_at + max_time_on_non_default_network,
            max_time_on_non_default_network,
        }
    }

    /// Returns true if the retry timer has fired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.timer.is_expired(now)
    }

    /// Returns true once the session has been off the default network longer
    /// than `max_time_on_non_default_network`; the manager should stop
    /// retrying and report [`crate::migration::MigrationStatus::Timeout`].
    pub fn has_given_up(&self, now: Timestamp) -> bool {
        self.deadline.has_elapsed(now)
    }

    /// Rearms the timer after a failed retry, doubling the delay, and caps
    /// it so a lone scheduled wakeup never lands after the give-up deadline.
    pub fn reschedule(&mut self, now: Timestamp) {
        self.timer.cancel();
        self.next_delay = self.next_delay.saturating_mul(2);
        let remaining = self.deadline.saturating_duration_since(now);
        let delay = self.next_delay.min(remaining.max(Duration::from_millis(1)));
        self.timer.set(now + delay);
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    pub fn max_time_on_non_default_network(&self) -> Duration {
        self.max_time_on_non_default_network
    }
}
