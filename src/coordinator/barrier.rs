//! Version barrier
//!
//! Tracks, per version, which members of the roster captured when the
//! version was opened have yet to report. The watermark (`min_version`) is
//! the newest version that has been fully reported along with everything
//! before it, and it never moves backwards.
//!
//! One implementation serves the configuration-ack, configuration-stable
//! and checkpoint-stable conditions.

use crate::common::ServerId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBarrier<M = ServerId> {
    /// Front entry is the watermark and always has nothing outstanding
    versions: VecDeque<(u64, Vec<M>)>,
}

impl<M: Ord + Copy> VersionBarrier<M> {
    pub fn new() -> Self {
        let mut versions = VecDeque::new();
        versions.push_back((0, Vec::new()));
        Self { versions }
    }

    /// Watermark: every version up to and including this one has passed
    pub fn min_version(&self) -> u64 {
        self.versions.front().map(|(v, _)| *v).unwrap_or(0)
    }

    /// Newest version opened
    pub fn latest_version(&self) -> u64 {
        self.versions.back().map(|(v, _)| *v).unwrap_or(0)
    }

    /// Members that still have to pass `version`, if it is being tracked
    pub fn outstanding(&self, version: u64) -> Option<&[M]> {
        self.versions
            .iter()
            .find(|(v, _)| *v == version)
            .map(|(_, m)| m.as_slice())
    }

    /// Open `version`, requiring exactly `roster` to pass it.
    ///
    /// Members absent from the new roster are no longer required to pass
    /// older versions either. Returns false (and changes nothing) unless
    /// `version` is newer than every version opened so far.
    pub fn new_version(&mut self, version: u64, roster: &[M]) -> bool {
        if version <= self.latest_version() {
            return false;
        }

        let mut roster = roster.to_vec();
        roster.sort();
        roster.dedup();

        for (_, outstanding) in self.versions.iter_mut() {
            outstanding.retain(|m| roster.binary_search(m).is_ok());
        }

        self.versions.push_back((version, roster));
        self.clear_prefix();
        true
    }

    /// Record that `member` has passed `version`, and with it every older
    /// version.
    pub fn pass(&mut self, version: u64, member: M) {
        for (v, outstanding) in self.versions.iter_mut() {
            if *v > version {
                break;
            }
            if let Ok(idx) = outstanding.binary_search(&member) {
                outstanding.remove(idx);
            }
        }

        self.clear_prefix();
    }

    /// Advance the watermark to the newest fully passed version.
    fn clear_prefix(&mut self) {
        let last_passed = self
            .versions
            .iter()
            .rposition(|(_, outstanding)| outstanding.is_empty());

        if let Some(idx) = last_passed {
            self.versions.drain(..idx);
        }
    }
}

impl<M: Ord + Copy> Default for VersionBarrier<M> {
    fn default() -> Self {
        Self::new()
    }
}
