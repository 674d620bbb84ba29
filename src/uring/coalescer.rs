//! Submission coalescer
//!
//! Tracks which byte extents are currently being read, keyed by the
//! (file descriptor, offset) a request starts at, and decides which regions
//! of a new request need a ring submission and which can be served by a read
//! that is already in flight.
//!
//! A region is described by its [`Extent`]: its start relative to the key
//! offset and its length. Duplicates are matched on the whole extent, not on
//! length alone, so two different regions that happen to have the same length
//! are never conflated.
//!
//! Every submission holds one reference on each extent it covers, whether it
//! reads the bytes itself or follows another submission. The first submission
//! that reads an extent is its leader; later requests for the same extent follow
//! the leader and receive its bytes when it completes. An extent leaves the map
//! once every holder has been reaped, and a key once it has no extents left.

use std::collections::{BTreeMap, HashMap};
use std::os::unix::io::RawFd;

use super::context::Token;

/// Identifies a tracked in-flight read by where it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingIoKey {
    pub fd: RawFd,
    pub offset: u64,
}

/// A region of a vectored read, relative to its key's offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Extent {
    pub start: u64,
    pub len: usize,
}

impl Extent {
    /// Lay consecutive regions of the given lengths end to end
    pub fn layout(lens: &[usize]) -> Vec<Extent> {
        let mut start = 0u64;
        lens.iter()
            .map(|&len| {
                let extent = Extent { start, len };
                start += len as u64;
                extent
            })
            .collect()
    }
}

#[derive(Debug)]
struct InFlightExtent {
    /// Submission currently reading these bytes, if it has not completed yet
    leader: Option<Token>,
    /// Unreaped submissions referencing this extent
    holders: usize,
}

/// What to do with one region of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegionPlan {
    /// Read the region as part of this request's own submission
    Submit,
    /// Take the bytes from the leading submission
    Follow(Token),
}

/// Per-region decisions for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Plan {
    pub regions: Vec<RegionPlan>,
}

impl Plan {
    /// Indices of the regions this request reads itself, in file order
    pub fn submitted(&self) -> impl Iterator<Item = usize> + '_ {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, p)| **p == RegionPlan::Submit)
            .map(|(i, _)| i)
    }

    /// (region index, leader) for every region served by another submission
    pub fn followed(&self) -> impl Iterator<Item = (usize, Token)> + '_ {
        self.regions.iter().enumerate().filter_map(|(i, p)| match p {
            RegionPlan::Follow(leader) => Some((i, *leader)),
            RegionPlan::Submit => None,
        })
    }

    /// True when every region is already in flight and only a no-op is needed
    pub fn is_noop(&self) -> bool {
        self.submitted().next().is_none()
    }
}

/// Pending-I/O map
#[derive(Debug, Default)]
pub struct PendingIo {
    entries: HashMap<PendingIoKey, BTreeMap<Extent, InFlightExtent>>,
}

impl PendingIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide which regions need a new read; does not modify the map
    ///
    /// One vectored read covers a contiguous byte range, so a duplicate that
    /// sits between two regions that must be read is read again rather than
    /// followed. Only duplicate prefixes and suffixes are dropped.
    pub(crate) fn plan(&self, key: &PendingIoKey, extents: &[Extent]) -> Plan {
        let tracked = self.entries.get(key);

        let mut regions: Vec<RegionPlan> = extents
            .iter()
            .map(|extent| {
                match tracked
                    .and_then(|m| m.get(extent))
                    .and_then(|e| e.leader)
                {
                    Some(leader) => RegionPlan::Follow(leader),
                    None => RegionPlan::Submit,
                }
            })
            .collect();

        let first = regions.iter().position(|p| *p == RegionPlan::Submit);
        let last = regions.iter().rposition(|p| *p == RegionPlan::Submit);
        if let (Some(first), Some(last)) = (first, last) {
            for plan in &mut regions[first..=last] {
                *plan = RegionPlan::Submit;
            }
        }

        Plan { regions }
    }

    /// Record a submission that made it into the ring
    pub(crate) fn commit(&mut self, key: PendingIoKey, token: Token, extents: &[Extent], plan: &Plan) {
        let tracked = self.entries.entry(key).or_default();

        for (extent, decision) in extents.iter().zip(&plan.regions) {
            let entry = tracked.entry(*extent).or_insert(InFlightExtent {
                leader: None,
                holders: 0,
            });
            entry.holders += 1;
            if *decision == RegionPlan::Submit && entry.leader.is_none() {
                entry.leader = Some(token);
            }
        }
    }

    /// Drop a reaped submission's references
    pub(crate) fn release(&mut self, key: &PendingIoKey, token: Token, extents: &[Extent]) {
        let Some(tracked) = self.entries.get_mut(key) else {
            tracing::error!(?key, "released a key that is not pending");
            return;
        };

        for extent in extents {
            let Some(entry) = tracked.get_mut(extent) else {
                tracing::error!(?key, ?extent, "released an extent that is not pending");
                continue;
            };
            if entry.leader == Some(token) {
                entry.leader = None;
            }
            entry.holders -= 1;
            if entry.holders == 0 {
                tracked.remove(extent);
            }
        }

        if tracked.is_empty() {
            self.entries.remove(key);
        }
    }

    /// Number of keys with at least one extent in flight
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &PendingIoKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Extents in flight for one key, in order
    pub fn extents(&self, key: &PendingIoKey) -> Vec<Extent> {
        self.entries
            .get(key)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }
}
