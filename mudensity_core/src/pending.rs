//! Pending-match store: links seen in the comm log that have not yet been
//! reconciled against rendered geometry.
//!
//! Keyed by origin coordinate, then by comm log timestamp. A link line and
//! its field lines share both keys, so they merge into the same bucket in
//! whatever order the log delivers them.

use std::collections::BTreeMap;

use tracing::trace;

use crate::comms::RawEvent;
use crate::geometry::Coordinate;
use crate::host::Portal;

/// Identity of a candidate third vertex.
///
/// Host guid when the triangle carried one, otherwise the coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexKey {
    Guid(String),
    Coord(Coordinate),
}

impl VertexKey {
    pub fn of(portal: &Portal) -> Self {
        match &portal.guid {
            Some(guid) => VertexKey::Guid(guid.clone()),
            None => VertexKey::Coord(portal.coord),
        }
    }
}

/// Lifecycle stage of a pending link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Field line seen, link line not yet
    AwaitingTarget,
    /// Target known, rendered link not found yet
    AwaitingLinkGeometry,
    /// Rendered link found, quantities and vertices not yet balanced
    AwaitingCompletion,
}

/// One link observed in the comm log, not yet matched to geometry.
#[derive(Debug, Clone)]
pub struct PendingLink {
    pub origin: Portal,
    pub target: Option<Portal>,

    /// Timestamp of the rendered link object, once found
    pub link_timestamp: Option<i64>,

    /// Comm log timestamp shared by the link line and its field lines
    pub comms_timestamp: i64,

    /// One entry per field line; several when one link closed several fields
    pub observed_quantities: Vec<u64>,

    /// Third vertices of triangles accepted for this link
    pub candidate_vertices: BTreeMap<VertexKey, Portal>,

    /// Consecutive refresh passes this link sat stale-eligible without change
    pub(crate) idle_passes: u32,
}

impl PendingLink {
    pub fn new(origin: Portal, comms_timestamp: i64) -> Self {
        Self {
            origin,
            target: None,
            link_timestamp: None,
            comms_timestamp,
            observed_quantities: Vec::new(),
            candidate_vertices: BTreeMap::new(),
            idle_passes: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        match (&self.target, self.link_timestamp) {
            (None, _) => LinkState::AwaitingTarget,
            (Some(_), None) => LinkState::AwaitingLinkGeometry,
            (Some(_), Some(_)) => LinkState::AwaitingCompletion,
        }
    }

    /// Record the link's target. A different target invalidates anything
    /// learned from geometry for the old one.
    pub fn set_target(&mut self, target: Portal) {
        let changed = self.target.as_ref().map(|t| t.coord) != Some(target.coord);
        if changed {
            self.link_timestamp = None;
            self.candidate_vertices.clear();
        }
        self.target = Some(target);
        self.touch();
    }

    pub fn push_quantity(&mut self, quantity: u64) {
        self.observed_quantities.push(quantity);
        self.touch();
    }

    /// Adopt the rendered link's timestamp and endpoint identities.
    pub fn adopt_link_geometry(&mut self, timestamp: i64, origin_guid: Option<String>, target_guid: Option<String>) {
        self.link_timestamp = Some(timestamp);
        if origin_guid.is_some() {
            self.origin.guid = origin_guid;
        }
        if let (Some(target), Some(guid)) = (self.target.as_mut(), target_guid) {
            target.guid = Some(guid);
        }
        self.touch();
    }

    /// Returns true when the vertex was not already a candidate.
    pub fn add_candidate(&mut self, vertex: Portal) -> bool {
        let key = VertexKey::of(&vertex);
        if self.candidate_vertices.contains_key(&key) {
            return false;
        }
        self.candidate_vertices.insert(key, vertex);
        self.touch();
        true
    }

    /// Every observed quantity has exactly one candidate vertex, and vice versa.
    pub fn is_complete(&self) -> bool {
        !self.observed_quantities.is_empty()
            && self.candidate_vertices.len() == self.observed_quantities.len()
    }

    /// Nothing left to wait for: a link whose field never came, or a field
    /// whose link line never arrived.
    pub fn is_stale_eligible(&self) -> bool {
        match &self.target {
            None => !self.observed_quantities.is_empty(),
            Some(_) => self.observed_quantities.is_empty(),
        }
    }

    fn touch(&mut self) {
        self.idle_passes = 0;
    }
}

/// Links awaiting reconciliation, keyed by origin then comm timestamp.
#[derive(Debug, Default)]
pub struct PendingStore {
    origins: BTreeMap<Coordinate, BTreeMap<i64, PendingLink>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a parsed event into the bucket for its origin and timestamp.
    pub fn ingest(&mut self, event: &RawEvent) -> &PendingLink {
        let bucket = self.origins.entry(event.origin.coord).or_default();
        let link = bucket.entry(event.timestamp).or_insert_with(|| {
            trace!("New pending link at {} (comms_ts={})", event.origin.coord, event.timestamp);
            PendingLink::new(event.origin.clone(), event.timestamp)
        });

        if link.origin.name.is_none() && event.origin.name.is_some() {
            link.origin.name = event.origin.name.clone();
        }
        if let Some(target) = &event.target {
            link.set_target(target.clone());
        }
        if let Some(quantity) = event.quantity {
            link.push_quantity(quantity);
        }

        link
    }

    pub fn get(&self, origin: Coordinate, comms_timestamp: i64) -> Option<&PendingLink> {
        self.origins.get(&origin)?.get(&comms_timestamp)
    }

    pub fn remove(&mut self, origin: Coordinate, comms_timestamp: i64) -> Option<PendingLink> {
        let bucket = self.origins.get_mut(&origin)?;
        let removed = bucket.remove(&comms_timestamp);
        if bucket.is_empty() {
            self.origins.remove(&origin);
        }
        removed
    }

    /// Keep only the links for which `keep` returns true. Empty origins are pruned.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&mut PendingLink) -> bool,
    {
        for bucket in self.origins.values_mut() {
            bucket.retain(|_, link| keep(link));
        }
        self.origins.retain(|_, bucket| !bucket.is_empty());
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingLink> {
        self.origins.values().flat_map(|bucket| bucket.values())
    }

    pub fn len(&self) -> usize {
        self.origins.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Comm timestamp of the oldest pending link.
    pub fn oldest_comms_timestamp(&self) -> Option<i64> {
        self.origins
            .values()
            .filter_map(|bucket| bucket.keys().next().copied())
            .min()
    }

    /// Number of distinct origin portals with pending links.
    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }
}
