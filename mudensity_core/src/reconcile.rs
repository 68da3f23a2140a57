//! The reconciliation engine.
//!
//! Pairs pending comm log links with rendered triangles and promotes
//! complete pairings into the field registry. Per pending link:
//!
//! 1. Link timestamp resolution (find the rendered link by its endpoints)
//! 2. Timestamp plausibility gate (is this triangle from this link?)
//! 3. Vertex matching (two vertices on the link, the third is a candidate)
//! 4. Completion check (quantities and candidate vertices balance)
//! 5. Rank assignment (smallest quantity to smallest area, and so on)
//! 6. Commit (quantity 1 is consumed, never stored)
//! 7. Garbage collection of links that will never complete
//!
//! There is no identity linking a log line to a triangle. When one link
//! closes several fields at once, larger fields are assumed to carry larger
//! quantities. That is usually right, and wrong guesses are accepted over
//! reporting nothing.

use h3o::Resolution;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::comms::{parse_record, EventKind, LogRecord, RawEvent, UnitQuantity};
use crate::error::RecordSkip;
use crate::geometry::Coordinate;
use crate::host::{GeometryView, Portal, Triangle};
use crate::pending::{PendingLink, PendingStore};
use crate::registry::{FieldRegistry, ResolvedField};
use crate::seen::{BatchTally, RecordKey, SeenRecords};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the Reconciler
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// How far (ms) a field's render time may precede its link (default: 3000)
    pub skew_window_ms: i64,

    /// Where a captured quantity of 1 is discarded (default: DeferToEngine)
    pub unit_quantity: UnitQuantity,

    /// Refresh passes a stale-eligible link survives unchanged (default: 2)
    pub stale_after_passes: u32,

    /// H3 resolution of the registry's spatial index (default: Resolution::Nine)
    pub h3_resolution: Resolution,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            skew_window_ms: 3000,
            unit_quantity: UnitQuantity::DeferToEngine,
            stale_after_passes: 2,
            h3_resolution: Resolution::Nine,
        }
    }
}

// ============================================================================
// REPORTS
// ============================================================================

/// Outcome counts for one log batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub links: usize,
    pub fields: usize,
    pub noise: usize,
    pub malformed: usize,
    pub duplicates: usize,
}

/// Outcome counts for one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Fields newly added to the registry
    pub committed: usize,
    /// Resolutions already present in the registry
    pub already_known: usize,
    /// Quantity-1 pairings consumed without a commit
    pub consumed_unit: usize,
    /// Zero-area pairings consumed without a commit
    pub degenerate: usize,
    /// Links whose rendered link is not loaded yet
    pub deferred: usize,
    /// Links dropped by garbage collection
    pub stale_dropped: usize,
    /// Links still pending after the pass
    pub pending: usize,
}

// ============================================================================
// MATCHING PRIMITIVES
// ============================================================================

/// Timestamp plausibility gate.
///
/// If the rendered link is no later than the log line, the triangle must
/// share the link's timestamp, or (when the link closed several fields)
/// render at most `window` ms before it. Otherwise both timestamps are
/// suspect and the triangle must render at most `window` ms before the log
/// line.
pub fn accepts_field_timestamp(
    link_ts: i64,
    comms_ts: i64,
    observed: usize,
    field_ts: i64,
    window: i64,
) -> bool {
    if link_ts <= comms_ts {
        field_ts == link_ts || (observed >= 2 && link_ts - field_ts <= window)
    } else {
        field_ts <= comms_ts && comms_ts - field_ts <= window
    }
}

/// The vertex of `triangle` that is not on the link `a`–`b`.
///
/// `None` unless one vertex sits on each endpoint and exactly one does not.
pub fn third_vertex(triangle: &Triangle, a: Coordinate, b: Coordinate) -> Option<&Portal> {
    let points = &triangle.points;
    if !points.iter().any(|p| p.coord == a) || !points.iter().any(|p| p.coord == b) {
        return None;
    }

    let mut others = points.iter().filter(|p| p.coord != a && p.coord != b);
    match (others.next(), others.next()) {
        (Some(third), None) => Some(third),
        _ => None,
    }
}

/// Pair sorted quantities with candidate fields sorted by area.
///
/// Caller guarantees the link is complete.
pub fn rank_assign(link: &PendingLink, target: &Portal, link_ts: i64) -> Vec<ResolvedField> {
    let mut candidates: Vec<ResolvedField> = link
        .candidate_vertices
        .values()
        .map(|apex| ResolvedField::new(link.origin.clone(), target.clone(), apex.clone(), 0, link_ts))
        .collect();
    candidates.sort_by(|a, b| a.area.total_cmp(&b.area));

    let mut quantities = link.observed_quantities.clone();
    quantities.sort_unstable();

    candidates
        .into_iter()
        .zip(quantities)
        .map(|(mut field, quantity)| {
            field.quantity = quantity;
            field
        })
        .collect()
}

/// Result of reconciling one pending link against some triangles.
#[derive(Debug)]
enum Outcome {
    /// Rendered link not loaded
    Deferred,
    /// Still waiting for quantities or triangles
    Waiting,
    /// Complete; fields ready to commit
    Resolved(Vec<ResolvedField>),
}

/// Steps 1-5 for one pending link.
fn reconcile_link<'t, G, I>(link: &mut PendingLink, triangles: I, geometry: &G, config: &ReconcileConfig) -> Outcome
where
    G: GeometryView + ?Sized,
    I: IntoIterator<Item = &'t Triangle>,
{
    let target = match &link.target {
        Some(target) => target.coord,
        None => return Outcome::Waiting,
    };
    let origin = link.origin.coord;

    // Step 1: link timestamp
    let link_ts = match link.link_timestamp {
        Some(ts) => ts,
        None => match geometry.find_link(origin, target) {
            Some(rendered) => {
                debug!(
                    "Link {} -> {} resolved to rendered link (link_ts={}, comms_ts={})",
                    origin, target, rendered.timestamp, link.comms_timestamp
                );
                link.adopt_link_geometry(
                    rendered.timestamp,
                    rendered.origin.guid.clone(),
                    rendered.destination.guid.clone(),
                );
                rendered.timestamp
            }
            None => {
                trace!("Link {} -> {} not rendered yet; deferring", origin, target);
                return Outcome::Deferred;
            }
        },
    };

    if link.is_complete() {
        return resolved(link, link_ts);
    }

    for triangle in triangles {
        // Step 2: plausibility gate
        if !accepts_field_timestamp(
            link_ts,
            link.comms_timestamp,
            link.observed_quantities.len(),
            triangle.timestamp,
            config.skew_window_ms,
        ) {
            continue;
        }

        // Step 3: vertex matching
        let Some(apex) = third_vertex(triangle, origin, target) else {
            continue;
        };
        let mut apex = apex.clone();
        if apex.name.is_none() {
            apex.name = apex
                .guid
                .as_deref()
                .and_then(|guid| geometry.portal_name(guid))
                .map(str::to_string);
        }
        if link.add_candidate(apex) {
            trace!(
                "Link {} -> {} gained candidate vertex ({} of {} quantities)",
                origin,
                target,
                link.candidate_vertices.len(),
                link.observed_quantities.len()
            );
        }

        // Step 4: completion
        if link.is_complete() {
            return resolved(link, link_ts);
        }
    }

    Outcome::Waiting
}

fn resolved(link: &PendingLink, link_ts: i64) -> Outcome {
    match &link.target {
        Some(target) => Outcome::Resolved(rank_assign(link, target, link_ts)),
        None => Outcome::Waiting,
    }
}

/// Step 6: commit assignments, skipping quantity 1 and zero-area fields.
fn commit(registry: &mut FieldRegistry, fields: Vec<ResolvedField>, report: &mut PassReport) {
    for field in fields {
        if field.quantity == 1 {
            report.consumed_unit += 1;
            continue;
        }
        if field.area.is_nan() || field.area <= 0.0 {
            debug!("Skipping degenerate field at {} (area={})", field.centroid, field.area);
            report.degenerate += 1;
            continue;
        }
        let (q, area) = (field.quantity, field.area);
        if registry.insert_if_absent(field) {
            debug!("Committed field: quantity={} area={:.3} km²", q, area);
            report.committed += 1;
        } else {
            report.already_known += 1;
        }
    }
}

// ============================================================================
// RECONCILER (The Engine)
// ============================================================================

/// Owns the pending-match store and the resolved-field registry, and exposes
/// the host triggers.
///
/// All triggers take `&mut self`, so a pass always sees a consistent store
/// and geometry snapshot. Hosts that share the engine across threads wrap it
/// in a single lock held for the whole trigger.
#[derive(Debug)]
pub struct Reconciler {
    config: ReconcileConfig,
    pending: PendingStore,
    registry: FieldRegistry,

    /// Records ingested within the replay horizon
    seen: SeenRecords,

    /// Refresh passes run so far
    passes: u64,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            registry: FieldRegistry::new(config.h3_resolution),
            pending: PendingStore::new(),
            seen: SeenRecords::new(),
            passes: 0,
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ReconcileConfig::default())
    }

    // ========================================================================
    // TRIGGERS
    // ========================================================================

    /// Parse a batch of comm log records into the pending-match store.
    pub fn on_log_batch(&mut self, records: &[LogRecord]) -> BatchReport {
        let mut report = BatchReport::default();
        let mut tally = BatchTally::new();

        for record in records {
            match self.ingest_record(record, &mut tally) {
                Ok(event) => match event.kind() {
                    EventKind::LinkCreated => report.links += 1,
                    EventKind::FieldCreated => report.fields += 1,
                },
                Err(RecordSkip::Noise) => report.noise += 1,
                Err(RecordSkip::Duplicate) => report.duplicates += 1,
                Err(skip) => {
                    trace!("Dropped record at {}: {}", record.timestamp, skip);
                    report.malformed += 1;
                }
            }
        }

        debug!(
            "Log batch: {} links, {} fields, {} noise, {} malformed, {} duplicates; {} pending across {} origins",
            report.links,
            report.fields,
            report.noise,
            report.malformed,
            report.duplicates,
            self.pending.len(),
            self.pending.origin_count()
        );
        report
    }

    fn ingest_record(&mut self, record: &LogRecord, tally: &mut BatchTally) -> Result<RawEvent, RecordSkip> {
        let event = parse_record(record, self.config.unit_quantity)?;
        if !self.seen.admit(event.timestamp, RecordKey::of(&event), tally) {
            return Err(RecordSkip::Duplicate);
        }
        self.ingest_event(&event);
        Ok(event)
    }

    /// Merge an already-parsed event into the pending-match store.
    pub fn ingest_event(&mut self, event: &RawEvent) {
        self.pending.ingest(event);
    }

    /// A single triangle was just rendered. Runs steps 1-6 against every
    /// pending link; never garbage collects.
    pub fn on_field_added<G>(&mut self, triangle: &Triangle, geometry: &G) -> PassReport
    where
        G: GeometryView + ?Sized,
    {
        let mut report = PassReport::default();
        let config = &self.config;
        let registry = &mut self.registry;

        self.pending.retain(|link| {
            match reconcile_link(link, std::iter::once(triangle), geometry, config) {
                Outcome::Resolved(fields) => {
                    commit(registry, fields, &mut report);
                    false
                }
                Outcome::Deferred => {
                    report.deferred += 1;
                    true
                }
                Outcome::Waiting => true,
            }
        });

        report.pending = self.pending.len();
        report
    }

    /// Recompute against the full rendered geometry. Call before every
    /// display render: drains whatever has become resolvable, then garbage
    /// collects links that will never complete.
    pub fn on_geometry_snapshot<G>(&mut self, geometry: &G) -> PassReport
    where
        G: GeometryView + ?Sized,
    {
        self.passes += 1;
        let mut report = PassReport::default();
        let config = &self.config;
        let registry = &mut self.registry;

        self.pending.retain(|link| {
            match reconcile_link(link, geometry.triangles(), geometry, config) {
                Outcome::Resolved(fields) => {
                    commit(registry, fields, &mut report);
                    return false;
                }
                Outcome::Deferred => report.deferred += 1,
                Outcome::Waiting => {}
            }

            // Step 7: garbage collection
            if !link.is_stale_eligible() {
                link.idle_passes = 0;
                return true;
            }
            link.idle_passes += 1;
            if link.idle_passes >= config.stale_after_passes {
                debug!(
                    "Dropping stale pending link at {} (comms_ts={}, quantities={})",
                    link.origin.coord,
                    link.comms_timestamp,
                    link.observed_quantities.len()
                );
                report.stale_dropped += 1;
                return false;
            }
            true
        });

        report.pending = self.pending.len();
        self.forget_old_records();
        info!(
            "Reconcile pass {}: {} committed, {} stale dropped, {} deferred, {} pending, {} fields known",
            self.passes,
            report.committed,
            report.stale_dropped,
            report.deferred,
            report.pending,
            self.registry.len()
        );
        report
    }

    /// Drop seen records no pending link or re-read window can still need:
    /// anything older than the oldest pending link (or the newest record
    /// when nothing is pending) by more than the skew window.
    fn forget_old_records(&mut self) {
        let anchor = match (self.pending.oldest_comms_timestamp(), self.seen.newest()) {
            (Some(pending), Some(newest)) => pending.min(newest),
            (Some(ts), None) | (None, Some(ts)) => ts,
            (None, None) => return,
        };
        let forgotten = self.seen.prune_before(anchor.saturating_sub(self.config.skew_window_ms));
        if forgotten > 0 {
            trace!("Forgot {} seen records older than {}", forgotten, anchor);
        }
    }

    /// The host reports that the link `origin -> target` was destroyed; any
    /// pending link between them can never complete.
    pub fn discard_link(&mut self, origin: Coordinate, target: Coordinate) -> usize {
        let stamps: Vec<i64> = self
            .pending
            .iter()
            .filter(|link| link.origin.coord == origin && link.target.as_ref().map(|t| t.coord) == Some(target))
            .map(|link| link.comms_timestamp)
            .collect();

        let discarded = stamps
            .into_iter()
            .filter_map(|ts| self.pending.remove(origin, ts))
            .count();
        if discarded > 0 {
            debug!("Discarded {} pending link(s) {} -> {}", discarded, origin, target);
        }
        discarded
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Resolved fields in insertion order.
    pub fn resolved_fields(&self) -> &[ResolvedField] {
        self.registry.fields()
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    /// Records remembered for replay detection.
    pub fn seen_records(&self) -> &SeenRecords {
        &self.seen
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Refresh passes run so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }
}

// ============================================================================
// TESTS
// ============================================================================
