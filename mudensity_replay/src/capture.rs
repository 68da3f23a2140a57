//! Captured host event timelines and the driver that replays them.
//!
//! A capture is the sequence of things the host map would have told the
//! engine: comm log batches, geometry snapshots, single rendered links and
//! triangles, link destructions and display refreshes.

use std::fs;
use std::path::{Path, PathBuf};

use mudensity_core::{
    BatchReport, Coordinate, GeometrySnapshot, LogRecord, PassReport, ReconcileConfig, Reconciler,
    RenderedLink, Triangle,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Replay errors
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read capture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed capture: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown column: {0} (expected lat, lng, portals, area, quantity, density)")]
    UnknownColumn(String),

    #[error("Invalid view: {0}")]
    InvalidView(String),
}

/// One host notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    /// A batch of comm log records became available
    Log { records: Vec<LogRecord> },

    /// The host replaced its rendered geometry wholesale
    Geometry(GeometrySnapshot),

    /// A single link was rendered
    LinkAdded { link: RenderedLink },

    /// A single field triangle was rendered
    FieldAdded { triangle: Triangle },

    /// A link was destroyed
    LinkDestroyed { origin: Coordinate, target: Coordinate },

    /// The display was opened or refreshed
    Refresh,
}

/// A full capture file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Capture {
    #[serde(default)]
    pub events: Vec<HostEvent>,
}

impl Capture {
    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

/// Running totals across a replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayTotals {
    pub batches: BatchReport,
    pub passes: usize,
    pub committed: usize,
    pub stale_dropped: usize,
}

impl ReplayTotals {
    fn add_batch(&mut self, report: &BatchReport) {
        self.batches.links += report.links;
        self.batches.fields += report.fields;
        self.batches.noise += report.noise;
        self.batches.malformed += report.malformed;
        self.batches.duplicates += report.duplicates;
    }

    fn add_pass(&mut self, report: &PassReport) {
        self.passes += 1;
        self.committed += report.committed;
        self.stale_dropped += report.stale_dropped;
    }
}

/// Plays host events into an engine, keeping the host's current geometry.
#[derive(Debug)]
pub struct Replay {
    engine: Reconciler,
    geometry: GeometrySnapshot,
    totals: ReplayTotals,
}

impl Replay {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            engine: Reconciler::new(config),
            geometry: GeometrySnapshot::new(),
            totals: ReplayTotals::default(),
        }
    }

    pub fn apply(&mut self, event: &HostEvent) {
        match event {
            HostEvent::Log { records } => {
                let report = self.engine.on_log_batch(records);
                self.totals.add_batch(&report);
            }
            HostEvent::Geometry(snapshot) => {
                self.geometry = snapshot.clone();
                self.refresh();
            }
            HostEvent::LinkAdded { link } => {
                self.geometry.links.push(link.clone());
            }
            HostEvent::FieldAdded { triangle } => {
                self.geometry.triangles.push(triangle.clone());
                let report = self.engine.on_field_added(triangle, &self.geometry);
                self.totals.committed += report.committed;
            }
            HostEvent::LinkDestroyed { origin, target } => {
                self.geometry
                    .links
                    .retain(|l| !(l.origin.coord == *origin && l.destination.coord == *target));
                self.engine.discard_link(*origin, *target);
            }
            HostEvent::Refresh => self.refresh(),
        }
    }

    /// Replay every event, then refresh once more as the display would
    /// before rendering.
    pub fn run(&mut self, capture: &Capture) -> &ReplayTotals {
        info!("Replaying {} host events", capture.events.len());
        for (i, event) in capture.events.iter().enumerate() {
            debug!("Event {}: {}", i, event.name());
            self.apply(event);
        }
        self.refresh();
        &self.totals
    }

    fn refresh(&mut self) {
        let report = self.engine.on_geometry_snapshot(&self.geometry);
        self.totals.add_pass(&report);
    }

    pub fn engine(&self) -> &Reconciler {
        &self.engine
    }

    pub fn totals(&self) -> &ReplayTotals {
        &self.totals
    }
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::Log { .. } => "log",
            HostEvent::Geometry(_) => "geometry",
            HostEvent::LinkAdded { .. } => "link_added",
            HostEvent::FieldAdded { .. } => "field_added",
            HostEvent::LinkDestroyed { .. } => "link_destroyed",
            HostEvent::Refresh => "refresh",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::View;

    const CAPTURE: &str = r#"{"events": [
        {"kind": "log", "records": [
            ["l1", 1700000005000, {"plext": {"markup": [
                ["PLAYER", {"plain": "agent"}],
                ["TEXT", {"plain": " linked "}],
                ["PORTAL", {"name": "Origin", "latE6": 51500000, "lngE6": -120000}],
                ["TEXT", {"plain": " to "}],
                ["PORTAL", {"name": "Target", "latE6": 51510000, "lngE6": -120000}]
            ]}}],
            ["f1", 1700000005000, {"plext": {"markup": [
                ["PLAYER", {"plain": "agent"}],
                ["TEXT", {"plain": " created a Control Field @"}],
                ["PORTAL", {"name": "Origin", "latE6": 51500000, "lngE6": -120000}],
                ["TEXT", {"plain": " +"}],
                ["TEXT", {"plain": "250"}],
                ["TEXT", {"plain": " MUs"}]
            ]}}]
        ]},
        {"kind": "link_added", "link": {
            "origin": {"guid": "o", "latE6": 51500000, "lngE6": -120000},
            "destination": {"guid": "t", "latE6": 51510000, "lngE6": -120000},
            "timestamp": 1700000004000
        }},
        {"kind": "field_added", "triangle": {
            "timestamp": 1700000004000,
            "points": [
                {"guid": "o", "latE6": 51500000, "lngE6": -120000},
                {"guid": "t", "latE6": 51510000, "lngE6": -120000},
                {"guid": "x", "latE6": 51505000, "lngE6": -110000}
            ]
        }},
        {"kind": "refresh"}
    ]}"#;

    #[test]
    fn test_replay_capture() {
        let capture = Capture::from_json(CAPTURE).unwrap();
        assert_eq!(capture.events.len(), 4);

        let mut replay = Replay::new(ReconcileConfig::default());
        let totals = replay.run(&capture).clone();

        assert_eq!(totals.batches.links, 1);
        assert_eq!(totals.batches.fields, 1);
        assert_eq!(totals.committed, 1);
        assert_eq!(totals.passes, 2);

        let fields = replay.engine().resolved_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].quantity, 250);
        assert_eq!(fields[0].vertex_c.guid.as_deref(), Some("x"));

        let registry = replay.engine().registry();
        assert_eq!(View::bounds("51,-1,52,1").unwrap().select(registry).len(), 1);
        assert!(View::bounds("48,2,49,3").unwrap().select(registry).is_empty());
    }

    #[test]
    fn test_link_destroyed_discards_pending() {
        let json = r#"{"events": [
            {"kind": "log", "records": [
                ["f1", 1000, {"plext": {"markup": [
                    ["TEXT", {"plain": "created a Control Field @"}],
                    ["PORTAL", {"name": "A", "latE6": 1, "lngE6": 1}],
                    ["TEXT", {"plain": "5"}]
                ]}}],
                ["l1", 1000, {"plext": {"markup": [
                    ["PORTAL", {"name": "A", "latE6": 1, "lngE6": 1}],
                    ["TEXT", {"plain": " to "}],
                    ["PORTAL", {"name": "B", "latE6": 2, "lngE6": 2}]
                ]}}]
            ]},
            {"kind": "link_destroyed", "origin": {"latE6": 1, "lngE6": 1}, "target": {"latE6": 2, "lngE6": 2}}
        ]}"#;

        let capture = Capture::from_json(json).unwrap();
        let mut replay = Replay::new(ReconcileConfig::default());
        for event in &capture.events {
            replay.apply(event);
        }
        assert!(replay.engine().pending().is_empty());
    }

    #[test]
    fn test_malformed_capture_is_an_error() {
        assert!(matches!(
            Capture::from_json(r#"{"events": [{"kind": "teleport"}]}"#),
            Err(ReplayError::Json(_))
        ));
        assert!(matches!(
            Capture::load("/nonexistent/capture.json"),
            Err(ReplayError::Io { .. })
        ));
    }
}
