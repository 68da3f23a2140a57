//! Inputs supplied by the host map: portals, rendered links and rendered
//! field triangles.
//!
//! The engine never owns the map. It reads whatever the host has rendered
//! through [`GeometryView`], so a live map, a captured snapshot, or a test
//! fixture are interchangeable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::Coordinate;

/// A portal as seen by the engine: a fixed-point position plus whatever
/// identity the source knew about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portal {
    #[serde(flatten)]
    pub coord: Coordinate,

    /// Stable host identity, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,

    /// Portal title, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Portal {
    pub fn at(coord: Coordinate) -> Self {
        Self {
            coord,
            guid: None,
            name: None,
        }
    }

    pub fn named(coord: Coordinate, name: impl Into<String>) -> Self {
        Self {
            coord,
            guid: None,
            name: Some(name.into()),
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Title for display, falling back to the coordinate.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.coord.to_string(),
        }
    }
}

/// A directed link currently rendered on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedLink {
    pub origin: Portal,
    pub destination: Portal,

    /// Render timestamp (Unix milliseconds); differs from the comm log time
    pub timestamp: i64,
}

/// A control field triangle currently rendered on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    /// Opaque host identity of the field itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,

    /// Render timestamp (Unix milliseconds)
    pub timestamp: i64,

    pub points: [Portal; 3],
}

impl Triangle {
    pub fn new(timestamp: i64, points: [Portal; 3]) -> Self {
        Self {
            guid: None,
            timestamp,
            points,
        }
    }
}

/// Read access to the host's rendered geometry.
///
/// Implementations must not change underneath a reconciliation pass; the
/// engine takes `&self` for the whole pass.
pub trait GeometryView {
    /// All links currently rendered.
    fn links(&self) -> &[RenderedLink];

    /// All field triangles currently rendered.
    fn triangles(&self) -> &[Triangle];

    /// Title of a portal by host identity.
    fn portal_name(&self, _guid: &str) -> Option<&str> {
        None
    }

    /// The rendered link running exactly from `origin` to `destination`.
    fn find_link(&self, origin: Coordinate, destination: Coordinate) -> Option<&RenderedLink> {
        self.links()
            .iter()
            .find(|link| link.origin.coord == origin && link.destination.coord == destination)
    }
}

/// An owned, materialized copy of the host geometry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeometrySnapshot {
    #[serde(default)]
    pub links: Vec<RenderedLink>,

    #[serde(default)]
    pub triangles: Vec<Triangle>,

    /// Portal titles keyed by guid
    #[serde(default)]
    pub portals: HashMap<String, String>,
}

impl GeometrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(mut self, link: RenderedLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_triangle(mut self, triangle: Triangle) -> Self {
        self.triangles.push(triangle);
        self
    }

    pub fn with_portal_name(mut self, guid: impl Into<String>, name: impl Into<String>) -> Self {
        self.portals.insert(guid.into(), name.into());
        self
    }
}

impl GeometryView for GeometrySnapshot {
    fn links(&self) -> &[RenderedLink] {
        &self.links
    }

    fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    fn portal_name(&self, guid: &str) -> Option<&str> {
        self.portals.get(guid).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_link_is_directed() {
        let a = Coordinate::new(1, 1);
        let b = Coordinate::new(2, 2);
        let snapshot = GeometrySnapshot::new().with_link(RenderedLink {
            origin: Portal::at(a),
            destination: Portal::at(b),
            timestamp: 1000,
        });

        assert_eq!(snapshot.find_link(a, b).map(|l| l.timestamp), Some(1000));
        assert!(snapshot.find_link(b, a).is_none());
    }

    #[test]
    fn test_snapshot_deserializes_host_shape() {
        let json = r#"{
            "links": [{
                "origin": {"guid": "o.16", "latE6": 10, "lngE6": 20},
                "destination": {"guid": "d.16", "latE6": 30, "lngE6": 40},
                "timestamp": 1500
            }],
            "triangles": [{
                "guid": "f.9",
                "timestamp": 1500,
                "points": [
                    {"guid": "o.16", "latE6": 10, "lngE6": 20},
                    {"guid": "d.16", "latE6": 30, "lngE6": 40},
                    {"guid": "x.16", "latE6": 50, "lngE6": 60}
                ]
            }],
            "portals": {"x.16": "Fountain"}
        }"#;

        let snapshot: GeometrySnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.links.len(), 1);
        assert_eq!(snapshot.triangles[0].points[2].coord, Coordinate::new(50, 60));
        assert_eq!(snapshot.triangles[0].points[0].guid.as_deref(), Some("o.16"));
        assert_eq!(snapshot.portal_name("x.16"), Some("Fountain"));
        assert_eq!(snapshot.portal_name("o.16"), None);
    }

    #[test]
    fn test_portal_label_falls_back_to_coordinate() {
        let p = Portal::at(Coordinate::new(1_500_000, -2_250_000));
        assert_eq!(p.label(), "1.500000,-2.250000");
        assert_eq!(Portal::named(p.coord, "Gate").label(), "Gate");
    }
}
