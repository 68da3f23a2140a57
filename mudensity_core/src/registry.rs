//! Resolved-field registry: the deduplicated set of fields whose three
//! portals and captured quantity are known.
//!
//! Insertion is upsert-if-absent on `(anchor, apex, link timestamp)`, so
//! replaying the same log window never duplicates a field. Enumeration keeps
//! insertion order; sorting belongs to the display layer.

use std::collections::HashMap;

use geo::{Intersects, Rect};
use h3o::{CellIndex, Resolution};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry::{centroid, triangle_area, Coordinate};
use crate::host::Portal;

/// Uncertainty in the displayed quantity, in units.
pub const QUANTITY_SLACK: f64 = 0.5;

/// Registry key for a resolved field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    /// The link's origin portal
    pub anchor: Coordinate,
    /// The vertex not on the link
    pub apex: Coordinate,
    /// Rendered link timestamp
    pub timestamp: i64,
}

/// Density bounds implied by an integer quantity known to ±0.5.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityRange {
    pub low: f64,
    pub high: f64,
}

/// A field whose three portals and quantity are fully resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedField {
    /// Link origin
    pub vertex_a: Portal,
    /// Link target
    pub vertex_b: Portal,
    /// Third vertex
    pub vertex_c: Portal,

    pub quantity: u64,

    /// Area in km²
    pub area: f64,

    pub centroid: Coordinate,

    /// Rendered link timestamp (Unix milliseconds)
    pub timestamp: i64,
}

impl ResolvedField {
    pub fn new(vertex_a: Portal, vertex_b: Portal, vertex_c: Portal, quantity: u64, timestamp: i64) -> Self {
        let area = triangle_area(vertex_a.coord, vertex_b.coord, vertex_c.coord);
        let centroid = centroid(vertex_a.coord, vertex_b.coord, vertex_c.coord);
        Self {
            vertex_a,
            vertex_b,
            vertex_c,
            quantity,
            area,
            centroid,
            timestamp,
        }
    }

    pub fn key(&self) -> FieldKey {
        FieldKey {
            anchor: self.vertex_a.coord,
            apex: self.vertex_c.coord,
            timestamp: self.timestamp,
        }
    }

    /// Centroid latitude in degrees.
    pub fn latitude(&self) -> f64 {
        self.centroid.lat()
    }

    /// Centroid longitude in degrees.
    pub fn longitude(&self) -> f64 {
        self.centroid.lng()
    }

    /// Point estimate, quantity per km².
    pub fn density(&self) -> f64 {
        self.quantity as f64 / self.area
    }

    pub fn density_range(&self) -> DensityRange {
        let q = self.quantity as f64;
        DensityRange {
            low: (q - QUANTITY_SLACK) / self.area,
            high: (q + QUANTITY_SLACK) / self.area,
        }
    }

    pub fn vertices(&self) -> [&Portal; 3] {
        [&self.vertex_a, &self.vertex_b, &self.vertex_c]
    }
}

/// Keyed, insertion-ordered store of resolved fields with an H3 index on
/// field centroids.
#[derive(Debug)]
pub struct FieldRegistry {
    fields: Vec<ResolvedField>,
    index: HashMap<FieldKey, usize>,
    cells: HashMap<CellIndex, Vec<usize>>,
    resolution: Resolution,
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::new(Resolution::Nine)
    }
}

impl FieldRegistry {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            fields: Vec::new(),
            index: HashMap::new(),
            cells: HashMap::new(),
            resolution,
        }
    }

    /// Insert unless a field with the same key exists. Returns true on insert.
    pub fn insert_if_absent(&mut self, field: ResolvedField) -> bool {
        let key = field.key();
        if self.index.contains_key(&key) {
            return false;
        }

        let slot = self.fields.len();
        match field.centroid.to_cell(self.resolution) {
            Ok(cell) => self.cells.entry(cell).or_default().push(slot),
            Err(e) => warn!("Field stored without spatial index: {}", e),
        }

        self.index.insert(key, slot);
        self.fields.push(field);
        true
    }

    pub fn get(&self, key: &FieldKey) -> Option<&ResolvedField> {
        self.index.get(key).map(|&slot| &self.fields[slot])
    }

    pub fn contains(&self, key: &FieldKey) -> bool {
        self.index.contains_key(key)
    }

    /// All fields, in insertion order.
    pub fn fields(&self) -> &[ResolvedField] {
        &self.fields
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResolvedField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields whose centroid lies inside (or on the edge of) a degree
    /// rectangle, x = longitude and y = latitude.
    pub fn within_bounds(&self, bounds: Rect<f64>) -> impl Iterator<Item = &ResolvedField> + '_ {
        self.fields
            .iter()
            .filter(move |field| bounds.intersects(&field.centroid.to_point()))
    }

    /// Fields whose centroid falls in the H3 cell of `center` or its k-ring,
    /// in insertion order.
    pub fn near(&self, center: Coordinate, k: u32) -> Vec<&ResolvedField> {
        let cell = match center.to_cell(self.resolution) {
            Ok(cell) => cell,
            Err(_) => return Vec::new(),
        };

        let mut slots: Vec<usize> = cell
            .grid_disk_safe(k)
            .filter_map(|neighbor| self.cells.get(&neighbor))
            .flatten()
            .copied()
            .collect();
        slots.sort_unstable();

        slots.into_iter().map(|slot| &self.fields[slot]).collect()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}
