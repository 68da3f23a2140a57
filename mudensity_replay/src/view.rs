//! Which resolved fields the table shows: all of them, the ones around a
//! point, or the ones inside a map rectangle.

use geo::{coord, Rect};
use mudensity_core::{Coordinate, FieldRegistry, ResolvedField};

use crate::capture::ReplayError;

/// Row selection applied before sorting.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    All,
    /// Centroids in the H3 cell of `center` or within `ring` cells of it
    Near { center: Coordinate, ring: u32 },
    /// Centroids inside a degree rectangle (x = longitude, y = latitude)
    Bounds(Rect<f64>),
}

impl View {
    /// Parse a `LAT,LNG` center.
    pub fn near(center: &str, ring: u32) -> Result<Self, ReplayError> {
        let [lat, lng] = parse_degrees::<2>(center)?;
        if lat.abs() > 90.0 || lng.abs() > 180.0 {
            return Err(ReplayError::InvalidView(format!("{} is off the map", center)));
        }
        Ok(View::Near {
            center: Coordinate::from_degrees(lat, lng),
            ring,
        })
    }

    /// Parse `SOUTH,WEST,NORTH,EAST` bounds.
    pub fn bounds(text: &str) -> Result<Self, ReplayError> {
        let [south, west, north, east] = parse_degrees::<4>(text)?;
        if south > north || west > east {
            return Err(ReplayError::InvalidView(format!(
                "{} (expected SOUTH,WEST,NORTH,EAST)",
                text
            )));
        }
        Ok(View::Bounds(Rect::new(
            coord! { x: west, y: south },
            coord! { x: east, y: north },
        )))
    }

    /// Selected fields, in registry insertion order.
    pub fn select<'a>(&self, registry: &'a FieldRegistry) -> Vec<&'a ResolvedField> {
        match self {
            View::All => registry.iter().collect(),
            View::Near { center, ring } => registry.near(*center, *ring),
            View::Bounds(rect) => registry.within_bounds(*rect).collect(),
        }
    }
}

fn parse_degrees<const N: usize>(text: &str) -> Result<[f64; N], ReplayError> {
    let invalid = || ReplayError::InvalidView(format!("{} (expected {} comma-separated degrees)", text, N));
    let values = text
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    <[f64; N]>::try_from(values).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mudensity_core::Portal;

    fn registry() -> FieldRegistry {
        let mut registry = FieldRegistry::default();
        for (lat, lng) in [(51.5, -0.12), (48.85, 2.35)] {
            let a = Coordinate::from_degrees(lat, lng);
            let b = Coordinate::from_degrees(lat + 0.01, lng);
            let c = Coordinate::from_degrees(lat + 0.005, lng + 0.01);
            registry.insert_if_absent(ResolvedField::new(Portal::at(a), Portal::at(b), Portal::at(c), 10, 1));
        }
        registry
    }

    #[test]
    fn test_all_keeps_insertion_order() {
        let registry = registry();
        let rows = View::All.select(&registry);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].latitude() > rows[1].latitude());
    }

    #[test]
    fn test_bounds_view() {
        let registry = registry();
        let london = View::bounds("51,-1,52,1").unwrap();
        let rows = london.select(&registry);

        assert_eq!(rows.len(), 1);
        assert!(rows[0].latitude() > 51.0);
        assert!(View::bounds("0,0,1,1").unwrap().select(&registry).is_empty());
    }

    #[test]
    fn test_near_view() {
        let registry = registry();
        let paris = registry.fields()[1].centroid;
        let view = View::near(&format!("{},{}", paris.lat(), paris.lng()), 1).unwrap();
        let rows = view.select(&registry);

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].centroid, paris);
        assert!(View::near("-33.86,151.2", 2).unwrap().select(&registry).is_empty());
    }

    #[test]
    fn test_invalid_views() {
        assert!(matches!(View::bounds("52,-1,51,1"), Err(ReplayError::InvalidView(_))));
        assert!(matches!(View::bounds("51,-1,52"), Err(ReplayError::InvalidView(_))));
        assert!(matches!(View::near("north,west", 1), Err(ReplayError::InvalidView(_))));
        assert!(matches!(View::near("95,0", 1), Err(ReplayError::InvalidView(_))));
    }
}
