//! Sortable field table.
//!
//! A fixed list of columns, each with a title, a sort key and a formatter.

use std::cmp::Ordering;
use std::str::FromStr;

use mudensity_core::ResolvedField;
use serde_json::{json, Value};

use crate::capture::ReplayError;

/// Table columns, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Latitude,
    Longitude,
    Portals,
    Area,
    Quantity,
    Density,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::Latitude,
        Column::Longitude,
        Column::Portals,
        Column::Area,
        Column::Quantity,
        Column::Density,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Column::Latitude => "Latitude",
            Column::Longitude => "Longitude",
            Column::Portals => "Portals",
            Column::Area => "Area",
            Column::Quantity => "Total MU",
            Column::Density => "MU density",
        }
    }

    /// Sort key, or `None` for columns that do not sort.
    pub fn sort_value(&self, field: &ResolvedField) -> Option<f64> {
        match self {
            Column::Latitude => Some(field.centroid.lat_e6 as f64),
            Column::Longitude => Some(field.centroid.lng_e6 as f64),
            Column::Portals => None,
            Column::Area => Some(field.area),
            Column::Quantity => Some(field.quantity as f64),
            Column::Density => Some(field.density()),
        }
    }

    pub fn format(&self, field: &ResolvedField) -> String {
        match self {
            Column::Latitude => format!("{:.6}", field.latitude()),
            Column::Longitude => format!("{:.6}", field.longitude()),
            Column::Portals => field
                .vertices()
                .iter()
                .map(|p| format!("[{}]", p.label()))
                .collect::<Vec<_>>()
                .join(" "),
            Column::Area => format!("{:.3} km²", field.area),
            Column::Quantity => field.quantity.to_string(),
            Column::Density => {
                let range = field.density_range();
                format!("{:.3}-{:.3} MU/km²", range.low, range.high)
            }
        }
    }

    /// Order used when a column is first selected.
    pub fn default_order(&self) -> SortOrder {
        match self {
            Column::Density => SortOrder::Descending,
            _ => SortOrder::Ascending,
        }
    }
}

impl FromStr for Column {
    type Err = ReplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lat" | "latitude" => Ok(Column::Latitude),
            "lng" | "lon" | "longitude" => Ok(Column::Longitude),
            "portals" => Ok(Column::Portals),
            "area" => Ok(Column::Area),
            "mu" | "quantity" => Ok(Column::Quantity),
            "density" => Ok(Column::Density),
            _ => Err(ReplayError::UnknownColumn(s.to_string())),
        }
    }
}

/// Fields ordered by a column. Unsortable columns keep insertion order;
/// ties keep insertion order too.
pub fn sort_fields<'a>(
    fields: impl IntoIterator<Item = &'a ResolvedField>,
    column: Column,
    order: SortOrder,
) -> Vec<&'a ResolvedField> {
    let mut rows: Vec<&ResolvedField> = fields.into_iter().collect();
    rows.sort_by(|a, b| {
        let ordering = match (column.sort_value(a), column.sort_value(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
    rows
}

/// Render sorted rows as an aligned text table.
pub fn render_table(rows: &[&ResolvedField], sorted_by: Column) -> String {
    if rows.is_empty() {
        return "Nothing to show!\n".to_string();
    }

    let mut header = vec!["#".to_string()];
    header.extend(Column::ALL.iter().map(|c| {
        if *c == sorted_by {
            format!("{}*", c.title())
        } else {
            c.title().to_string()
        }
    }));

    let body: Vec<Vec<String>> = rows
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let mut cells = vec![(i + 1).to_string()];
            cells.extend(Column::ALL.iter().map(|c| c.format(field)));
            cells
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|col| {
            std::iter::once(&header)
                .chain(body.iter())
                .map(|row| row[col].chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = format!(
        "MU Density: {} {}\n",
        rows.len(),
        if rows.len() == 1 { "field" } else { "fields" }
    );
    for row in std::iter::once(&header).chain(body.iter()) {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:>width$}", cell, width = *width))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

/// Sorted rows as JSON objects.
pub fn rows_json(rows: &[&ResolvedField]) -> Value {
    Value::Array(
        rows.iter()
            .map(|field| {
                let range = field.density_range();
                json!({
                    "latitude": field.latitude(),
                    "longitude": field.longitude(),
                    "portals": field.vertices().iter().map(|p| p.label()).collect::<Vec<_>>(),
                    "area_km2": field.area,
                    "quantity": field.quantity,
                    "density_low": range.low,
                    "density_high": range.high,
                    "timestamp": field.timestamp,
                })
            })
            .collect(),
    )
}
