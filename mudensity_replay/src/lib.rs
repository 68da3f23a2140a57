//! MU Density Replay Harness
//!
//! Stands in for the host map and the field table: replays a captured
//! timeline of comm log batches and geometry events through the engine,
//! then renders the resolved fields sorted by any column.

pub mod capture;
pub mod table;
pub mod view;

pub use capture::{Capture, HostEvent, Replay, ReplayError, ReplayTotals};
pub use table::{render_table, rows_json, sort_fields, Column, SortOrder};
pub use view::View;
