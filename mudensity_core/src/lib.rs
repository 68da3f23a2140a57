//! MU Density Core - Field Reconciliation Engine
//!
//! Infers which three portals bound each newly created control field, and
//! how much it captured, from two sources that never reference each other:
//! 1. **Comm log**: noisy, unordered, possibly repeated link and field lines
//! 2. **Map geometry**: rendered links and triangles, arriving later and in any order
//!
//! The engine pairs them by exact coordinate and timestamp plausibility,
//! resolves one link closing several fields by rank pairing, and reports
//! density as a bounded range rather than a point estimate.

pub mod comms;
pub mod error;
pub mod geometry;
pub mod host;
pub mod pending;
pub mod reconcile;
pub mod registry;
pub mod seen;

// Re-export key types for convenience
pub use comms::{parse_record, EventKind, LogRecord, Markup, RawEvent, UnitQuantity};
pub use error::{GeometryError, RecordSkip};
pub use geometry::{distance, triangle_area, Coordinate};
pub use host::{GeometrySnapshot, GeometryView, Portal, RenderedLink, Triangle};
pub use pending::{LinkState, PendingLink, PendingStore};
pub use reconcile::{BatchReport, PassReport, ReconcileConfig, Reconciler};
pub use registry::{DensityRange, FieldKey, FieldRegistry, ResolvedField};
pub use seen::{RecordKey, SeenRecords};
