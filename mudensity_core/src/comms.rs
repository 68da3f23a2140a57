//! Comm log records and the link/field event parser.
//!
//! A record is an ordered list of markup segments. Link lines name two
//! portals ("linked @A to @B"); field lines name one portal followed by the
//! captured quantity ("created a Control Field @A +12 MUs"). Everything else
//! is noise. Parsing is best-effort pattern matching on the TEXT segments.

use serde::Deserialize;

use crate::error::RecordSkip;
use crate::host::Portal;

/// TEXT fragments that mark a record as noise.
const NOISE_TRIGGERS: [&str; 3] = ["destroyed the Link", "destroyed a Control Field", "Your Link"];

/// TEXT fragment that announces a field; later numeric segments carry the quantity.
const FIELD_TRIGGER: &str = "created a Control Field";

/// How a captured quantity of exactly 1 is treated.
///
/// A field worth 1 only bounds density from above, so it never reaches the
/// registry. Keeping it until reconciliation still helps balance the count of
/// quantities against the triangles one link spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitQuantity {
    /// Drop it in the parser
    RejectAtParse,
    /// Keep it for count balancing; the engine never commits it
    #[default]
    DeferToEngine,
}

/// One markup segment of a comm log record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "(String, serde_json::Value)")]
pub enum Markup {
    Text(String),
    Portal(Portal),
    /// PLAYER, FACTION, SECURE and friends
    Other,
}

impl From<(String, serde_json::Value)> for Markup {
    fn from((kind, body): (String, serde_json::Value)) -> Self {
        match kind.as_str() {
            "TEXT" => body
                .get("plain")
                .and_then(serde_json::Value::as_str)
                .map(|plain| Markup::Text(plain.to_string()))
                .unwrap_or(Markup::Other),
            "PORTAL" => serde_json::from_value(body)
                .map(Markup::Portal)
                .unwrap_or(Markup::Other),
            _ => Markup::Other,
        }
    }
}

/// A raw comm log record.
///
/// Deserializes from the host's `[guid, timestamp, {"plext": {"markup": [..]}}]` shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "WireRecord")]
pub struct LogRecord {
    /// Host record identity, used to ignore re-read records
    pub guid: Option<String>,

    /// Unix milliseconds
    pub timestamp: i64,

    pub markup: Vec<Markup>,
}

impl LogRecord {
    pub fn new(timestamp: i64, markup: Vec<Markup>) -> Self {
        Self {
            guid: None,
            timestamp,
            markup,
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }
}

#[derive(Deserialize)]
struct WireRecord(String, i64, WireBody);

#[derive(Deserialize)]
struct WireBody {
    plext: WirePlext,
}

#[derive(Deserialize)]
struct WirePlext {
    #[serde(default)]
    markup: Vec<Markup>,
}

impl From<WireRecord> for LogRecord {
    fn from(WireRecord(guid, timestamp, body): WireRecord) -> Self {
        Self {
            guid: Some(guid).filter(|g| !g.is_empty()),
            timestamp,
            markup: body.plext.markup,
        }
    }
}

/// What a parsed event announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LinkCreated,
    FieldCreated,
}

/// A typed event extracted from one log record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Comm log timestamp (Unix milliseconds)
    pub timestamp: i64,
    pub record_id: Option<String>,

    /// First portal named by the record
    pub origin: Portal,
    /// Second portal, present on link lines
    pub target: Option<Portal>,
    /// Captured quantity, present on field lines
    pub quantity: Option<u64>,
}

impl RawEvent {
    pub fn kind(&self) -> EventKind {
        if self.target.is_some() {
            EventKind::LinkCreated
        } else {
            EventKind::FieldCreated
        }
    }
}

/// Parse one log record into a link or field event.
pub fn parse_record(record: &LogRecord, unit: UnitQuantity) -> Result<RawEvent, RecordSkip> {
    let mut origin: Option<&Portal> = None;
    let mut target: Option<&Portal> = None;
    let mut quantity: Option<u64> = None;
    let mut is_field = false;

    for segment in &record.markup {
        match segment {
            Markup::Text(plain) => {
                if NOISE_TRIGGERS.iter().any(|t| plain.contains(t)) {
                    return Err(RecordSkip::Noise);
                }
                if is_field && quantity.is_none() {
                    quantity = leading_integer(plain)
                        .filter(|n| *n > 0)
                        .map(|n| n as u64);
                }
                if plain.contains(FIELD_TRIGGER) {
                    is_field = true;
                }
            }
            Markup::Portal(portal) => {
                if origin.is_none() {
                    origin = Some(portal);
                } else {
                    target = Some(portal);
                }
            }
            Markup::Other => {}
        }
    }

    if unit == UnitQuantity::RejectAtParse && quantity == Some(1) {
        quantity = None;
    }

    let origin = origin.ok_or(RecordSkip::MissingOrigin)?;
    if target.is_none() && quantity.is_none() {
        return Err(RecordSkip::NeitherLinkNorField);
    }

    Ok(RawEvent {
        timestamp: record.timestamp,
        record_id: record.guid.clone(),
        origin: origin.clone(),
        target: target.cloned(),
        quantity,
    })
}

/// Integer prefix of a string: leading whitespace, an optional sign, then digits.
fn leading_integer(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    rest[..digits].parse::<i64>().ok().map(|n| sign * n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Coordinate;

    fn text(s: &str) -> Markup {
        Markup::Text(s.to_string())
    }

    fn portal(name: &str, lat: i32, lng: i32) -> Markup {
        Markup::Portal(Portal::named(Coordinate::new(lat, lng), name))
    }

    fn field_line(ts: i64, mu: &str) -> LogRecord {
        LogRecord::new(
            ts,
            vec![
                Markup::Other,
                text(" created a Control Field @"),
                portal("Origin", 100, 200),
                text(" +"),
                text(mu),
                text(" MUs"),
            ],
        )
    }

    #[test]
    fn test_link_line() {
        let record = LogRecord::new(
            5000,
            vec![
                Markup::Other,
                text(" linked "),
                portal("Origin", 100, 200),
                text(" to "),
                portal("Target", 300, 400),
            ],
        );

        let event = parse_record(&record, UnitQuantity::DeferToEngine).unwrap();
        assert_eq!(event.kind(), EventKind::LinkCreated);
        assert_eq!(event.origin.coord, Coordinate::new(100, 200));
        assert_eq!(event.target.unwrap().name.as_deref(), Some("Target"));
        assert_eq!(event.quantity, None);
        assert_eq!(event.timestamp, 5000);
    }

    #[test]
    fn test_field_line() {
        let event = parse_record(&field_line(5000, "42"), UnitQuantity::DeferToEngine).unwrap();
        assert_eq!(event.kind(), EventKind::FieldCreated);
        assert_eq!(event.quantity, Some(42));
        assert!(event.target.is_none());
    }

    #[test]
    fn test_first_positive_quantity_wins() {
        let record = LogRecord::new(
            1,
            vec![
                text("created a Control Field @"),
                portal("Origin", 1, 1),
                text("0"),
                text("17 MUs"),
                text("99"),
            ],
        );
        let event = parse_record(&record, UnitQuantity::DeferToEngine).unwrap();
        assert_eq!(event.quantity, Some(17));
    }

    #[test]
    fn test_numbers_before_field_trigger_are_ignored() {
        let record = LogRecord::new(1, vec![text("7"), portal("Origin", 1, 1), text("12")]);
        assert_eq!(
            parse_record(&record, UnitQuantity::DeferToEngine),
            Err(RecordSkip::NeitherLinkNorField)
        );
    }

    #[test]
    fn test_unit_quantity_policy() {
        let deferred = parse_record(&field_line(1, "1"), UnitQuantity::DeferToEngine).unwrap();
        assert_eq!(deferred.quantity, Some(1));

        assert_eq!(
            parse_record(&field_line(1, "1"), UnitQuantity::RejectAtParse),
            Err(RecordSkip::NeitherLinkNorField)
        );
    }

    #[test]
    fn test_noise_lines() {
        for noise in NOISE_TRIGGERS {
            let record = LogRecord::new(
                1,
                vec![portal("A", 1, 1), text(noise), portal("B", 2, 2)],
            );
            assert_eq!(
                parse_record(&record, UnitQuantity::DeferToEngine),
                Err(RecordSkip::Noise)
            );
        }
    }

    #[test]
    fn test_record_without_portal_is_dropped() {
        let record = LogRecord::new(1, vec![text("created a Control Field"), text("5")]);
        assert_eq!(
            parse_record(&record, UnitQuantity::DeferToEngine),
            Err(RecordSkip::MissingOrigin)
        );
    }

    #[test]
    fn test_leading_integer() {
        assert_eq!(leading_integer("12"), Some(12));
        assert_eq!(leading_integer("  +8 MUs"), Some(8));
        assert_eq!(leading_integer("-3"), Some(-3));
        assert_eq!(leading_integer(" +"), None);
        assert_eq!(leading_integer(" MUs"), None);
        assert_eq!(leading_integer(""), None);
    }

    #[test]
    fn test_wire_record() {
        let json = r#"["a1b2.d", 1700000000123, {"plext": {"text": "ignored", "markup": [
            ["PLAYER", {"plain": "agent", "team": "RESISTANCE"}],
            ["TEXT", {"plain": " created a Control Field @"}],
            ["PORTAL", {"name": "Clock Tower", "plain": "Clock Tower", "latE6": 51500000, "lngE6": -120000, "team": "RESISTANCE"}],
            ["TEXT", {"plain": " +"}],
            ["TEXT", {"plain": "305"}],
            ["TEXT", {"plain": " MUs"}]
        ]}}]"#;

        let record: LogRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.guid.as_deref(), Some("a1b2.d"));
        assert_eq!(record.timestamp, 1_700_000_000_123);
        assert_eq!(record.markup[0], Markup::Other);

        let event = parse_record(&record, UnitQuantity::DeferToEngine).unwrap();
        assert_eq!(event.origin.name.as_deref(), Some("Clock Tower"));
        assert_eq!(event.origin.coord, Coordinate::new(51_500_000, -120_000));
        assert_eq!(event.quantity, Some(305));
        assert_eq!(event.record_id.as_deref(), Some("a1b2.d"));
    }
}
