//! Wire-level change events.
//!
//! These types define the semantics any transport encoding must preserve;
//! the actual encoding lives behind the ChangeFeed seam. Stamps arrive as
//! explicit per-field entries; a missing or malformed entry decodes to
//! "never stamped", which loses every merge comparison - fail safe toward
//! data preservation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{
    ActorId, Element, ElementId, ElementKind, FieldClocks, FieldValue, Stamp, Tombstone,
    WriteStamp,
};

/// Stamp as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStamp {
    pub wall_ms: u64,
    pub counter: u32,
    pub actor: String,
}

impl WireStamp {
    pub fn from_stamp(stamp: &Stamp) -> Self {
        Self {
            wall_ms: stamp.at.wall_ms,
            counter: stamp.at.counter,
            actor: stamp.by.as_str().to_string(),
        }
    }

    /// Decode to a domain stamp. A stamp with an invalid actor id is
    /// malformed and yields None (treated as infinitely old upstream).
    pub fn to_stamp(&self) -> Option<Stamp> {
        let actor = ActorId::new(self.actor.clone()).ok()?;
        Some(Stamp::new(WriteStamp::new(self.wall_ms, self.counter), actor))
    }
}

/// Element payload as carried on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireElement {
    pub id: ElementId,
    pub kind: ElementKind,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Per-field write stamps. Entries may be missing; those fields merge
    /// as never-stamped.
    #[serde(default)]
    pub stamps: BTreeMap<String, WireStamp>,
    /// Present when the payload describes a deleted element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<WireStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_reason: Option<String>,
}

impl WireElement {
    pub fn from_parts(element: &Element, clocks: &FieldClocks) -> Self {
        Self {
            id: element.id.clone(),
            kind: element.kind,
            fields: element.fields.clone(),
            stamps: clocks
                .iter()
                .filter(|(name, _)| element.fields.contains_key(name.as_str()))
                .map(|(name, stamp)| (name.clone(), WireStamp::from_stamp(stamp)))
                .collect(),
            deleted: None,
            deleted_reason: None,
        }
    }

    pub fn from_tombstone(tomb: &Tombstone, kind: ElementKind) -> Self {
        Self {
            id: tomb.id.clone(),
            kind,
            fields: BTreeMap::new(),
            stamps: BTreeMap::new(),
            deleted: Some(WireStamp::from_stamp(&tomb.deleted)),
            deleted_reason: tomb.reason.clone(),
        }
    }

    pub fn element(&self) -> Element {
        Element::with_fields(self.id.clone(), self.kind, self.fields.clone())
    }

    /// Decode the per-field stamps, silently dropping malformed entries.
    pub fn field_clocks(&self) -> FieldClocks {
        self.stamps
            .iter()
            .filter_map(|(name, wire)| wire.to_stamp().map(|stamp| (name.clone(), stamp)))
            .collect()
    }

    pub fn tombstone(&self) -> Option<Tombstone> {
        let stamp = self.deleted.as_ref()?.to_stamp()?;
        Some(Tombstone::new(
            self.id.clone(),
            stamp,
            self.deleted_reason.clone(),
        ))
    }
}

/// Kind of change carried by a broadcast event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// One change as delivered by the broadcast transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: WireElement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<WireElement>,
}

impl ChangeEvent {
    /// Decode from a raw transport payload.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Connection status as reported by the broadcast transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Subscribed,
    Error,
    Timeout,
    Closed,
}

impl ConnectionStatus {
    pub fn is_fault(self) -> bool {
        !matches!(self, Self::Subscribed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Closed => "closed",
        }
    }
}

/// Messages delivered over a feed subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    Event(ChangeEvent),
    Status(ConnectionStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_wire_stamp_decodes_to_none() {
        let wire = WireStamp {
            wall_ms: 100,
            counter: 0,
            actor: String::new(),
        };
        assert!(wire.to_stamp().is_none());
    }

    #[test]
    fn field_clocks_drop_malformed_entries() {
        let mut stamps = BTreeMap::new();
        stamps.insert(
            "good".to_string(),
            WireStamp {
                wall_ms: 100,
                counter: 0,
                actor: "a".into(),
            },
        );
        stamps.insert(
            "bad".to_string(),
            WireStamp {
                wall_ms: 100,
                counter: 0,
                actor: String::new(),
            },
        );
        let wire = WireElement {
            id: ElementId::parse("el-a").unwrap(),
            kind: ElementKind::Sticky,
            fields: BTreeMap::new(),
            stamps,
            deleted: None,
            deleted_reason: None,
        };
        let clocks = wire.field_clocks();
        assert!(clocks.get("good").is_some());
        assert!(clocks.get("bad").is_none());
    }

    #[test]
    fn change_event_decodes_from_json() {
        let payload = serde_json::json!({
            "kind": "update",
            "record": {
                "id": "el-a1",
                "kind": "sticky",
                "fields": { "text": "hello", "x": 10.0 },
                "stamps": {
                    "text": { "wall_ms": 100, "counter": 0, "actor": "a" }
                }
            }
        });
        let event = ChangeEvent::from_json(payload).unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(
            event.record.fields["text"],
            FieldValue::Text("hello".into())
        );
        // The x field arrived without a stamp; it decodes but merges as
        // never-stamped.
        assert!(event.record.field_clocks().get("x").is_none());
    }

    #[test]
    fn wire_round_trip_keeps_stamps_for_present_fields() {
        let element = Element::with_fields(
            ElementId::parse("el-a").unwrap(),
            ElementKind::Shape,
            [("fill".to_string(), FieldValue::Text("red".into()))].into(),
        );
        let clocks: FieldClocks = [(
            "fill".to_string(),
            Stamp::new(WriteStamp::new(5, 1), ActorId::new("a").unwrap()),
        )]
        .into_iter()
        .collect();

        let wire = WireElement::from_parts(&element, &clocks);
        assert_eq!(wire.element(), element);
        assert_eq!(wire.field_clocks(), clocks);
    }
}
