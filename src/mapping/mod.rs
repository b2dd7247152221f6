//! # Mapping plans
//!
//! A [`MappingPlan`] is a data-only descriptor that adapts one vendor's payload shape to the
//! canonical field names of a [`TrackPoint`](crate::track_point::TrackPoint). It carries:
//!
//! - `field_map` – an **ordered** list of `source field → canonical field` aliases
//!   (many-to-one allowed),
//! - `unit_map` – the unit each vendor reports `speed_mps` / `alt_m` in,
//! - `defaults` – values filled in for canonical fields still absent after mapping,
//! - `vendor` – the tag stamped into `src`.
//!
//! ## Alias priority
//! -----------------
//! When several source fields map to the same canonical field, the **first alias in list
//! order whose value is present and non-null wins**. Later aliases for an already-resolved
//! field are ignored. The order is part of the plan and survives JSON round-trips.
//!
//! ## Units
//! -----------------
//! Unit tags stay as strings inside the plan; they are parsed when the plan is applied so an
//! unknown tag fails only the record being mapped. See [`units`].
//!
//! ## See also
//! ------------
//! * [`vendor`] – built-in generic / Geotab / Samsara plans and header inference.
//! * [`apply_mapping`] – applies a plan to one raw record.
pub mod units;
pub mod vendor;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{lookup, RawRecord, RawValue};
use units::{convert_altitude_to_meters, convert_speed_to_mps};

/// Failure while applying (or building) a mapping plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("Unknown speed unit: {0}")]
    UnknownSpeedUnit(String),

    #[error("Unknown altitude unit: {0}")]
    UnknownAltitudeUnit(String),

    #[error("Field {field} must be numeric to apply a unit conversion, got {kind}")]
    NonNumericValue {
        field: CanonicalField,
        kind: &'static str,
    },

    #[error("Unknown canonical field: {0}")]
    UnknownCanonicalField(String),

    #[error("Invalid mapping plan: {0}")]
    InvalidPlan(String),
}

/// Field names of the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    DeviceId,
    TsUtc,
    Lat,
    Lon,
    SpeedMps,
    HeadingDeg,
    AltM,
    Hdop,
    Src,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::DeviceId,
        CanonicalField::TsUtc,
        CanonicalField::Lat,
        CanonicalField::Lon,
        CanonicalField::SpeedMps,
        CanonicalField::HeadingDeg,
        CanonicalField::AltM,
        CanonicalField::Hdop,
        CanonicalField::Src,
    ];

    /// Fields a record cannot be accepted without.
    pub const REQUIRED: [CanonicalField; 4] = [
        CanonicalField::DeviceId,
        CanonicalField::TsUtc,
        CanonicalField::Lat,
        CanonicalField::Lon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalField::DeviceId => "device_id",
            CanonicalField::TsUtc => "ts_utc",
            CanonicalField::Lat => "lat",
            CanonicalField::Lon => "lon",
            CanonicalField::SpeedMps => "speed_mps",
            CanonicalField::HeadingDeg => "heading_deg",
            CanonicalField::AltM => "alt_m",
            CanonicalField::Hdop => "hdop",
            CanonicalField::Src => "src",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| MappingError::UnknownCanonicalField(s.to_string()))
    }
}

/// Declarative vendor-to-canonical translation table.
///
/// Immutable once built: use [`MappingPlan::builder`] to create one and
/// [`MappingPlan::into_builder`] to derive a variant from an existing plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingPlan {
    #[serde(with = "ordered_aliases")]
    field_map: Vec<(String, CanonicalField)>,
    #[serde(default)]
    unit_map: BTreeMap<CanonicalField, String>,
    #[serde(default)]
    defaults: BTreeMap<CanonicalField, RawValue>,
    #[serde(default = "default_vendor")]
    vendor: String,
}

fn default_vendor() -> String {
    "generic".to_string()
}

impl MappingPlan {
    /// Start a new plan for `vendor`.
    pub fn builder(vendor: impl Into<String>) -> MappingPlanBuilder {
        MappingPlanBuilder {
            plan: MappingPlan {
                field_map: Vec::new(),
                unit_map: BTreeMap::new(),
                defaults: BTreeMap::new(),
                vendor: vendor.into(),
            },
        }
    }

    /// Reopen this plan as a builder (the original is left untouched).
    pub fn into_builder(self) -> MappingPlanBuilder {
        MappingPlanBuilder { plan: self }
    }

    /// Parse a caller-supplied plan.
    ///
    /// The expected shape is
    /// `{"field_map": {"src_field": "canonical", ...}, "unit_map": {...}, "defaults": {...}, "vendor": "..."}`;
    /// the order of `field_map` entries in the document is the alias priority.
    pub fn from_json(json: &str) -> Result<Self, MappingError> {
        serde_json::from_str(json).map_err(|e| MappingError::InvalidPlan(e.to_string()))
    }

    pub fn field_map(&self) -> &[(String, CanonicalField)] {
        &self.field_map
    }

    pub fn unit_map(&self) -> &BTreeMap<CanonicalField, String> {
        &self.unit_map
    }

    pub fn defaults(&self) -> &BTreeMap<CanonicalField, RawValue> {
        &self.defaults
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Canonical field a source field maps to, if any (first alias wins).
    pub fn canonical_for(&self, source_field: &str) -> Option<CanonicalField> {
        self.field_map
            .iter()
            .find(|(source, _)| source == source_field)
            .map(|(_, canonical)| *canonical)
    }
}

/// Fluent builder for [`MappingPlan`].
#[derive(Debug, Clone)]
pub struct MappingPlanBuilder {
    plan: MappingPlan,
}

impl MappingPlanBuilder {
    /// Append an alias. Aliases added earlier take priority.
    pub fn map_field(mut self, source: impl Into<String>, canonical: CanonicalField) -> Self {
        self.plan.field_map.push((source.into(), canonical));
        self
    }

    /// Declare the unit a canonical field is reported in. Only `speed_mps` and `alt_m` are
    /// converted; tags for other fields are kept but have no effect.
    pub fn unit(mut self, canonical: CanonicalField, unit: impl Into<String>) -> Self {
        self.plan.unit_map.insert(canonical, unit.into());
        self
    }

    pub fn default_value(mut self, canonical: CanonicalField, value: impl Into<RawValue>) -> Self {
        self.plan.defaults.insert(canonical, value.into());
        self
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.plan.vendor = vendor.into();
        self
    }

    pub fn build(self) -> MappingPlan {
        self.plan
    }
}

/// Record keyed by canonical field, produced by [`apply_mapping`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    fields: BTreeMap<CanonicalField, RawValue>,
}

impl MappedRecord {
    pub fn get(&self, field: CanonicalField) -> Option<&RawValue> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: CanonicalField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn insert(&mut self, field: CanonicalField, value: RawValue) {
        self.fields.insert(field, value);
    }

    pub fn remove(&mut self, field: CanonicalField) -> Option<RawValue> {
        self.fields.remove(&field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalField, &RawValue)> {
        self.fields.iter()
    }
}

/// Apply a mapping plan to one source record.
///
/// Steps, in order:
/// 1. resolve aliases (first present, non-null alias wins; dotted paths reach nested maps),
/// 2. fill `defaults` for canonical fields still absent,
/// 3. convert `speed_mps` / `alt_m` from the declared unit,
/// 4. stamp `src` with the plan's vendor tag.
///
/// Errors
/// ------
/// * [`MappingError::UnknownSpeedUnit`] / [`MappingError::UnknownAltitudeUnit`] for an
///   unrecognized unit tag,
/// * [`MappingError::NonNumericValue`] when a unit-bearing field is not numeric.
pub fn apply_mapping(record: &RawRecord, plan: &MappingPlan) -> Result<MappedRecord, MappingError> {
    let mut mapped = MappedRecord::default();

    for (source, canonical) in &plan.field_map {
        if mapped.contains(*canonical) {
            continue;
        }
        if let Some(value) = lookup(record, source).filter(|v| !v.is_null()) {
            mapped.insert(*canonical, value.clone());
        }
    }

    for (field, default) in &plan.defaults {
        if !mapped.contains(*field) {
            mapped.insert(*field, default.clone());
        }
    }

    if let Some(unit) = plan.unit_map.get(&CanonicalField::SpeedMps) {
        if let Some(value) = mapped.get(CanonicalField::SpeedMps) {
            let raw = numeric(CanonicalField::SpeedMps, value)?;
            let mps = convert_speed_to_mps(raw, unit)?;
            mapped.insert(CanonicalField::SpeedMps, RawValue::Float(mps));
        }
    }

    if let Some(unit) = plan.unit_map.get(&CanonicalField::AltM) {
        if let Some(value) = mapped.get(CanonicalField::AltM) {
            let raw = numeric(CanonicalField::AltM, value)?;
            let meters = convert_altitude_to_meters(raw, unit)?;
            mapped.insert(CanonicalField::AltM, RawValue::Float(meters));
        }
    }

    mapped.insert(CanonicalField::Src, RawValue::Text(plan.vendor.clone()));

    Ok(mapped)
}

fn numeric(field: CanonicalField, value: &RawValue) -> Result<f64, MappingError> {
    value.as_f64().ok_or(MappingError::NonNumericValue {
        field,
        kind: value.kind(),
    })
}

/// `field_map` is (de)serialized as a JSON object whose entry order is the alias priority.
mod ordered_aliases {
    use super::CanonicalField;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        aliases: &[(String, CanonicalField)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(aliases.len()))?;
        for (source, canonical) in aliases {
            map.serialize_entry(source, canonical)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, CanonicalField)>, D::Error> {
        struct AliasVisitor;

        impl<'de> Visitor<'de> for AliasVisitor {
            type Value = Vec<(String, CanonicalField)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of source field to canonical field")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut aliases = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((source, canonical)) =
                    access.next_entry::<String, CanonicalField>()?
                {
                    aliases.push((source, canonical));
                }
                Ok(aliases)
            }
        }

        deserializer.deserialize_map(AliasVisitor)
    }
}
