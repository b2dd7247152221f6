//! Built-in vendor plans and header-based plan inference.
//!
//! Three plans ship with the crate:
//!
//! | vendor    | speed unit | notes                                              |
//! |-----------|------------|----------------------------------------------------|
//! | `generic` | m/s        | broad alias table, also used for header inference  |
//! | `geotab`  | km/h       | `id`/`deviceId`, `dateTime`, `latitude`/`longitude`|
//! | `samsara` | km/h       | nested `device.id`, `location.lat/lng`             |
//!
//! In every table the canonical name itself is listed first in its group, so a payload that
//! already speaks the canonical schema is never shadowed by a vendor alias.
use crate::mapping::{CanonicalField, MappingPlan};

use CanonicalField::*;

const GENERIC_ALIASES: &[(&str, CanonicalField)] = &[
    ("device_id", DeviceId),
    ("device", DeviceId),
    ("unit", DeviceId),
    ("vehicle_id", DeviceId),
    ("tracker_id", DeviceId),
    ("asset_id", DeviceId),
    ("ts_utc", TsUtc),
    ("timestamp", TsUtc),
    ("time", TsUtc),
    ("datetime", TsUtc),
    ("event_time", TsUtc),
    ("ts", TsUtc),
    ("time_utc", TsUtc),
    ("lat", Lat),
    ("latitude", Lat),
    ("lon", Lon),
    ("lng", Lon),
    ("long", Lon),
    ("longitude", Lon),
    ("speed_mps", SpeedMps),
    ("speed", SpeedMps),
    ("speed_kph", SpeedMps),
    ("speed_mph", SpeedMps),
    ("velocity", SpeedMps),
    ("heading_deg", HeadingDeg),
    ("heading", HeadingDeg),
    ("course", HeadingDeg),
    ("bearing", HeadingDeg),
    ("direction", HeadingDeg),
    ("alt_m", AltM),
    ("altitude", AltM),
    ("alt", AltM),
    ("elevation", AltM),
    ("hdop", Hdop),
    ("accuracy", Hdop),
    ("precision", Hdop),
];

const GEOTAB_ALIASES: &[(&str, CanonicalField)] = &[
    ("id", DeviceId),
    ("deviceId", DeviceId),
    ("dateTime", TsUtc),
    ("timestamp", TsUtc),
    ("latitude", Lat),
    ("longitude", Lon),
    ("speed", SpeedMps),
    ("bearing", HeadingDeg),
    ("altitude", AltM),
];

const SAMSARA_ALIASES: &[(&str, CanonicalField)] = &[
    ("device.id", DeviceId),
    ("deviceId", DeviceId),
    ("timestamp", TsUtc),
    ("time", TsUtc),
    ("location.lat", Lat),
    ("location.latitude", Lat),
    ("latitude", Lat),
    ("location.lng", Lon),
    ("location.longitude", Lon),
    ("longitude", Lon),
    ("vehicle.speedKph", SpeedMps),
    ("speedKph", SpeedMps),
    ("speed", SpeedMps),
    ("heading", HeadingDeg),
    ("bearing", HeadingDeg),
];

fn plan_from_table(vendor: &str, table: &[(&str, CanonicalField)]) -> MappingPlan {
    table
        .iter()
        .fold(MappingPlan::builder(vendor), |builder, (source, canonical)| {
            builder.map_field(*source, *canonical)
        })
        .default_value(Src, vendor)
        .build()
}

/// Plan for payloads using common, vendor-neutral field names (speeds already in m/s).
pub fn create_generic_mapping() -> MappingPlan {
    plan_from_table("generic", GENERIC_ALIASES)
}

/// Plan for Geotab `LogRecord`-style payloads (speed in km/h).
pub fn create_geotab_mapping() -> MappingPlan {
    plan_from_table("geotab", GEOTAB_ALIASES)
        .into_builder()
        .unit(SpeedMps, "kph")
        .build()
}

/// Plan for Samsara vehicle-location payloads (speed in km/h, nested objects).
pub fn create_samsara_mapping() -> MappingPlan {
    plan_from_table("samsara", SAMSARA_ALIASES)
        .into_builder()
        .unit(SpeedMps, "kph")
        .build()
}

impl MappingPlan {
    /// Built-in plan for a vendor tag; unknown tags fall back to the generic plan.
    pub fn for_vendor(vendor: &str) -> MappingPlan {
        match vendor.trim().to_ascii_lowercase().as_str() {
            "geotab" => create_geotab_mapping(),
            "samsara" => create_samsara_mapping(),
            _ => create_generic_mapping(),
        }
    }

    /// Plan inferred from unlabeled file headers (see [`infer_field_mapping`]).
    pub fn inferred<S: AsRef<str>>(headers: &[S]) -> MappingPlan {
        infer_field_mapping(headers)
            .into_iter()
            .fold(
                MappingPlan::builder("generic").default_value(Src, "file"),
                |builder, (header, canonical)| {
                    builder.map_field(header, canonical)
                },
            )
            .build()
    }
}

/// Lower-case, trim, and underscore a header (`" Event-Time "` → `"event_time"`).
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

/// Match file headers against the generic alias table.
///
/// Returns `(original header, canonical field)` pairs in header order; headers with no
/// match are dropped silently.
pub fn infer_field_mapping<S: AsRef<str>>(headers: &[S]) -> Vec<(String, CanonicalField)> {
    headers
        .iter()
        .filter_map(|header| {
            let norm = normalize_header(header.as_ref());
            GENERIC_ALIASES
                .iter()
                .find(|(alias, _)| *alias == norm)
                .map(|(_, canonical)| (header.as_ref().to_string(), *canonical))
        })
        .collect()
}

#[cfg(test)]
mod vendor_test {
    use super::*;
    use crate::mapping::apply_mapping;
    use crate::record::{record_from_json, RawValue};
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_generic_plan_tags() {
        let plan = create_generic_mapping();
        assert_eq!(plan.vendor(), "generic");
        assert!(plan.unit_map().is_empty());
        assert_eq!(plan.canonical_for("lng"), Some(Lon));
        assert_eq!(plan.canonical_for("asset_id"), Some(DeviceId));
        assert_eq!(plan.canonical_for("nope"), None);
    }

    #[test]
    fn test_geotab_speed_is_kph() {
        let rec = record_from_json(json!({
            "id": "b1",
            "dateTime": "2024-05-01T12:00:00Z",
            "latitude": 43.0,
            "longitude": -79.0,
            "speed": 72.0
        }))
        .unwrap();
        let mapped = apply_mapping(&rec, &create_geotab_mapping()).unwrap();
        assert_relative_eq!(
            mapped.get(SpeedMps).and_then(RawValue::as_f64).unwrap(),
            20.0,
            epsilon = 1e-12
        );
        assert_eq!(mapped.get(Src), Some(&RawValue::from("geotab")));
    }

    #[test]
    fn test_samsara_nested_payload() {
        let rec = record_from_json(json!({
            "device": {"id": "veh-9"},
            "timestamp": 1714568400000_i64,
            "location": {"lat": 37.0, "lng": -122.0},
            "vehicle": {"speedKph": 18.0}
        }))
        .unwrap();
        let mapped = apply_mapping(&rec, &create_samsara_mapping()).unwrap();
        assert_eq!(mapped.get(DeviceId), Some(&RawValue::from("veh-9")));
        assert_eq!(mapped.get(Lon), Some(&RawValue::Float(-122.0)));
        assert_relative_eq!(
            mapped.get(SpeedMps).and_then(RawValue::as_f64).unwrap(),
            5.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_for_vendor_falls_back_to_generic() {
        assert_eq!(MappingPlan::for_vendor("Samsara").vendor(), "samsara");
        assert_eq!(MappingPlan::for_vendor("unknown-box").vendor(), "generic");
    }

    #[test]
    fn test_infer_field_mapping_fuzzy_headers() {
        let headers = ["Device ID", " Latitude ", "LNG", "Event-Time", "Speed", "Driver Name"];
        let inferred = infer_field_mapping(&headers);
        assert_eq!(
            inferred,
            vec![
                ("Device ID".to_string(), DeviceId),
                (" Latitude ".to_string(), Lat),
                ("LNG".to_string(), Lon),
                ("Event-Time".to_string(), TsUtc),
                ("Speed".to_string(), SpeedMps),
            ]
        );

        let plan = MappingPlan::inferred(&headers);
        assert_eq!(plan.field_map().len(), 5);
        assert_eq!(plan.vendor(), "generic");
    }
}
