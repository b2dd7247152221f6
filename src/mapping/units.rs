//! Unit tags accepted by a mapping plan and their conversion toward SI.
//!
//! Only two canonical fields carry a unit: `speed_mps` and `alt_m`. Unit tags are matched
//! case-insensitively; an unrecognized tag is a [`MappingError`] that fails the record being
//! mapped, never the whole batch.
use std::fmt;
use std::str::FromStr;

use crate::constants::{
    MPS_PER_KNOT, MPS_PER_KPH, MPS_PER_MPH, MPS_PER_MPS, M_PER_FT, M_PER_KM, M_PER_M,
};
use crate::mapping::MappingError;

/// Speed unit a vendor reports in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeedUnit {
    MetersPerSecond,
    KilometersPerHour,
    MilesPerHour,
    Knots,
}

impl SpeedUnit {
    /// Multiplicative factor to meters per second.
    pub fn to_mps_factor(self) -> f64 {
        match self {
            SpeedUnit::MetersPerSecond => MPS_PER_MPS,
            SpeedUnit::KilometersPerHour => MPS_PER_KPH,
            SpeedUnit::MilesPerHour => MPS_PER_MPH,
            SpeedUnit::Knots => MPS_PER_KNOT,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SpeedUnit::MetersPerSecond => "mps",
            SpeedUnit::KilometersPerHour => "kph",
            SpeedUnit::MilesPerHour => "mph",
            SpeedUnit::Knots => "knots",
        }
    }
}

impl FromStr for SpeedUnit {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mps" => Ok(SpeedUnit::MetersPerSecond),
            "kph" => Ok(SpeedUnit::KilometersPerHour),
            "mph" => Ok(SpeedUnit::MilesPerHour),
            "knots" => Ok(SpeedUnit::Knots),
            _ => Err(MappingError::UnknownSpeedUnit(s.to_string())),
        }
    }
}

impl fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Altitude unit a vendor reports in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AltitudeUnit {
    Meters,
    Feet,
    Kilometers,
}

impl AltitudeUnit {
    /// Multiplicative factor to meters.
    pub fn to_m_factor(self) -> f64 {
        match self {
            AltitudeUnit::Meters => M_PER_M,
            AltitudeUnit::Feet => M_PER_FT,
            AltitudeUnit::Kilometers => M_PER_KM,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            AltitudeUnit::Meters => "m",
            AltitudeUnit::Feet => "ft",
            AltitudeUnit::Kilometers => "km",
        }
    }
}

impl FromStr for AltitudeUnit {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" => Ok(AltitudeUnit::Meters),
            "ft" => Ok(AltitudeUnit::Feet),
            "km" => Ok(AltitudeUnit::Kilometers),
            _ => Err(MappingError::UnknownAltitudeUnit(s.to_string())),
        }
    }
}

impl fmt::Display for AltitudeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Convert a speed expressed in `unit` into meters per second.
///
/// Arguments
/// ---------
/// * `value`: the speed in the source unit
/// * `unit`: a unit tag among `mps`, `kph`, `mph`, `knots` (case-insensitive)
///
/// Return
/// ------
/// * the speed in m/s, or [`MappingError::UnknownSpeedUnit`]
pub fn convert_speed_to_mps(value: f64, unit: &str) -> Result<f64, MappingError> {
    Ok(value * unit.parse::<SpeedUnit>()?.to_mps_factor())
}

/// Inverse of [`convert_speed_to_mps`].
pub fn convert_mps_to_speed(value_mps: f64, unit: &str) -> Result<f64, MappingError> {
    Ok(value_mps / unit.parse::<SpeedUnit>()?.to_mps_factor())
}

/// Convert an altitude expressed in `unit` (`m`, `ft`, `km`) into meters.
pub fn convert_altitude_to_meters(value: f64, unit: &str) -> Result<f64, MappingError> {
    Ok(value * unit.parse::<AltitudeUnit>()?.to_m_factor())
}

/// Inverse of [`convert_altitude_to_meters`].
pub fn convert_meters_to_altitude(value_m: f64, unit: &str) -> Result<f64, MappingError> {
    Ok(value_m / unit.parse::<AltitudeUnit>()?.to_m_factor())
}

#[cfg(test)]
mod units_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_speed_conversions() {
        assert_relative_eq!(convert_speed_to_mps(36.0, "kph").unwrap(), 10.0, epsilon = 1e-12);
        assert_relative_eq!(convert_speed_to_mps(60.0, "mph").unwrap(), 26.8224, epsilon = 1e-9);
        assert_relative_eq!(convert_speed_to_mps(10.0, "knots").unwrap(), 5.14444, epsilon = 1e-9);
        assert_eq!(convert_speed_to_mps(10.0, "mps").unwrap(), 10.0);
        assert_eq!(convert_speed_to_mps(10.0, "KPH").unwrap(), convert_speed_to_mps(10.0, "kph").unwrap());
    }

    #[test]
    fn test_altitude_conversions() {
        assert_relative_eq!(convert_altitude_to_meters(100.0, "ft").unwrap(), 30.48, epsilon = 1e-9);
        assert_eq!(convert_altitude_to_meters(100.0, "m").unwrap(), 100.0);
        assert_eq!(convert_altitude_to_meters(1.5, "km").unwrap(), 1500.0);
    }

    #[test]
    fn test_unknown_units_are_errors() {
        assert_eq!(
            convert_speed_to_mps(1.0, "furlongs/fortnight"),
            Err(MappingError::UnknownSpeedUnit("furlongs/fortnight".into()))
        );
        assert_eq!(
            convert_altitude_to_meters(1.0, "yd"),
            Err(MappingError::UnknownAltitudeUnit("yd".into()))
        );
    }

    #[test]
    fn test_round_trip_every_unit() {
        for unit in ["mps", "kph", "mph", "knots"] {
            for v in [0.0, 0.5, 13.7, 119.99] {
                let there = convert_mps_to_speed(v, unit).unwrap();
                let back = convert_speed_to_mps(there, unit).unwrap();
                assert_relative_eq!(back, v, epsilon = 1e-9);
            }
        }
        for unit in ["m", "ft", "km"] {
            let back = convert_altitude_to_meters(convert_meters_to_altitude(1234.5, unit).unwrap(), unit)
                .unwrap();
            assert_relative_eq!(back, 1234.5, epsilon = 1e-9);
        }
    }
}
