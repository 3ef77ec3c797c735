//! Geographic and availability data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BoundsError;

/// A single location on the map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check that the point is a real coordinate
    pub fn validate(&self) -> Result<(), BoundsError> {
        check_lat(self.lat)?;
        check_lng(self.lng)
    }
}

/// Geographic bounding box a connection subscribes to.
///
/// All four edges are inclusive. A valid box always has
/// `min_lat <= max_lat` and `min_lng <= max_lng`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Build a validated bounding box
    pub fn new(min_lat: f64, max_lat: f64, min_lng: f64, max_lng: f64) -> Result<Self, BoundsError> {
        let bounds = Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Assemble bounds from optional parts (e.g. URL query parameters).
    ///
    /// Returns `Ok(None)` when no part is given and `Incomplete` when only
    /// some of them are.
    pub fn from_parts(
        min_lat: Option<f64>,
        max_lat: Option<f64>,
        min_lng: Option<f64>,
        max_lng: Option<f64>,
    ) -> Result<Option<Self>, BoundsError> {
        match (min_lat, max_lat, min_lng, max_lng) {
            (None, None, None, None) => Ok(None),
            (Some(a), Some(b), Some(c), Some(d)) => Self::new(a, b, c, d).map(Some),
            _ => Err(BoundsError::Incomplete),
        }
    }

    pub fn validate(&self) -> Result<(), BoundsError> {
        check_lat(self.min_lat)?;
        check_lat(self.max_lat)?;
        check_lng(self.min_lng)?;
        check_lng(self.max_lng)?;

        if self.min_lat > self.max_lat {
            return Err(BoundsError::InvertedLatitude {
                min: self.min_lat,
                max: self.max_lat,
            });
        }
        if self.min_lng > self.max_lng {
            return Err(BoundsError::InvertedLongitude {
                min: self.min_lng,
                max: self.max_lng,
            });
        }
        Ok(())
    }

    /// Inclusive point-in-box test
    pub fn contains(&self, point: GeoPoint) -> bool {
        self.min_lat <= point.lat
            && point.lat <= self.max_lat
            && self.min_lng <= point.lng
            && point.lng <= self.max_lng
    }
}

fn check_lat(lat: f64) -> Result<(), BoundsError> {
    if !lat.is_finite() {
        return Err(BoundsError::NonFinite);
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(BoundsError::LatitudeOutOfRange(lat));
    }
    Ok(())
}

fn check_lng(lng: f64) -> Result<(), BoundsError> {
    if !lng.is_finite() {
        return Err(BoundsError::NonFinite);
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(BoundsError::LongitudeOutOfRange(lng));
    }
    Ok(())
}

/// Occupancy change for one parking spot, as pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityUpdate {
    pub spot_id: String,
    pub is_occupied: bool,
    pub estimated_availability_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl AvailabilityUpdate {
    /// New update stamped with the current time
    pub fn new(spot_id: impl Into<String>, is_occupied: bool) -> Self {
        Self {
            spot_id: spot_id.into(),
            is_occupied,
            estimated_availability_time: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_estimated_availability(mut self, at: DateTime<Utc>) -> Self {
        self.estimated_availability_time = Some(at);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downtown() -> Bounds {
        Bounds::new(40.70, 40.72, -74.02, -74.00).unwrap()
    }

    #[test]
    fn test_contains_is_inclusive() {
        let bounds = downtown();
        assert!(bounds.contains(GeoPoint::new(40.713, -74.006)));
        assert!(bounds.contains(GeoPoint::new(40.70, -74.02)));
        assert!(bounds.contains(GeoPoint::new(40.72, -74.00)));
        assert!(!bounds.contains(GeoPoint::new(41.0, -74.0)));
        assert!(!bounds.contains(GeoPoint::new(40.71, -73.99)));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        assert_eq!(
            Bounds::new(40.72, 40.70, -74.02, -74.00),
            Err(BoundsError::InvertedLatitude { min: 40.72, max: 40.70 })
        );
        assert!(matches!(
            Bounds::new(40.70, 40.72, -74.00, -74.02),
            Err(BoundsError::InvertedLongitude { .. })
        ));
    }

    #[test]
    fn test_out_of_range_and_nan_rejected() {
        assert_eq!(
            Bounds::new(-91.0, 0.0, 0.0, 1.0),
            Err(BoundsError::LatitudeOutOfRange(-91.0))
        );
        assert_eq!(
            Bounds::new(0.0, 1.0, 0.0, 181.0),
            Err(BoundsError::LongitudeOutOfRange(181.0))
        );
        assert_eq!(Bounds::new(f64::NAN, 1.0, 0.0, 1.0), Err(BoundsError::NonFinite));
        assert!(GeoPoint::new(0.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn test_degenerate_box_is_valid() {
        let point = Bounds::new(10.0, 10.0, 20.0, 20.0).unwrap();
        assert!(point.contains(GeoPoint::new(10.0, 20.0)));
    }

    #[test]
    fn test_from_parts() {
        assert_eq!(Bounds::from_parts(None, None, None, None), Ok(None));
        assert_eq!(
            Bounds::from_parts(Some(40.70), Some(40.72), None, Some(-74.0)),
            Err(BoundsError::Incomplete)
        );
        assert_eq!(
            Bounds::from_parts(Some(40.70), Some(40.72), Some(-74.02), Some(-74.00)),
            Ok(Some(downtown()))
        );
    }

    #[test]
    fn test_update_serialization_uses_snake_case() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let update = AvailabilityUpdate::new("s1", true).at(ts);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["spot_id"], "s1");
        assert_eq!(json["is_occupied"], true);
        assert!(json["estimated_availability_time"].is_null());
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
    }
}
