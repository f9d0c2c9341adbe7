//! Domain types shared across the aggregation hierarchy.
//!
//! A raw [`VehicleReport`] comes out of the feed parser; an agency node
//! enriches it into a [`VehicleRecord`] (resolved route title, derived
//! direction and compass heading) before storing and fanning it out.

use serde::Serialize;

/// Travel direction derived from a NextBus direction tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// NextBus encodes outbound variants with a `_0` segment in the tag.
    /// An empty tag defaults to outbound.
    pub fn from_tag(tag: &str) -> Self {
        if tag.is_empty() || tag.contains("_0") {
            Direction::Outbound
        } else {
            Direction::Inbound
        }
    }
}

/// Eight-sector compass bucket for a heading in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Heading {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl Heading {
    /// Buckets a heading using the NextBus sector boundaries. The table is
    /// load-bearing for downstream consumers and must not be re-derived:
    /// boundaries sit at 23, 68, 113, 158, 203, 248, 293 and 338 degrees,
    /// with east wrapping around zero.
    pub fn from_degrees(degrees: u16) -> Self {
        let d = degrees % 360;
        if d < 23 {
            Heading::E
        } else if d < 68 {
            Heading::NE
        } else if d < 113 {
            Heading::N
        } else if d < 158 {
            Heading::NW
        } else if d < 203 {
            Heading::W
        } else if d < 248 {
            Heading::SW
        } else if d < 293 {
            Heading::S
        } else if d < 338 {
            Heading::SE
        } else {
            Heading::E
        }
    }
}

/// A single vehicle location report as parsed from a feed batch.
///
/// Missing fields are defaulted at parse time (0 for numbers, empty string
/// for tags); a report is only dropped when it has no vehicle id at all.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleReport {
    pub id: String,
    pub agency_id: String,
    pub route_tag: String,
    pub direction_tag: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Reported speed in km/h.
    pub speed_km_h: i64,
    pub heading_degrees: u16,
    /// Feed-reported age of this sample in seconds. Negative values are
    /// clamped to zero at the consuming node.
    pub secs_since_report: i64,
}

impl VehicleReport {
    /// Canonical node address for this vehicle:
    /// `/vehicle/{agencyId}/{urlEncodedVehicleId}`.
    pub fn uri(&self) -> String {
        format!(
            "/vehicle/{}/{}",
            self.agency_id,
            urlencoding::encode(&self.id)
        )
    }

    pub fn direction(&self) -> Direction {
        Direction::from_tag(&self.direction_tag)
    }

    pub fn heading(&self) -> Heading {
        Heading::from_degrees(self.heading_degrees)
    }
}

/// The enriched per-vehicle entry stored in agency/state/country vehicle maps
/// and dispatched to the vehicle's own node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleRecord {
    pub uri: String,
    pub agency_id: String,
    pub route_tag: String,
    /// Resolved via the agency's route table; empty when the tag is unknown.
    pub route_title: String,
    pub direction: Direction,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_km_h: i64,
    pub heading: Heading,
    pub secs_since_report: i64,
}

/// Geographic extremes over a set of member coordinates.
///
/// The empty box carries infinite sentinels so that `extend` needs no
/// special casing and emptiness stays observable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn empty() -> Self {
        Self {
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            min_lng: f64::INFINITY,
            max_lng: f64::NEG_INFINITY,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_lat > self.max_lat
    }

    pub fn extend(&mut self, latitude: f64, longitude: f64) {
        self.min_lat = self.min_lat.min(latitude);
        self.max_lat = self.max_lat.max(latitude);
        self.min_lng = self.min_lng.min(longitude);
        self.max_lng = self.max_lng.max(longitude);
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_lat
            && latitude <= self.max_lat
            && longitude >= self.min_lng
            && longitude <= self.max_lng
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

/// One row of the static agency directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgencyInfo {
    pub id: String,
    pub state: String,
    pub country: String,
    /// Stable ordinal from the directory file, used for display ordering.
    pub index: usize,
}

impl AgencyInfo {
    pub fn uri(&self) -> String {
        format!("/agency/{}", self.id)
    }

    pub fn state_uri(&self) -> String {
        format!("/state/{}/{}", self.country, self.state)
    }

    pub fn country_uri(&self) -> String {
        format!("/country/{}", self.country)
    }
}

/// A route descriptor from the agency's route list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub tag: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_outbound_variant_tag() {
        assert_eq!(Direction::from_tag("5_0_var"), Direction::Outbound);
    }

    #[test]
    fn test_direction_inbound_tag() {
        assert_eq!(Direction::from_tag("5_1"), Direction::Inbound);
    }

    #[test]
    fn test_direction_empty_tag_defaults_outbound() {
        assert_eq!(Direction::from_tag(""), Direction::Outbound);
    }

    #[test]
    fn test_heading_bucket_boundaries() {
        assert_eq!(Heading::from_degrees(0), Heading::E);
        assert_eq!(Heading::from_degrees(22), Heading::E);
        assert_eq!(Heading::from_degrees(23), Heading::NE);
        assert_eq!(Heading::from_degrees(67), Heading::NE);
        assert_eq!(Heading::from_degrees(68), Heading::N);
        assert_eq!(Heading::from_degrees(112), Heading::N);
        assert_eq!(Heading::from_degrees(113), Heading::NW);
        assert_eq!(Heading::from_degrees(158), Heading::W);
        assert_eq!(Heading::from_degrees(203), Heading::SW);
        assert_eq!(Heading::from_degrees(248), Heading::S);
        assert_eq!(Heading::from_degrees(293), Heading::SE);
        assert_eq!(Heading::from_degrees(337), Heading::SE);
        assert_eq!(Heading::from_degrees(338), Heading::E);
        assert_eq!(Heading::from_degrees(359), Heading::E);
    }

    #[test]
    fn test_vehicle_uri_encodes_id() {
        let report = VehicleReport {
            id: "car 12/a".to_string(),
            agency_id: "sf-muni".to_string(),
            route_tag: String::new(),
            direction_tag: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            speed_km_h: 0,
            heading_degrees: 0,
            secs_since_report: 0,
        };
        assert_eq!(report.uri(), "/vehicle/sf-muni/car%2012%2Fa");
    }

    #[test]
    fn test_bounding_box_extend_and_contains() {
        let mut bb = BoundingBox::empty();
        assert!(bb.is_empty());

        bb.extend(37.7, -122.4);
        bb.extend(37.9, -122.2);
        assert!(!bb.is_empty());
        assert!(bb.contains(37.8, -122.3));
        assert!(!bb.contains(38.0, -122.3));
        assert_eq!(bb.min_lat, 37.7);
        assert_eq!(bb.max_lng, -122.2);
    }

    #[test]
    fn test_agency_uris() {
        let info = AgencyInfo {
            id: "sf-muni".to_string(),
            state: "CA".to_string(),
            country: "US".to_string(),
            index: 0,
        };
        assert_eq!(info.uri(), "/agency/sf-muni");
        assert_eq!(info.state_uri(), "/state/US/CA");
        assert_eq!(info.country_uri(), "/country/US");
    }
}
