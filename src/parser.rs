//! XML parser for NextBus public feed documents.
//!
//! Handles the `vehicleLocations` and `routeList` command responses.
//! Individual malformed records never abort a batch: numeric fields fall
//! back to 0, tags to the empty string, and only a vehicle element with no
//! id at all is skipped.

use anyhow::Result;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::model::{Route, VehicleReport};

/// A parsed `vehicleLocations` response: the current reports plus the feed's
/// `lastTime` watermark (ms) for the next incremental fetch.
#[derive(Debug, Clone, Default)]
pub struct VehicleBatch {
    pub reports: Vec<VehicleReport>,
    pub watermark: u64,
}

/// Parses a `vehicleLocations` document for the given agency.
///
/// # Errors
///
/// Returns an error only when the document itself is not well-formed XML.
pub fn parse_vehicle_locations(xml: &[u8], agency_id: &str) -> Result<VehicleBatch> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut batch = VehicleBatch::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) => match e.name().as_ref() {
                b"vehicle" => {
                    if let Some(report) = vehicle_from_element(&e, agency_id) {
                        batch.reports.push(report);
                    }
                }
                b"lastTime" => {
                    batch.watermark = attr_value(&e, b"time")
                        .and_then(|t| t.parse().ok())
                        .unwrap_or(0);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(batch)
}

/// Parses a `routeList` document into route descriptors. Routes without a
/// tag are skipped; a missing title defaults to the empty string.
pub fn parse_route_list(xml: &[u8]) -> Result<Vec<Route>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut routes = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) if e.name().as_ref() == b"route" => {
                let tag = attr_value(&e, b"tag").unwrap_or_default();
                if tag.is_empty() {
                    continue;
                }
                routes.push(Route {
                    tag,
                    title: attr_value(&e, b"title").unwrap_or_default(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(routes)
}

fn vehicle_from_element(e: &BytesStart<'_>, agency_id: &str) -> Option<VehicleReport> {
    let id = attr_value(e, b"id")?;
    if id.is_empty() {
        return None;
    }

    Some(VehicleReport {
        id,
        agency_id: agency_id.to_string(),
        route_tag: attr_value(e, b"routeTag").unwrap_or_default(),
        direction_tag: attr_value(e, b"dirTag").unwrap_or_default(),
        latitude: parse_num(attr_value(e, b"lat")),
        longitude: parse_num(attr_value(e, b"lon")),
        speed_km_h: parse_num(attr_value(e, b"speedKmHr")),
        heading_degrees: parse_num::<i64>(attr_value(e, b"heading")).rem_euclid(360) as u16,
        secs_since_report: parse_num(attr_value(e, b"secsSinceReport")),
    })
}

fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned())
}

fn parse_num<T: std::str::FromStr + Default>(value: Option<String>) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_default()
}
