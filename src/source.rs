//! The external data source collaborator.
//!
//! [`VehicleSource`] is the contract agency pollers program against. The
//! production implementation, [`NextBusSource`], speaks the NextBus public
//! XML feed over HTTP. Per the feed contract, transport and parse failures
//! are logged and surfaced only as "no update this cycle": an empty report
//! list with the watermark passed through unchanged.

use async_trait::async_trait;

use anyhow::Result;
use tracing::warn;

use crate::fetch::{HttpClient, fetch_bytes};
use crate::model::{Route, VehicleReport};
use crate::parser::{parse_route_list, parse_vehicle_locations};

/// Default NextBus public feed endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://retro.umoiq.com/service/publicXMLFeed";

/// Per-agency vehicle location and route metadata provider.
///
/// Both operations fail silently to an empty result; neither ever returns a
/// fatal error to the polling node.
#[async_trait]
pub trait VehicleSource: Send + Sync + 'static {
    /// Fetches the current vehicle reports for an agency, incremental from
    /// the given watermark. Returns the reports and the new watermark; on
    /// failure returns no reports and the watermark unchanged.
    async fn fetch_vehicle_locations(
        &self,
        agency_id: &str,
        since: u64,
    ) -> (Vec<VehicleReport>, u64);

    /// Fetches the agency's route list, or an empty list on failure.
    async fn fetch_route_list(&self, agency_id: &str) -> Vec<Route>;
}

/// NextBus public XML feed client.
pub struct NextBusSource<C> {
    client: C,
    endpoint: String,
}

impl<C: HttpClient> NextBusSource<C> {
    pub fn new(client: C) -> Self {
        Self::with_endpoint(client, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(client: C, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    async fn try_fetch_locations(
        &self,
        agency_id: &str,
        since: u64,
    ) -> Result<(Vec<VehicleReport>, u64)> {
        let url = format!(
            "{}?command=vehicleLocations&a={}&t={}",
            self.endpoint, agency_id, since
        );
        let bytes = fetch_bytes(&self.client, &url).await?;
        let batch = parse_vehicle_locations(&bytes, agency_id)?;
        Ok((batch.reports, batch.watermark))
    }

    async fn try_fetch_routes(&self, agency_id: &str) -> Result<Vec<Route>> {
        let url = format!("{}?command=routeList&a={}", self.endpoint, agency_id);
        let bytes = fetch_bytes(&self.client, &url).await?;
        parse_route_list(&bytes)
    }
}

#[async_trait]
impl<C: HttpClient + 'static> VehicleSource for NextBusSource<C> {
    async fn fetch_vehicle_locations(
        &self,
        agency_id: &str,
        since: u64,
    ) -> (Vec<VehicleReport>, u64) {
        match self.try_fetch_locations(agency_id, since).await {
            Ok((reports, watermark)) => (reports, watermark),
            Err(e) => {
                warn!(agency_id, error = %e, "vehicle location fetch failed, skipping cycle");
                (Vec::new(), since)
            }
        }
    }

    async fn fetch_route_list(&self, agency_id: &str) -> Vec<Route> {
        match self.try_fetch_routes(agency_id).await {
            Ok(routes) => routes,
            Err(e) => {
                warn!(agency_id, error = %e, "route list fetch failed");
                Vec::new()
            }
        }
    }
}
