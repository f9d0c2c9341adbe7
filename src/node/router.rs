//! Address-keyed registry of live nodes.
//!
//! Nodes are addressed by hierarchical string keys
//! (`/vehicle/{agencyId}/{vehicleId}`, `/agency/{agencyId}`,
//! `/state/{country}/{state}`, `/country/{country}`) and spawned lazily on
//! first reference, which is what lets the subscription tree self-assemble:
//! an agency registering under its state key creates the state node, which
//! in turn creates its country node.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::node::agency::{self, AgencyHandle};
use crate::node::country::{self, CountryHandle};
use crate::node::state::{self, StateHandle};
use crate::node::vehicle::{self, VehicleHandle};
use crate::source::VehicleSource;

pub struct TransitRouter {
    source: Arc<dyn VehicleSource>,
    poll_interval: Duration,
    vehicles: Mutex<HashMap<String, VehicleHandle>>,
    agencies: Mutex<HashMap<String, AgencyHandle>>,
    states: Mutex<HashMap<String, StateHandle>>,
    countries: Mutex<HashMap<String, CountryHandle>>,
}

impl TransitRouter {
    pub fn new(source: Arc<dyn VehicleSource>, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            poll_interval,
            vehicles: Mutex::new(HashMap::new()),
            agencies: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            countries: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves `/agency/{agencyId}`, spawning the node on first reference.
    pub fn agency(self: &Arc<Self>, agency_id: &str) -> AgencyHandle {
        let uri = format!("/agency/{agency_id}");
        let mut agencies = self.agencies.lock().unwrap();
        agencies
            .entry(uri.clone())
            .or_insert_with(|| {
                agency::spawn(
                    self.clone(),
                    uri,
                    self.source.clone(),
                    self.poll_interval,
                )
            })
            .clone()
    }

    /// Resolves a vehicle node by its canonical uri.
    pub fn vehicle(self: &Arc<Self>, uri: &str) -> VehicleHandle {
        let mut vehicles = self.vehicles.lock().unwrap();
        vehicles
            .entry(uri.to_string())
            .or_insert_with(|| vehicle::spawn(uri.to_string()))
            .clone()
    }

    /// Resolves `/state/{country}/{state}`, spawning the node on first
    /// reference.
    pub fn state(self: &Arc<Self>, country: &str, state: &str) -> StateHandle {
        let uri = format!("/state/{country}/{state}");
        let mut states = self.states.lock().unwrap();
        states
            .entry(uri.clone())
            .or_insert_with(|| state::spawn(self.clone(), uri))
            .clone()
    }

    /// Resolves `/country/{country}`, spawning the node on first reference.
    pub fn country(self: &Arc<Self>, country: &str) -> CountryHandle {
        let uri = format!("/country/{country}");
        let mut countries = self.countries.lock().unwrap();
        countries
            .entry(uri.clone())
            .or_insert_with(|| country::spawn(self.clone(), uri))
            .clone()
    }

    /// Snapshot of the live country nodes, for operator rollup logging.
    pub fn countries(&self) -> Vec<(String, CountryHandle)> {
        let countries = self.countries.lock().unwrap();
        countries
            .iter()
            .map(|(uri, handle)| (uri.clone(), handle.clone()))
            .collect()
    }
}
