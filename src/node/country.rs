//! Country-level aggregator: fan-in over the states that have announced
//! agencies under this country key.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::model::{AgencyInfo, VehicleRecord};
use crate::node::join::{CountTally, LevelAggregates};
use crate::node::router::TransitRouter;
use crate::node::{ChildDelta, CountryMsg, DeltaSender};

/// Published state of one country-level aggregate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CountrySnapshot {
    pub count: CountTally,
    pub avg_speed: f64,
    /// Union of the member states' vehicle maps.
    pub vehicles: HashMap<String, VehicleRecord>,
    pub states: BTreeSet<String>,
    /// Every agency announced under this country, keyed by agency uri.
    pub agencies: HashMap<String, AgencyInfo>,
}

/// Handle to a live country node.
#[derive(Clone)]
pub struct CountryHandle {
    tx: mpsc::UnboundedSender<CountryMsg>,
    state: watch::Receiver<CountrySnapshot>,
}

impl CountryHandle {
    pub fn add_state(&self, agency: AgencyInfo, state_uri: String) {
        let _ = self.tx.send(CountryMsg::AddState { agency, state_uri });
    }

    pub fn current(&self) -> CountrySnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<CountrySnapshot> {
        self.state.clone()
    }
}

/// Spawns a country node task and returns its handle.
pub fn spawn(router: Arc<TransitRouter>, uri: String) -> CountryHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(CountrySnapshot::default());
    let (delta_tx, delta_rx) = mpsc::unbounded_channel();

    let node = CountryNode {
        uri,
        router,
        aggregates: LevelAggregates::new(),
        states: BTreeSet::new(),
        agencies: HashMap::new(),
        delta_tx,
        state_tx,
    };
    tokio::spawn(node.run(rx, delta_rx));

    CountryHandle {
        tx,
        state: state_rx,
    }
}

struct CountryNode {
    uri: String,
    router: Arc<TransitRouter>,
    aggregates: LevelAggregates,
    states: BTreeSet<String>,
    agencies: HashMap<String, AgencyInfo>,
    delta_tx: DeltaSender,
    state_tx: watch::Sender<CountrySnapshot>,
}

impl CountryNode {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<CountryMsg>,
        mut delta_rx: mpsc::UnboundedReceiver<ChildDelta>,
    ) {
        info!(uri = %self.uri, "country node started");
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(CountryMsg::AddState { agency, state_uri }) => {
                        self.on_add_state(agency, state_uri)
                    }
                    None => break,
                },
                Some(delta) = delta_rx.recv() => self.on_delta(delta),
            }
        }
    }

    /// Records the announcing agency and, on first contact with its state,
    /// opens live links to the state's aggregates (child id = state name).
    fn on_add_state(&mut self, agency: AgencyInfo, state_uri: String) {
        self.agencies.insert(agency.uri(), agency.clone());

        if self.states.insert(agency.state.clone()) {
            info!(uri = %self.uri, state = %state_uri, "state registered");
            self.router
                .state(&agency.country, &agency.state)
                .subscribe(agency.state.clone(), self.delta_tx.clone());
        }
        self.publish();
    }

    fn on_delta(&mut self, delta: ChildDelta) {
        self.aggregates.apply(delta);
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(CountrySnapshot {
            count: self.aggregates.count,
            avg_speed: self.aggregates.avg_speed,
            vehicles: self.aggregates.vehicles.clone(),
            states: self.states.clone(),
            agencies: self.agencies.clone(),
        });
    }
}
