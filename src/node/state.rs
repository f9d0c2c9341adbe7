//! State-level aggregator: fan-in over the agencies registered under one
//! country/state key.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::model::{AgencyInfo, VehicleRecord};
use crate::node::join::{CountTally, LevelAggregates, Uplinks};
use crate::node::router::TransitRouter;
use crate::node::{ChildDelta, DeltaKind, DeltaSender, StateMsg};

/// Published state of one state-level aggregate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateSnapshot {
    pub count: CountTally,
    pub avg_speed: f64,
    /// Union of the member agencies' vehicle maps.
    pub vehicles: HashMap<String, VehicleRecord>,
    pub agencies: Vec<AgencyInfo>,
}

/// Handle to a live state node.
#[derive(Clone)]
pub struct StateHandle {
    tx: mpsc::UnboundedSender<StateMsg>,
    state: watch::Receiver<StateSnapshot>,
}

impl StateHandle {
    pub fn send(&self, msg: StateMsg) {
        let _ = self.tx.send(msg);
    }

    pub fn subscribe(&self, child_id: String, link: DeltaSender) {
        self.send(StateMsg::Subscribe { child_id, link });
    }

    pub fn current(&self) -> StateSnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<StateSnapshot> {
        self.state.clone()
    }
}

/// Spawns a state node task and returns its handle.
pub fn spawn(router: Arc<TransitRouter>, uri: String) -> StateHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(StateSnapshot::default());
    let (delta_tx, delta_rx) = mpsc::unbounded_channel();

    let node = StateNode {
        uri,
        router,
        aggregates: LevelAggregates::new(),
        agencies: HashMap::new(),
        uplinks: Uplinks::new(),
        delta_tx,
        state_tx,
    };
    tokio::spawn(node.run(rx, delta_rx));

    StateHandle {
        tx,
        state: state_rx,
    }
}

struct StateNode {
    uri: String,
    router: Arc<TransitRouter>,
    aggregates: LevelAggregates,
    agencies: HashMap<String, AgencyInfo>,
    uplinks: Uplinks,
    /// Handed to children when subscribing; keeps the delta channel open
    /// for the node's lifetime.
    delta_tx: DeltaSender,
    state_tx: watch::Sender<StateSnapshot>,
}

impl StateNode {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<StateMsg>,
        mut delta_rx: mpsc::UnboundedReceiver<ChildDelta>,
    ) {
        info!(uri = %self.uri, "state node started");
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(StateMsg::AddAgency(info)) => self.on_add_agency(info),
                    Some(StateMsg::Subscribe { child_id, link }) => self.on_subscribe(child_id, link),
                    None => break,
                },
                Some(delta) = delta_rx.recv() => self.on_delta(delta),
            }
        }
    }

    /// Registers a newly announced agency: one live link per agency id, and
    /// a summarized registration forwarded up so the country can subscribe
    /// to this state in turn.
    fn on_add_agency(&mut self, info: AgencyInfo) {
        let is_new = !self.agencies.contains_key(&info.id);
        self.agencies.insert(info.id.clone(), info.clone());

        if is_new {
            info!(uri = %self.uri, agency = %info.id, "agency registered");
            self.router
                .agency(&info.id)
                .subscribe(info.id.clone(), self.delta_tx.clone());
            self.router
                .country(&info.country)
                .add_state(info, self.uri.clone());
        }
        self.publish();
    }

    fn on_subscribe(&mut self, child_id: String, link: DeltaSender) {
        self.uplinks.open(child_id.clone(), link);
        self.uplinks
            .send_to(&child_id, DeltaKind::Count(self.aggregates.count.current));
        self.uplinks
            .send_to(&child_id, DeltaKind::Speed(self.aggregates.avg_speed));
        for (uri, record) in self.aggregates.vehicles.clone() {
            self.uplinks
                .send_to(&child_id, DeltaKind::VehicleUpsert { uri, record });
        }
    }

    /// Every child delta triggers a synchronous recompute over the child
    /// cache, then the resulting level delta is pushed to this node's own
    /// subscribers.
    fn on_delta(&mut self, delta: ChildDelta) {
        let outbound = self.aggregates.apply(delta);
        self.publish();
        self.uplinks.broadcast(outbound);
    }

    fn publish(&self) {
        let mut agencies: Vec<AgencyInfo> = self.agencies.values().cloned().collect();
        agencies.sort_by_key(|a| a.index);
        self.state_tx.send_replace(StateSnapshot {
            count: self.aggregates.count,
            avg_speed: self.aggregates.avg_speed,
            vehicles: self.aggregates.vehicles.clone(),
            agencies,
        });
    }
}
