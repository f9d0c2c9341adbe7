//! Agency aggregator: owns the live vehicle set for one agency.
//!
//! Polling state machine: idle until `SetInfo` arrives, then a poll task
//! fires after a short random jitter and on a fixed-rate interval after
//! that. Each tick spawns the fetch off the mailbox path, so the node stays
//! responsive (to a new `SetInfo`, for instance) while a fetch is
//! outstanding, and two in-flight polls are tolerated: batches are applied
//! with idempotent replace-set semantics. Reassignment aborts the ticker
//! and bumps the poll generation, so a fetch still in flight for the old
//! descriptor delivers a batch that no longer matches and is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::model::{AgencyInfo, BoundingBox, Route, VehicleRecord, VehicleReport};
use crate::node::join::Uplinks;
use crate::node::router::TransitRouter;
use crate::node::{AgencyMsg, DeltaKind, DeltaSender, StateMsg};
use crate::source::VehicleSource;

/// Published state of one agency.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgencySnapshot {
    pub info: Option<AgencyInfo>,
    /// Vehicle uri → enriched record; replaced wholesale each poll cycle.
    pub vehicles: HashMap<String, VehicleRecord>,
    pub count: i64,
    /// Mean of member speeds, 0.0 when the agency has no vehicles.
    pub avg_speed: f64,
    pub bounding_box: BoundingBox,
    /// Route tag → human-readable title.
    pub routes: HashMap<String, String>,
}

/// Handle to a live agency node.
#[derive(Clone)]
pub struct AgencyHandle {
    tx: mpsc::UnboundedSender<AgencyMsg>,
    state: watch::Receiver<AgencySnapshot>,
}

impl AgencyHandle {
    pub fn set_info(&self, info: AgencyInfo) {
        let _ = self.tx.send(AgencyMsg::SetInfo(info));
    }

    pub fn add_vehicles(&self, reports: Vec<VehicleReport>) {
        let _ = self.tx.send(AgencyMsg::AddVehicles {
            reports,
            generation: None,
        });
    }

    pub fn add_routes(&self, routes: Vec<Route>) {
        let _ = self.tx.send(AgencyMsg::AddRoutes(routes));
    }

    pub fn subscribe(&self, child_id: String, link: DeltaSender) {
        let _ = self.tx.send(AgencyMsg::Subscribe { child_id, link });
    }

    pub fn current(&self) -> AgencySnapshot {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<AgencySnapshot> {
        self.state.clone()
    }
}

/// Spawns an agency node task and returns its handle.
pub fn spawn(
    router: Arc<TransitRouter>,
    uri: String,
    source: Arc<dyn VehicleSource>,
    poll_interval: Duration,
) -> AgencyHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(AgencySnapshot::default());

    let node = AgencyNode {
        uri,
        router,
        source,
        poll_interval,
        self_tx: tx.clone(),
        snapshot: AgencySnapshot::default(),
        uplinks: Uplinks::new(),
        poll_task: None,
        generation: 0,
        state_tx,
    };
    tokio::spawn(node.run(rx));

    AgencyHandle {
        tx,
        state: state_rx,
    }
}

struct AgencyNode {
    uri: String,
    router: Arc<TransitRouter>,
    source: Arc<dyn VehicleSource>,
    poll_interval: Duration,
    self_tx: mpsc::UnboundedSender<AgencyMsg>,
    snapshot: AgencySnapshot,
    uplinks: Uplinks,
    poll_task: Option<JoinHandle<()>>,
    /// Bumped on every `SetInfo`; poll batches stamped with an older value
    /// belong to an aborted cycle.
    generation: u64,
    state_tx: watch::Sender<AgencySnapshot>,
}

impl AgencyNode {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AgencyMsg>) {
        info!(uri = %self.uri, "agency node started");
        while let Some(msg) = rx.recv().await {
            match msg {
                AgencyMsg::SetInfo(info) => self.on_set_info(info),
                AgencyMsg::AddVehicles {
                    reports,
                    generation,
                } => self.on_add_vehicles(reports, generation),
                AgencyMsg::AddRoutes(routes) => self.on_add_routes(routes),
                AgencyMsg::Subscribe { child_id, link } => self.on_subscribe(child_id, link),
            }
        }
        self.abort_poll();
    }

    /// Cancels any outstanding poll cycle, registers upward, and starts
    /// polling for the new descriptor.
    fn on_set_info(&mut self, info: AgencyInfo) {
        self.abort_poll();
        self.generation += 1;
        info!(uri = %self.uri, agency = %info.id, state = %info.state, "agency info set, starting poll");

        self.router
            .state(&info.country, &info.state)
            .send(StateMsg::AddAgency(info.clone()));

        self.poll_task = Some(spawn_poll(
            self.source.clone(),
            info.id.clone(),
            self.self_tx.clone(),
            self.poll_interval,
            self.generation,
        ));
        self.snapshot.info = Some(info);
        self.publish();
    }

    fn abort_poll(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }

    /// Applies a replace-set batch: members absent from the batch are
    /// removed, every present member is upserted and re-dispatched to its
    /// vehicle node, then count, average speed and bounding box are
    /// recomputed by a full scan over the member set.
    fn on_add_vehicles(&mut self, reports: Vec<VehicleReport>, generation: Option<u64>) {
        if generation.is_some_and(|g| g != self.generation) {
            debug!(uri = %self.uri, "batch from superseded poll cycle dropped");
            return;
        }
        if reports.is_empty() {
            // a failed or quiet poll produces no update this cycle
            return;
        }

        let mut incoming: HashMap<String, VehicleRecord> = HashMap::with_capacity(reports.len());
        for report in reports {
            let record = self.enrich(report);
            incoming.insert(record.uri.clone(), record);
        }

        let stale: Vec<String> = self
            .snapshot
            .vehicles
            .keys()
            .filter(|uri| !incoming.contains_key(*uri))
            .cloned()
            .collect();
        for uri in stale {
            self.snapshot.vehicles.remove(&uri);
            self.uplinks.broadcast(DeltaKind::VehicleRemove { uri });
        }

        for (uri, record) in incoming {
            self.router.vehicle(&uri).update(record.clone());
            self.uplinks.broadcast(DeltaKind::VehicleUpsert {
                uri: uri.clone(),
                record: record.clone(),
            });
            self.snapshot.vehicles.insert(uri, record);
        }

        self.recompute();
        debug!(
            uri = %self.uri,
            count = self.snapshot.count,
            avg_speed = self.snapshot.avg_speed,
            "batch applied"
        );
        self.publish();
        self.uplinks.broadcast(DeltaKind::Count(self.snapshot.count));
        self.uplinks
            .broadcast(DeltaKind::Speed(self.snapshot.avg_speed));
    }

    fn on_add_routes(&mut self, routes: Vec<Route>) {
        for route in routes {
            self.snapshot.routes.insert(route.tag, route.title);
        }
        self.publish();
    }

    fn on_subscribe(&mut self, child_id: String, link: DeltaSender) {
        self.uplinks.open(child_id.clone(), link);
        // replay current state so the new parent's cache converges without
        // waiting for the next poll
        self.uplinks
            .send_to(&child_id, DeltaKind::Count(self.snapshot.count));
        self.uplinks
            .send_to(&child_id, DeltaKind::Speed(self.snapshot.avg_speed));
        for (uri, record) in self.snapshot.vehicles.clone() {
            self.uplinks
                .send_to(&child_id, DeltaKind::VehicleUpsert { uri, record });
        }
    }

    /// Resolves the route title (empty when unknown; the vehicle is kept
    /// either way) and derives direction and compass heading.
    fn enrich(&self, report: VehicleReport) -> VehicleRecord {
        VehicleRecord {
            uri: report.uri(),
            route_title: self
                .snapshot
                .routes
                .get(&report.route_tag)
                .cloned()
                .unwrap_or_default(),
            direction: report.direction(),
            heading: report.heading(),
            agency_id: report.agency_id,
            route_tag: report.route_tag,
            latitude: report.latitude,
            longitude: report.longitude,
            speed_km_h: report.speed_km_h,
            secs_since_report: report.secs_since_report,
        }
    }

    fn recompute(&mut self) {
        let vehicles = &self.snapshot.vehicles;
        let mut bounding_box = BoundingBox::empty();
        let mut speed_sum = 0i64;
        for record in vehicles.values() {
            speed_sum += record.speed_km_h;
            bounding_box.extend(record.latitude, record.longitude);
        }
        self.snapshot.count = vehicles.len() as i64;
        self.snapshot.avg_speed = if vehicles.is_empty() {
            0.0
        } else {
            speed_sum as f64 / vehicles.len() as f64
        };
        self.snapshot.bounding_box = bounding_box;
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot.clone());
    }
}

/// The per-agency poll cycle: jittered start, route table fetch, then
/// fixed-rate vehicle location fetches. Owned by exactly one `SetInfo`
/// assignment; the next assignment aborts it wholesale. Every batch is
/// stamped with this cycle's generation so that a fetch outliving the abort
/// cannot land its result under the new assignment.
fn spawn_poll(
    source: Arc<dyn VehicleSource>,
    agency_id: String,
    tx: mpsc::UnboundedSender<AgencyMsg>,
    poll_interval: Duration,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // spread initial polls across agencies sharing the process
        let jitter_cap = poll_interval.min(Duration::from_millis(1000)).as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..jitter_cap.max(1));
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let routes = source.fetch_route_list(&agency_id).await;
        if !routes.is_empty() {
            let _ = tx.send(AgencyMsg::AddRoutes(routes));
        }

        let watermark = Arc::new(AtomicU64::new(0));
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            // fixed-rate: the next tick is due regardless of how long this
            // fetch takes, so fetches run detached from the tick loop
            ticker.tick().await;
            let source = source.clone();
            let tx = tx.clone();
            let agency_id = agency_id.clone();
            let watermark = watermark.clone();
            tokio::spawn(async move {
                let since = watermark.load(Ordering::Acquire);
                let (reports, new_watermark) =
                    source.fetch_vehicle_locations(&agency_id, since).await;
                watermark.store(new_watermark, Ordering::Release);
                let _ = tx.send(AgencyMsg::AddVehicles {
                    reports,
                    generation: Some(generation),
                });
            });
        }
    })
}
