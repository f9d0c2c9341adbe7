//! End-to-end scenarios over the node hierarchy with a scripted source.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, watch};

use transit_live::model::{AgencyInfo, Route, VehicleReport};
use transit_live::node::router::TransitRouter;
use transit_live::source::VehicleSource;

/// Feed stub returning pre-scripted batches per agency, in order; once a
/// script runs dry the agency looks quiet (empty batches).
#[derive(Default)]
struct MockSource {
    batches: Mutex<HashMap<String, VecDeque<Vec<VehicleReport>>>>,
    routes: Mutex<HashMap<String, Vec<Route>>>,
}

impl MockSource {
    fn script(&self, agency_id: &str, batches: Vec<Vec<VehicleReport>>) {
        self.batches
            .lock()
            .unwrap()
            .insert(agency_id.to_string(), batches.into());
    }

    fn script_routes(&self, agency_id: &str, routes: Vec<Route>) {
        self.routes
            .lock()
            .unwrap()
            .insert(agency_id.to_string(), routes);
    }
}

#[async_trait]
impl VehicleSource for MockSource {
    async fn fetch_vehicle_locations(
        &self,
        agency_id: &str,
        since: u64,
    ) -> (Vec<VehicleReport>, u64) {
        let mut batches = self.batches.lock().unwrap();
        let reports = batches
            .get_mut(agency_id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();
        (reports, since + 1)
    }

    async fn fetch_route_list(&self, agency_id: &str) -> Vec<Route> {
        self.routes
            .lock()
            .unwrap()
            .get(agency_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn report(agency_id: &str, id: &str, speed: i64, lat: f64, lon: f64) -> VehicleReport {
    VehicleReport {
        id: id.to_string(),
        agency_id: agency_id.to_string(),
        route_tag: String::new(),
        direction_tag: String::new(),
        latitude: lat,
        longitude: lon,
        speed_km_h: speed,
        heading_degrees: 0,
        secs_since_report: 0,
    }
}

fn info(id: &str, state: &str, country: &str, index: usize) -> AgencyInfo {
    AgencyInfo {
        id: id.to_string(),
        state: state.to_string(),
        country: country.to_string(),
        index,
    }
}

/// Waits until the published snapshot satisfies the predicate. Conditions
/// must describe a stable state: watch observers only ever see the latest
/// value, never every intermediate one.
async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, pred: F) -> T
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            rx.changed().await.expect("node stopped publishing");
        }
    })
    .await
    .expect("condition not reached within timeout")
}

#[tokio::test]
async fn test_two_poll_replace_set_scenario() {
    let source = Arc::new(MockSource::default());
    source.script(
        "muni",
        vec![
            vec![
                report("muni", "v1", 10, 37.70, -122.40),
                report("muni", "v2", 20, 37.80, -122.30),
            ],
            vec![report("muni", "v1", 30, 37.75, -122.35)],
        ],
    );
    let router = TransitRouter::new(source, Duration::from_millis(25));
    let agency = router.agency("muni");
    agency.set_info(info("muni", "CA", "US", 0));
    let mut agency_watch = agency.watch();

    let snapshot = wait_for(&mut agency_watch, |s| s.count == 2).await;
    assert_eq!(snapshot.avg_speed, 15.0);
    assert!(snapshot.bounding_box.contains(37.70, -122.40));
    assert!(snapshot.bounding_box.contains(37.80, -122.30));
    assert!(snapshot.vehicles.contains_key("/vehicle/muni/v1"));
    assert!(snapshot.vehicles.contains_key("/vehicle/muni/v2"));

    let snapshot = wait_for(&mut agency_watch, |s| s.count == 1).await;
    assert_eq!(snapshot.avg_speed, 30.0);
    assert!(!snapshot.vehicles.contains_key("/vehicle/muni/v2"));
    assert_eq!(snapshot.vehicles["/vehicle/muni/v1"].speed_km_h, 30);
}

#[tokio::test]
async fn test_route_titles_resolved_and_unknown_tags_kept() {
    let source = Arc::new(MockSource::default());
    source.script_routes(
        "ttc",
        vec![Route {
            tag: "5".to_string(),
            title: "5-Dundas".to_string(),
        }],
    );
    let mut known = report("ttc", "a", 12, 43.65, -79.38);
    known.route_tag = "5".to_string();
    let mut unknown = report("ttc", "b", 18, 43.66, -79.39);
    unknown.route_tag = "99".to_string();
    source.script("ttc", vec![vec![known, unknown]]);

    let router = TransitRouter::new(source, Duration::from_millis(25));
    let agency = router.agency("ttc");
    agency.set_info(info("ttc", "ON", "CA", 0));
    let mut agency_watch = agency.watch();

    let snapshot = wait_for(&mut agency_watch, |s| s.count == 2).await;
    assert_eq!(snapshot.routes["5"], "5-Dundas");
    assert_eq!(snapshot.vehicles["/vehicle/ttc/a"].route_title, "5-Dundas");
    // unknown route tags keep the vehicle, with an empty title
    assert_eq!(snapshot.vehicles["/vehicle/ttc/b"].route_title, "");
}

#[tokio::test]
async fn test_empty_batch_is_no_update() {
    let source = Arc::new(MockSource::default());
    let router = TransitRouter::new(source, Duration::from_millis(25));
    let agency = router.agency("mbta");
    agency.set_info(info("mbta", "MA", "US", 0));
    let mut agency_watch = agency.watch();

    agency.add_vehicles(vec![report("mbta", "v1", 10, 42.35, -71.06)]);
    wait_for(&mut agency_watch, |s| s.count == 1).await;

    // a failed/quiet poll yields an empty batch: state must be untouched
    agency.add_vehicles(Vec::new());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = agency.current();
    assert_eq!(snapshot.count, 1);
    assert!(snapshot.vehicles.contains_key("/vehicle/mbta/v1"));
}

#[tokio::test]
async fn test_vehicle_nodes_receive_dispatches() {
    let source = Arc::new(MockSource::default());
    let router = TransitRouter::new(source, Duration::from_millis(25));
    let agency = router.agency("muni");
    agency.set_info(info("muni", "CA", "US", 0));
    let mut agency_watch = agency.watch();

    agency.add_vehicles(vec![report("muni", "v1", 14, 37.76, -122.45)]);
    wait_for(&mut agency_watch, |s| s.count == 1).await;

    let vehicle = router.vehicle("/vehicle/muni/v1");
    let mut vehicle_watch = vehicle.watch();
    let state = wait_for(&mut vehicle_watch, |s| s.record.is_some()).await;
    assert_eq!(state.record.unwrap().speed_km_h, 14);
    assert_eq!(state.speeds.len(), 1);

    // every batch re-dispatches, growing the rolling history
    agency.add_vehicles(vec![report("muni", "v1", 16, 37.77, -122.44)]);
    let state = wait_for(&mut vehicle_watch, |s| s.speeds.len() == 2).await;
    assert_eq!(state.record.unwrap().speed_km_h, 16);
}

#[tokio::test]
async fn test_set_info_reassignment_switches_feed() {
    let source = Arc::new(MockSource::default());
    source.script(
        "muni-old",
        vec![
            vec![report("muni-old", "v1", 10, 37.70, -122.40)],
            vec![report("muni-old", "ghost", 99, 0.0, 0.0)],
        ],
    );
    source.script(
        "muni-new",
        vec![
            vec![report("muni-new", "w1", 20, 38.00, -122.00)],
            vec![report("muni-new", "w1", 25, 38.01, -122.01)],
        ],
    );
    let router = TransitRouter::new(source, Duration::from_millis(25));
    let agency = router.agency("muni");
    agency.set_info(info("muni-old", "CA", "US", 0));
    let mut agency_watch = agency.watch();

    wait_for(&mut agency_watch, |s| {
        s.vehicles.contains_key("/vehicle/muni-old/v1")
    })
    .await;

    // reassign mid-run: the old poll cycle is aborted, a fresh one starts
    agency.set_info(info("muni-new", "CA", "US", 0));
    let snapshot = wait_for(&mut agency_watch, |s| {
        s.vehicles
            .get("/vehicle/muni-new/w1")
            .map(|v| v.speed_km_h)
            == Some(25)
    })
    .await;

    // polling continued through the new descriptor's second batch, and
    // nothing scripted for the old descriptor landed after the switch
    assert_eq!(snapshot.info.as_ref().unwrap().id, "muni-new");
    assert!(!snapshot.vehicles.contains_key("/vehicle/muni-old/v1"));
    assert!(!snapshot.vehicles.contains_key("/vehicle/muni-old/ghost"));
    assert_eq!(snapshot.count, 1);
}

/// Source whose fetches for one agency block until released, to hold a
/// fetch in flight across a reconfiguration.
#[derive(Default)]
struct GatedSource {
    gate: Notify,
}

#[async_trait]
impl VehicleSource for GatedSource {
    async fn fetch_vehicle_locations(
        &self,
        agency_id: &str,
        since: u64,
    ) -> (Vec<VehicleReport>, u64) {
        match agency_id {
            "gated" => {
                self.gate.notified().await;
                (vec![report("gated", "ghost", 99, 0.0, 0.0)], since + 1)
            }
            "live" => (vec![report("live", "fresh", 10, 38.0, -122.0)], since + 1),
            _ => (Vec::new(), since),
        }
    }

    async fn fetch_route_list(&self, _agency_id: &str) -> Vec<Route> {
        Vec::new()
    }
}

#[tokio::test]
async fn test_in_flight_fetch_from_superseded_cycle_is_dropped() {
    let source = Arc::new(GatedSource::default());
    let router = TransitRouter::new(source.clone(), Duration::from_millis(25));
    let agency = router.agency("muni");
    agency.set_info(info("gated", "CA", "US", 0));
    let mut agency_watch = agency.watch();

    // let the first cycle start a fetch, then reassign while it is blocked
    tokio::time::sleep(Duration::from_millis(100)).await;
    agency.set_info(info("live", "CA", "US", 0));
    wait_for(&mut agency_watch, |s| {
        s.vehicles.contains_key("/vehicle/live/fresh")
    })
    .await;

    // release the old fetch: its batch belongs to the superseded cycle and
    // must not land under the new assignment
    source.gate.notify_waiters();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = agency.current();
    assert!(!snapshot.vehicles.contains_key("/vehicle/gated/ghost"));
    assert!(snapshot.vehicles.contains_key("/vehicle/live/fresh"));
    assert_eq!(snapshot.count, 1);
}

#[tokio::test]
async fn test_state_and_country_rollup() {
    let source = Arc::new(MockSource::default());
    let router = TransitRouter::new(source, Duration::from_millis(25));

    let muni = router.agency("muni");
    muni.set_info(info("muni", "CA", "US", 0));
    let actransit = router.agency("actransit");
    actransit.set_info(info("actransit", "CA", "US", 1));

    muni.add_vehicles(vec![
        report("muni", "v1", 10, 37.70, -122.40),
        report("muni", "v2", 20, 37.80, -122.30),
    ]);
    actransit.add_vehicles(vec![report("actransit", "b1", 40, 37.60, -122.10)]);

    let state = router.state("US", "CA");
    let mut state_watch = state.watch();
    let snapshot = wait_for(&mut state_watch, |s| {
        s.count.current == 3 && (s.avg_speed - 27.5).abs() < 1e-9
    })
    .await;
    // speed at this level is the mean over child agencies (15 and 40)
    assert_eq!(snapshot.vehicles.len(), 3);
    assert_eq!(snapshot.agencies.len(), 2);
    assert_eq!(snapshot.agencies[0].id, "muni");

    let country = router.country("US");
    let mut country_watch = country.watch();
    let snapshot = wait_for(&mut country_watch, |s| s.count.current == 3).await;
    assert!(snapshot.states.contains("CA"));
    assert_eq!(snapshot.count.max, 3);
    assert_eq!(snapshot.vehicles.len(), 3);
    assert!(snapshot.agencies.contains_key("/agency/muni"));
}

#[tokio::test]
async fn test_count_max_survives_member_drop() {
    let source = Arc::new(MockSource::default());
    let router = TransitRouter::new(source, Duration::from_millis(25));
    let agency = router.agency("muni");
    agency.set_info(info("muni", "CA", "US", 0));

    let state = router.state("US", "CA");
    let mut state_watch = state.watch();
    let country = router.country("US");
    let mut country_watch = country.watch();

    agency.add_vehicles(vec![
        report("muni", "v1", 10, 37.70, -122.40),
        report("muni", "v2", 20, 37.80, -122.30),
    ]);
    wait_for(&mut state_watch, |s| s.count.current == 2).await;

    agency.add_vehicles(vec![report("muni", "v1", 30, 37.75, -122.35)]);
    let snapshot = wait_for(&mut state_watch, |s| s.count.current == 1).await;
    assert_eq!(snapshot.count.max, 2);
    assert!(!snapshot.vehicles.contains_key("/vehicle/muni/v2"));

    let snapshot = wait_for(&mut country_watch, |s| s.count.current == 1).await;
    assert_eq!(snapshot.count.max, 2);
}
