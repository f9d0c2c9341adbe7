//! Per-vehicle node: latest report plus bounded rolling histories.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::model::VehicleRecord;
use crate::node::VehicleMsg;

/// Rolling history capacity for speeds and accelerations.
pub const HISTORY_CAPACITY: usize = 10;

/// Published state of one vehicle. Histories are keyed by the adjusted
/// report timestamp (ms), so iteration yields samples in time order and the
/// oldest entry is always first to go.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VehicleState {
    pub record: Option<VehicleRecord>,
    /// Wall clock at receipt minus the report's age.
    pub report_timestamp: i64,
    pub speeds: BTreeMap<i64, i64>,
    pub accelerations: BTreeMap<i64, i64>,
}

/// Handle to a live vehicle node.
#[derive(Clone)]
pub struct VehicleHandle {
    tx: mpsc::UnboundedSender<VehicleMsg>,
    state: watch::Receiver<VehicleState>,
}

impl VehicleHandle {
    pub fn update(&self, record: VehicleRecord) {
        let _ = self.tx.send(VehicleMsg::Update(record));
    }

    pub fn current(&self) -> VehicleState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<VehicleState> {
        self.state.clone()
    }
}

/// Spawns a vehicle node task and returns its handle.
pub fn spawn(uri: String) -> VehicleHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(VehicleState::default());
    tokio::spawn(run(uri, rx, state_tx));
    VehicleHandle {
        tx,
        state: state_rx,
    }
}

async fn run(
    uri: String,
    mut rx: mpsc::UnboundedReceiver<VehicleMsg>,
    state_tx: watch::Sender<VehicleState>,
) {
    debug!(%uri, "vehicle node started");
    let mut state = VehicleState::default();
    let mut last_reported_time = 0i64;

    while let Some(VehicleMsg::Update(record)) = rx.recv().await {
        apply_update(
            &mut state,
            &mut last_reported_time,
            record,
            Utc::now().timestamp_millis(),
        );
        state_tx.send_replace(state.clone());
    }
}

/// Applies one report against the vehicle state.
///
/// The acceleration formula is carried over verbatim from the upstream feed
/// consumers: `(new_speed − old_speed) / Δt_ms × 3600`, rounded. The 3600
/// factor does not make this km/h-per-hour exactly; see the unit note in the
/// tests before changing it.
fn apply_update(
    state: &mut VehicleState,
    last_reported_time: &mut i64,
    record: VehicleRecord,
    now_ms: i64,
) {
    let age_secs = record.secs_since_report.max(0);
    let time = now_ms - age_secs * 1000;

    let old_speed = state.record.as_ref().map(|r| r.speed_km_h).unwrap_or(0);
    let new_speed = record.speed_km_h;

    state.record = Some(record);
    state.report_timestamp = time;
    state.speeds.insert(time, new_speed);
    trim(&mut state.speeds);

    if *last_reported_time > 0 && time != *last_reported_time {
        let acceleration =
            (new_speed - old_speed) as f64 / (time - *last_reported_time) as f64 * 3600.0;
        state
            .accelerations
            .insert(time, acceleration.round() as i64);
        trim(&mut state.accelerations);
    }
    *last_reported_time = time;
}

fn trim(history: &mut BTreeMap<i64, i64>) {
    while history.len() > HISTORY_CAPACITY {
        history.pop_first();
    }
}
