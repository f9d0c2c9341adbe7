//! The hierarchical live-aggregation engine.
//!
//! Every node (vehicle, agency, state, country) is a tokio task draining an
//! unbounded mailbox strictly sequentially against its own private state;
//! nothing is shared between nodes except messages. Derived state is
//! published through `tokio::sync::watch` snapshots so observers never
//! contact a node synchronously.
//!
//! Parents subscribe to children by handing them a [`ChildDelta`] sender
//! tagged with the child identity they assigned; children replay their
//! current values on subscribe and push every subsequent change.

pub mod agency;
pub mod country;
pub mod join;
pub mod router;
pub mod state;
pub mod vehicle;

use tokio::sync::mpsc;

use crate::model::{AgencyInfo, Route, VehicleRecord, VehicleReport};

/// A change notification delivered over a live subscription link, stamped
/// with the child identity the subscriber assigned when opening the link.
#[derive(Debug, Clone)]
pub struct ChildDelta {
    pub child_id: String,
    pub kind: DeltaKind,
}

/// The observable attributes a parent can subscribe to.
#[derive(Debug, Clone)]
pub enum DeltaKind {
    /// The child's current live vehicle count.
    Count(i64),
    /// The child's current average speed.
    Speed(f64),
    /// A single vehicle entered or changed in the child's vehicle map.
    VehicleUpsert { uri: String, record: VehicleRecord },
    /// A single vehicle left the child's vehicle map.
    VehicleRemove { uri: String },
}

/// Sender half of a subscription link.
pub type DeltaSender = mpsc::UnboundedSender<ChildDelta>;

/// Inbound messages for an agency aggregator.
#[derive(Debug)]
pub enum AgencyMsg {
    /// Assign (or replace) the agency descriptor; cancels any in-flight poll
    /// cycle and starts a fresh one.
    SetInfo(AgencyInfo),
    /// A full batch of current vehicle reports (replace-set semantics). An
    /// empty batch means "no update this cycle". Poll-originated batches
    /// carry their cycle's generation; a batch from a superseded cycle is
    /// discarded.
    AddVehicles {
        reports: Vec<VehicleReport>,
        generation: Option<u64>,
    },
    /// Route metadata for the tag→title table.
    AddRoutes(Vec<Route>),
    /// Open a live subscription to this agency's count, speed and vehicles.
    Subscribe { child_id: String, link: DeltaSender },
}

/// Inbound messages for a vehicle node.
#[derive(Debug)]
pub enum VehicleMsg {
    Update(VehicleRecord),
}

/// Inbound messages for a state aggregator.
#[derive(Debug)]
pub enum StateMsg {
    /// An agency registered under this state; subscribe to it and forward a
    /// summarized registration to the country.
    AddAgency(AgencyInfo),
    /// Open a live subscription to this state's aggregates.
    Subscribe { child_id: String, link: DeltaSender },
}

/// Inbound messages for a country aggregator.
#[derive(Debug)]
pub enum CountryMsg {
    /// A state (re-)announced one of its agencies; subscribe to the state on
    /// first contact.
    AddState {
        agency: AgencyInfo,
        state_uri: String,
    },
}
