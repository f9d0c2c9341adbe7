//! Subscription Registry primitives.
//!
//! The fan-in side ([`JoinValue`], [`CountTally`], [`LevelAggregates`])
//! caches each child's last reported value so an aggregate can be recomputed
//! without contacting children. The fan-out side ([`Uplinks`]) keeps one
//! live link per child identity and prunes links whose receiver is gone.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::VehicleRecord;
use crate::node::{ChildDelta, DeltaKind, DeltaSender};

/// Cache of the last known value per child identity.
#[derive(Debug, Default)]
pub struct JoinValue<V> {
    cache: HashMap<String, V>,
}

impl<V> JoinValue<V> {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    pub fn update(&mut self, child_id: &str, value: V) {
        self.cache.insert(child_id.to_string(), value);
    }

    pub fn remove(&mut self, child_id: &str) -> Option<V> {
        self.cache.remove(child_id)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.cache.values()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Count aggregate with a monotone high-water mark. `max` never resets for
/// the lifetime of the owning node, even when children retract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountTally {
    pub current: i64,
    pub max: i64,
}

impl CountTally {
    pub fn recompute(&mut self, sum: i64) {
        self.current = sum;
        self.max = self.max.max(sum);
    }
}

/// The combined count/speed/vehicle-union state a State or Country level
/// derives from its children.
#[derive(Debug, Default)]
pub struct LevelAggregates {
    counts: JoinValue<i64>,
    speeds: JoinValue<f64>,
    pub count: CountTally,
    pub avg_speed: f64,
    pub vehicles: HashMap<String, VehicleRecord>,
}

impl LevelAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one child delta and returns the outbound delta describing how
    /// this level changed, for re-broadcast to its own subscribers.
    ///
    /// Counts are recomputed as the sum over the cache with a monotone max;
    /// speed is the arithmetic mean over children (skipped while no child
    /// has reported one); vehicle deltas are applied individually since
    /// children report deltas, not snapshots.
    pub fn apply(&mut self, delta: ChildDelta) -> DeltaKind {
        match delta.kind {
            DeltaKind::Count(count) => {
                self.counts.update(&delta.child_id, count);
                self.count.recompute(self.counts.values().sum());
                DeltaKind::Count(self.count.current)
            }
            DeltaKind::Speed(speed) => {
                self.speeds.update(&delta.child_id, speed);
                if !self.speeds.is_empty() {
                    self.avg_speed = self.speeds.values().sum::<f64>() / self.speeds.len() as f64;
                }
                DeltaKind::Speed(self.avg_speed)
            }
            DeltaKind::VehicleUpsert { uri, record } => {
                self.vehicles.insert(uri.clone(), record.clone());
                DeltaKind::VehicleUpsert { uri, record }
            }
            DeltaKind::VehicleRemove { uri } => {
                self.vehicles.remove(&uri);
                DeltaKind::VehicleRemove { uri }
            }
        }
    }

    /// Evicts a child from every cache and recomputes the count. The max
    /// stays where it was.
    pub fn remove_child(&mut self, child_id: &str) {
        self.counts.remove(child_id);
        self.speeds.remove(child_id);
        self.count.recompute(self.counts.values().sum());
        if !self.speeds.is_empty() {
            self.avg_speed = self.speeds.values().sum::<f64>() / self.speeds.len() as f64;
        }
    }
}

/// Fan-out side of the registry: the live links a node pushes its deltas to,
/// keyed by the child identity each subscriber assigned to this node.
#[derive(Debug, Default)]
pub struct Uplinks {
    links: HashMap<String, DeltaSender>,
}

impl Uplinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or replaces) the link for a subscriber. One live link per
    /// child identity.
    pub fn open(&mut self, child_id: String, link: DeltaSender) {
        self.links.insert(child_id, link);
    }

    /// Sends a delta to every subscriber, dropping links whose receiver has
    /// gone away.
    pub fn broadcast(&mut self, kind: DeltaKind) {
        self.links.retain(|child_id, link| {
            link.send(ChildDelta {
                child_id: child_id.clone(),
                kind: kind.clone(),
            })
            .is_ok()
        });
    }

    /// Sends a delta to one subscriber, used to replay current state when a
    /// link opens.
    pub fn send_to(&mut self, child_id: &str, kind: DeltaKind) {
        if let Some(link) = self.links.get(child_id) {
            let sent = link
                .send(ChildDelta {
                    child_id: child_id.to_string(),
                    kind,
                })
                .is_ok();
            if !sent {
                self.links.remove(child_id);
            }
        }
    }
}
