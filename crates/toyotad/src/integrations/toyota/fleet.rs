use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use toyota_api::FeatureStore;
use toyota_api::Vehicle;

type VehicleMap = BTreeMap<String, Arc<Vehicle>>;

/// The account's vehicles, keyed by VIN.
///
/// Same snapshot scheme as the engine state: readers load an `Arc`, writers
/// store a new map. The coordinator replaces the whole map each cycle; a lock
/// confirmation merges fresh features into a single vehicle in between.
#[derive(Default)]
pub struct Fleet {
    vehicles: ArcSwap<VehicleMap>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, vin: &str) -> Option<Arc<Vehicle>> {
        self.vehicles.load().get(vin).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Vehicle>> {
        self.vehicles.load().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.vehicles.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn replace(&self, vehicles: Vec<Vehicle>) {
        let map: VehicleMap = vehicles
            .into_iter()
            .map(|v| (v.info.vin.clone(), Arc::new(v)))
            .collect();
        self.vehicles.store(Arc::new(map));
    }

    /// Overlay `fresh` onto one vehicle's features. Returns false if the
    /// vehicle is gone.
    pub fn merge_features(&self, vin: &str, fresh: FeatureStore) -> bool {
        let mut found = false;
        self.vehicles.rcu(|current| {
            let mut next = VehicleMap::clone(current);
            found = match next.get_mut(vin) {
                Some(vehicle) => {
                    Arc::make_mut(vehicle).features.merge(fresh.clone());
                    true
                }
                None => false,
            };
            next
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use toyota_api::FeatureValue;
    use toyota_api::VehicleFeature;
    use toyota_api::VehicleInfo;

    use super::*;

    fn vehicle(vin: &str) -> Vehicle {
        Vehicle::new(
            VehicleInfo::from_listing(&json!({"vin": vin, "generation": "21MM"})).unwrap(),
        )
    }

    #[test]
    fn test_merge_features() {
        let fleet = Fleet::new();
        fleet.replace(vec![vehicle("A1"), vehicle("B2")]);
        assert_eq!(fleet.len(), 2);

        let before = fleet.get("A1").unwrap();

        let mut fresh = FeatureStore::new();
        fresh.insert(
            VehicleFeature::Hood,
            FeatureValue::Opening { closed: true },
        );
        assert!(fleet.merge_features("A1", fresh.clone()));
        assert!(!fleet.merge_features("ZZ", fresh));

        // Earlier snapshots are untouched.
        assert!(before.features.is_empty());
        assert!(fleet.get("A1").unwrap().features.contains(VehicleFeature::Hood));
        assert!(fleet.get("B2").unwrap().features.is_empty());
    }
}
