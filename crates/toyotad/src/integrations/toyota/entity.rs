use toyota_api::VehicleFeature;
use toyota_api::VehicleInfo;

/// Entitlements an entity needs from its vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requires {
    pub subscription: bool,
    pub electric: bool,
}

impl Requires {
    pub const NOTHING: Requires = Requires {
        subscription: false,
        electric: false,
    };
    pub const SUBSCRIPTION: Requires = Requires {
        subscription: true,
        electric: false,
    };
    pub const ELECTRIC: Requires = Requires {
        subscription: true,
        electric: true,
    };

    pub fn met_by(&self, info: &VehicleInfo) -> bool {
        (!self.subscription || info.subscribed) && (!self.electric || info.electric)
    }
}

/// `<platform>.toyota_<vin>_<feature>[_<suffix>]`
pub fn entity_id(platform: &str, vin: &str, feature: VehicleFeature, suffix: Option<&str>) -> String {
    let mut id = format!("{}.toyota_{}_{}", platform, vin.to_lowercase(), feature);
    if let Some(suffix) = suffix {
        id.push('_');
        id.push_str(suffix);
    }
    id
}

/// "<entity name> <device name>", or just the entity name while the vehicle
/// is missing.
pub fn entity_name(name: &str, info: Option<&VehicleInfo>) -> String {
    match info {
        Some(info) => format!("{} {}", name, info.display_name()),
        None => name.to_string(),
    }
}
