use brolink_model::{Dossier, MeasurementTvp, MonitoringNet, Observation, Organisation, Well};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Portable dump of domain data, as read by `brolinkctl import`.
///
/// Calculated values in `measurements` are ignored; the ingest path
/// recomputes them from the tube-top history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub organisations: Vec<Organisation>,
    pub wells: Vec<Well>,
    pub nets: Vec<MonitoringNet>,
    pub dossiers: Vec<Dossier>,
    pub observations: Vec<Observation>,
    pub measurements: Vec<MeasurementTvp>,
}

impl Snapshot {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_default_to_empty() {
        let snapshot = Snapshot::from_json(br#"{"wells": []}"#).unwrap();
        assert!(snapshot.dossiers.is_empty());
        assert!(snapshot.measurements.is_empty());
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        assert!(matches!(
            Snapshot::from_json(b"{"),
            Err(crate::error::DeliveryError::Serialization(_))
        ));
    }
}
