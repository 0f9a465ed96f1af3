use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    delivery::EnvelopeChecksum,
    error::ModelError,
    ids::{DossierId, ObservationId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObservationType {
    ReguliereMeting,
    Controlemeting,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::ReguliereMeting => "reguliereMeting",
            ObservationType::Controlemeting => "controlemeting",
        }
    }
}

/// Validation status of a whole observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationStatus {
    VolledigBeoordeeld,
    Voorlopig,
    Onbekend,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::VolledigBeoordeeld => "volledigBeoordeeld",
            ValidationStatus::Voorlopig => "voorlopig",
            ValidationStatus::Onbekend => "onbekend",
        }
    }
}

macro_rules! code_from_str {
    ($ty:ty, $vocabulary:literal, [$($variant:path),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                [$($variant),+]
                    .into_iter()
                    .find(|candidate| candidate.as_str().eq_ignore_ascii_case(trimmed))
                    .ok_or_else(|| ModelError::unknown($vocabulary, s))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

code_from_str!(
    ObservationType,
    "observation type",
    [ObservationType::ReguliereMeting, ObservationType::Controlemeting]
);
code_from_str!(
    ValidationStatus,
    "validation status",
    [
        ValidationStatus::VolledigBeoordeeld,
        ValidationStatus::Voorlopig,
        ValidationStatus::Onbekend,
    ]
);

pub(crate) use code_from_str;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationMetadata {
    pub observation_type: ObservationType,
    #[serde(default)]
    pub status: Option<ValidationStatus>,
    /// KvK number of the party responsible for the observation.
    #[serde(default)]
    pub responsible_party: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationProcess {
    pub measurement_instrument_type: String,
    #[serde(default)]
    pub air_pressure_compensation_type: Option<String>,
    pub process_reference: String,
    pub evaluation_procedure: String,
}

/// Contiguous monitoring interval `[starttime, endtime)` with homogeneous
/// metadata and process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,
    pub dossier: DossierId,
    pub starttime: DateTime<Utc>,
    #[serde(default)]
    pub endtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result_time: Option<DateTime<Utc>>,
    pub metadata: ObservationMetadata,
    pub process: ObservationProcess,
    #[serde(default)]
    pub up_to_date_in_bro: bool,
    /// Content checksum of the last version the registry accepted.
    #[serde(default)]
    pub accepted_checksum: Option<EnvelopeChecksum>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn is_closed(&self) -> bool {
        self.endtime.is_some()
    }

    pub fn is_provisional(&self) -> bool {
        self.metadata.status == Some(ValidationStatus::Voorlopig)
    }

    /// `starttime <= at` and, when closed, `at < endtime`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.starttime <= at && self.endtime.is_none_or(|end| at < end)
    }

    /// Classifies the addition the way the registry templates expect:
    /// `controlemeting` or `regulier_<status>`.
    pub fn addition_type(&self) -> String {
        match self.metadata.observation_type {
            ObservationType::Controlemeting => "controlemeting".to_string(),
            ObservationType::ReguliereMeting => format!(
                "regulier_{}",
                self.metadata
                    .status
                    .unwrap_or(ValidationStatus::Onbekend)
                    .as_str()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observation(end: Option<DateTime<Utc>>) -> Observation {
        Observation {
            id: ObservationId::new(),
            dossier: DossierId::new(),
            starttime: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            endtime: end,
            result_time: None,
            metadata: ObservationMetadata {
                observation_type: ObservationType::ReguliereMeting,
                status: Some(ValidationStatus::Voorlopig),
                responsible_party: None,
            },
            process: ObservationProcess {
                measurement_instrument_type: "druksensor".into(),
                air_pressure_compensation_type: None,
                process_reference: "NEN-EN-ISO22475v2006".into(),
                evaluation_procedure: "oordeelDeskundige".into(),
            },
            up_to_date_in_bro: false,
            accepted_checksum: None,
            accepted_at: None,
        }
    }

    #[test]
    fn interval_is_half_open() {
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let obs = observation(Some(end));
        assert!(obs.contains(obs.starttime));
        assert!(!obs.contains(end));
        assert!(obs.contains(end - chrono::Duration::seconds(1)));
    }

    #[test]
    fn open_observation_accepts_any_later_time() {
        let obs = observation(None);
        assert!(obs.contains(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()));
        assert!(!obs.is_closed());
        assert!(obs.is_provisional());
    }

    #[test]
    fn addition_type_follows_status() {
        let mut obs = observation(None);
        assert_eq!(obs.addition_type(), "regulier_voorlopig");
        obs.metadata.observation_type = ObservationType::Controlemeting;
        assert_eq!(obs.addition_type(), "controlemeting");
    }

    #[test]
    fn codes_parse_case_insensitively() {
        assert_eq!(
            "VOORLOPIG".parse::<ValidationStatus>().unwrap(),
            ValidationStatus::Voorlopig
        );
        assert!("definitief".parse::<ValidationStatus>().is_err());
    }
}
