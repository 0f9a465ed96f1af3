use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::ModelError,
    ids::{DossierId, RegistryId, TubeRef},
    well::Well,
};

/// Governance level under which data is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityRegime {
    #[serde(rename = "IMBRO")]
    Imbro,
    #[serde(rename = "IMBRO/A")]
    ImbroA,
}

impl QualityRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityRegime::Imbro => "IMBRO",
            QualityRegime::ImbroA => "IMBRO/A",
        }
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, QualityRegime::Imbro)
    }
}

impl fmt::Display for QualityRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityRegime {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IMBRO" => Ok(QualityRegime::Imbro),
            "IMBRO/A" | "IMBRO_A" => Ok(QualityRegime::ImbroA),
            _ => Err(ModelError::unknown("quality regime", s)),
        }
    }
}

/// Groundwater level dossier: the reporting unit for one tube over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dossier {
    pub id: DossierId,
    pub tube: TubeRef,
    /// `GLD…` identifier, set once the start registration is accepted.
    #[serde(default)]
    pub registry_id: Option<RegistryId>,
    #[serde(default)]
    pub quality_regime: Option<QualityRegime>,
    #[serde(default)]
    pub delivery_accountable_party: Option<String>,
    #[serde(default)]
    pub research_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub research_last_date: Option<NaiveDate>,
}

impl Dossier {
    /// The dossier's own regime wins; the well's is used only when the
    /// dossier carries none, then the configured default.
    pub fn effective_regime(
        &self,
        well: &Well,
        default: QualityRegime,
    ) -> QualityRegime {
        self.quality_regime
            .or(well.quality_regime)
            .unwrap_or(default)
    }

    pub fn accountable_party<'a>(&'a self, well: &'a Well) -> Option<&'a str> {
        self.delivery_accountable_party
            .as_deref()
            .or(well.delivery_accountable_party.as_deref())
    }
}
