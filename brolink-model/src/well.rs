use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    dossier::QualityRegime,
    ids::{RegistryId, TubeRef, WellId},
};

/// RD (EPSG:28992) coordinates of a well head.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// Groundwater monitoring well with its construction fields.
///
/// Identity is `(id, internal_id, registry_id?)`. The construction fields
/// are optional because wells are frequently imported half-filled; the
/// BRO-complete predicate decides whether they are good enough to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Well {
    pub id: WellId,
    /// Internal code of the accountable party (NITG code or similar).
    pub internal_id: String,
    #[serde(default)]
    pub registry_id: Option<RegistryId>,
    #[serde(default)]
    pub quality_regime: Option<QualityRegime>,
    /// KvK number of the delivery accountable party.
    #[serde(default)]
    pub delivery_accountable_party: Option<String>,
    #[serde(default)]
    pub delivery_responsible_party: Option<String>,
    #[serde(default)]
    pub delivery_context: Option<String>,
    #[serde(default)]
    pub construction_standard: Option<String>,
    #[serde(default)]
    pub initial_function: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub horizontal_positioning_method: Option<String>,
    #[serde(default)]
    pub local_vertical_reference_point: Option<String>,
    #[serde(default)]
    pub well_offset: Option<f64>,
    #[serde(default)]
    pub vertical_datum: Option<String>,
    #[serde(default)]
    pub construction_date: Option<NaiveDate>,
    #[serde(default)]
    pub tubes: Vec<Tube>,
}

impl Well {
    pub fn tube(&self, tube_number: u16) -> Option<&Tube> {
        self.tubes.iter().find(|t| t.tube_number == tube_number)
    }

    pub fn tube_mut(&mut self, tube_number: u16) -> Option<&mut Tube> {
        self.tubes.iter_mut().find(|t| t.tube_number == tube_number)
    }

    pub fn tube_ref(&self, tube_number: u16) -> TubeRef {
        TubeRef::new(self.id, tube_number)
    }
}

/// Filter tube of a well. Tube numbers are unique within a well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tube {
    pub tube_number: u16,
    #[serde(default)]
    pub tube_type: Option<String>,
    #[serde(default)]
    pub screen_length: Option<f64>,
    /// Versioned dynamic states keyed by `date_from`.
    #[serde(default)]
    pub states: Vec<TubeState>,
    /// Operator switch; dossiers on a tube with this off are never selected.
    #[serde(default = "default_true")]
    pub deliver_gld_to_bro: bool,
}

fn default_true() -> bool {
    true
}

/// One dated revision of a tube's dynamic properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TubeState {
    pub date_from: DateTime<Utc>,
    /// Tube top in metres relative to NAP.
    #[serde(default)]
    pub tube_top_position: Option<f64>,
    #[serde(default)]
    pub tube_status: Option<String>,
}

impl Tube {
    /// The state with the greatest `date_from <= at`.
    pub fn latest_state(&self, at: DateTime<Utc>) -> Option<&TubeState> {
        self.states
            .iter()
            .filter(|state| state.date_from <= at)
            .max_by_key(|state| state.date_from)
    }

    pub fn tube_top_at(&self, at: DateTime<Utc>) -> Option<f64> {
        self.latest_state(at).and_then(|s| s.tube_top_position)
    }

    /// Inserts a new state, replacing one with the same `date_from`.
    pub fn push_state(&mut self, state: TubeState) {
        self.states.retain(|s| s.date_from != state.date_from);
        self.states.push(state);
        self.states.sort_by_key(|s| s.date_from);
    }
}
