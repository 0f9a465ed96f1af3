//! BRO-complete predicate for wells.
//!
//! A well may only be referenced by a start registration once its
//! construction fields are present and carry values from the registry's
//! code lists. IMBRO is stricter than IMBRO/A: `onbekend` and the
//! archive-only values are not accepted.

use std::{collections::HashSet, fmt};

use brolink_model::{QualityRegime, Well};
use chrono::{DateTime, Utc};

const DELIVERY_CONTEXT: &[&str] = &[
    "GBM",
    "KRW",
    "monitoringBijDrinkwaterwinning",
    "NBW",
    "NR",
    "OGW",
    "OW",
    "publiekeTaak",
    "WW",
    "archiefoverdracht",
];

const CONSTRUCTION_STANDARD: &[&str] = &[
    "BWsb",
    "geen",
    "IBR",
    "NEN5104",
    "NEN5744",
    "NEN5766",
    "RWSgwmon",
    "SIKB2001v6.0",
    "STOWAgwst",
    "VKB2001",
    "onbekend",
];

const INITIAL_FUNCTION: &[&str] = &[
    "brandput",
    "kwaliteit",
    "kwaliteitStand",
    "onttrekking",
    "stand",
    "onbekend",
];

const HORIZONTAL_POSITIONING_METHOD: &[&str] = &[
    "DGPS50tot200cm",
    "GPS200tot1000cm",
    "RTKGPS0tot2cm",
    "RTKGPS2tot5cm",
    "RTKGPS5tot10cm",
    "RTKGPS10tot50cm",
    "tachymetrie0tot10cm",
    "tachymetrie10tot50cm",
    "GBKNOnbekend",
    "GPSOnbekend",
    "kaartOnbekend",
    "onbekend",
];

const NAP_ONLY: &[&str] = &["NAP"];

/// Values only valid under IMBRO/A.
const IMBRO_A_ONLY: &[&str] = &["onbekend", "archiefoverdracht"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Missing(&'static str),
    InvalidValue {
        field: &'static str,
        value: String,
    },
    DuplicateTube(u16),
}

/// Outcome of validating one well against one regime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellReport {
    pub regime: QualityRegime,
    pub findings: Vec<Finding>,
}

impl WellReport {
    pub fn is_complete(&self) -> bool {
        self.findings.is_empty()
    }
}

impl fmt::Display for WellReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.findings.is_empty() {
            return write!(f, "well is complete for {}", self.regime);
        }
        for finding in &self.findings {
            match finding {
                Finding::Missing(field) => {
                    writeln!(f, "{field} must be filled in for {}", self.regime)?
                }
                Finding::InvalidValue { field, value } => writeln!(
                    f,
                    "{field} has value '{value}' which is not allowed under {}",
                    self.regime
                )?,
                Finding::DuplicateTube(number) => {
                    writeln!(f, "tube number {number} occurs more than once")?
                }
            }
        }
        Ok(())
    }
}

/// Checks `well` against `regime`, reading tube states as valid at `at`.
pub fn validate_well(well: &Well, regime: QualityRegime, at: DateTime<Utc>) -> WellReport {
    let mut findings = Vec::new();
    let allowed = |list: &'static [&'static str], value: &str| {
        list.contains(&value) && !(regime.is_strict() && IMBRO_A_ONLY.contains(&value))
    };

    let mut coded = |field: &'static str, value: &Option<String>, list: &'static [&'static str]| {
        match value.as_deref() {
            None => findings.push(Finding::Missing(field)),
            Some(v) if !allowed(list, v) => findings.push(Finding::InvalidValue {
                field,
                value: v.to_string(),
            }),
            Some(_) => {}
        }
    };

    coded("delivery_context", &well.delivery_context, DELIVERY_CONTEXT);
    coded(
        "construction_standard",
        &well.construction_standard,
        CONSTRUCTION_STANDARD,
    );
    coded("initial_function", &well.initial_function, INITIAL_FUNCTION);
    coded(
        "horizontal_positioning_method",
        &well.horizontal_positioning_method,
        HORIZONTAL_POSITIONING_METHOD,
    );
    coded(
        "local_vertical_reference_point",
        &well.local_vertical_reference_point,
        NAP_ONLY,
    );
    coded("vertical_datum", &well.vertical_datum, NAP_ONLY);

    if well.delivery_accountable_party.is_none() {
        findings.push(Finding::Missing("delivery_accountable_party"));
    }
    if well.delivery_responsible_party.is_none() {
        findings.push(Finding::Missing("delivery_responsible_party"));
    }
    if well.coordinates.is_none() {
        findings.push(Finding::Missing("coordinates"));
    }
    if well.well_offset.is_none() {
        findings.push(Finding::Missing("well_offset"));
    }

    if well.tubes.is_empty() {
        findings.push(Finding::Missing("tubes"));
    }
    let mut seen = HashSet::new();
    for tube in &well.tubes {
        let duplicate = Finding::DuplicateTube(tube.tube_number);
        if !seen.insert(tube.tube_number) && !findings.contains(&duplicate) {
            findings.push(duplicate);
        }
    }
    if well.tubes.iter().any(|tube| tube.tube_top_at(at).is_none()) {
        findings.push(Finding::Missing("tube_top_position"));
    }

    WellReport { regime, findings }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use brolink_model::{Coordinates, Tube, TubeState, WellId};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    pub(crate) fn complete_well() -> Well {
        Well {
            id: WellId::new(),
            internal_id: "GMW000001".into(),
            registry_id: None,
            quality_regime: Some(QualityRegime::Imbro),
            delivery_accountable_party: Some("12345678".into()),
            delivery_responsible_party: Some("12345678".into()),
            delivery_context: Some("publiekeTaak".into()),
            construction_standard: Some("NEN5766".into()),
            initial_function: Some("stand".into()),
            coordinates: Some(Coordinates { x: 155_000.0, y: 463_000.0 }),
            horizontal_positioning_method: Some("RTKGPS0tot2cm".into()),
            local_vertical_reference_point: Some("NAP".into()),
            well_offset: Some(0.0),
            vertical_datum: Some("NAP".into()),
            construction_date: None,
            tubes: vec![Tube {
                tube_number: 1,
                tube_type: Some("standaardbuis".into()),
                screen_length: Some(1.0),
                deliver_gld_to_bro: true,
                states: vec![TubeState {
                    date_from: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                    tube_top_position: Some(1.5),
                    tube_status: Some("gebruiksklaar".into()),
                }],
            }],
        }
    }

    #[test]
    fn complete_well_passes_both_regimes() {
        let well = complete_well();
        assert!(validate_well(&well, QualityRegime::Imbro, now()).is_complete());
        assert!(validate_well(&well, QualityRegime::ImbroA, now()).is_complete());
    }

    #[test]
    fn missing_fields_are_reported() {
        let mut well = complete_well();
        well.coordinates = None;
        well.delivery_context = None;
        let report = validate_well(&well, QualityRegime::ImbroA, now());
        assert!(!report.is_complete());
        assert!(report.findings.contains(&Finding::Missing("coordinates")));
        assert!(report.to_string().contains("delivery_context must be filled in"));
    }

    #[test]
    fn onbekend_is_only_allowed_under_imbro_a() {
        let mut well = complete_well();
        well.initial_function = Some("onbekend".into());
        assert!(!validate_well(&well, QualityRegime::Imbro, now()).is_complete());
        assert!(validate_well(&well, QualityRegime::ImbroA, now()).is_complete());
    }

    #[test]
    fn tubes_need_a_tube_top() {
        let mut well = complete_well();
        well.tubes[0].states.clear();
        let report = validate_well(&well, QualityRegime::Imbro, now());
        assert_eq!(report.findings, vec![Finding::Missing("tube_top_position")]);
    }

    #[test]
    fn duplicate_tube_numbers_are_reported_once() {
        let mut well = complete_well();
        let copy = well.tubes[0].clone();
        well.tubes.push(copy.clone());
        well.tubes.push(copy);
        let report = validate_well(&well, QualityRegime::Imbro, now());
        assert_eq!(report.findings, vec![Finding::DuplicateTube(1)]);
        assert!(report.to_string().contains("tube number 1 occurs more than once"));
    }

    #[test]
    fn future_tube_state_does_not_decide_completeness() {
        let mut well = complete_well();
        well.tubes[0].states.push(TubeState {
            date_from: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            tube_top_position: None,
            tube_status: None,
        });
        assert!(validate_well(&well, QualityRegime::Imbro, now()).is_complete());

        well.tubes[0].states.remove(0);
        let report = validate_well(&well, QualityRegime::Imbro, now());
        assert_eq!(report.findings, vec![Finding::Missing("tube_top_position")]);
    }
}
