use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    dossier::QualityRegime,
    ids::{NetId, RegistryId, TubeRef},
};

/// Named set of measuring points (groundwater monitoring net).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringNet {
    pub id: NetId,
    pub name: String,
    #[serde(default)]
    pub registry_id: Option<RegistryId>,
    #[serde(default)]
    pub quality_regime: Option<QualityRegime>,
    #[serde(default)]
    pub delivery_context: Option<String>,
    #[serde(default)]
    pub monitoring_purpose: Option<String>,
    #[serde(default)]
    pub groundwater_aspect: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub measuring_points: Vec<MeasuringPoint>,
}

/// A tube's membership in a net, bounded by dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasuringPoint {
    pub code: String,
    pub tube: TubeRef,
    pub added_to_gmn_date: NaiveDate,
    #[serde(default)]
    pub removed_date: Option<NaiveDate>,
}

impl MeasuringPoint {
    /// Membership is `[added_to_gmn_date, removed_date)`.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.added_to_gmn_date <= date
            && self.removed_date.is_none_or(|removed| date < removed)
    }
}

impl MonitoringNet {
    pub fn contains_tube_on(&self, tube: TubeRef, date: NaiveDate) -> bool {
        self.measuring_points
            .iter()
            .any(|point| point.tube == tube && point.is_active_on(date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WellId;

    #[test]
    fn measuring_point_membership_is_half_open() {
        let tube = TubeRef::new(WellId::new(), 1);
        let point = MeasuringPoint {
            code: "MP1".into(),
            tube,
            added_to_gmn_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            removed_date: NaiveDate::from_ymd_opt(2022, 1, 1),
        };
        assert!(!point.is_active_on(NaiveDate::from_ymd_opt(2019, 12, 31).unwrap()));
        assert!(point.is_active_on(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()));
        assert!(!point.is_active_on(NaiveDate::from_ymd_opt(2022, 1, 1).unwrap()));
    }
}
