use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::ModelError, ids::ObservationId, observation::code_from_str};

/// Unit a field value was recorded in.
///
/// Units relative to the tube top (`t.o.v. bkb`) measure depth below the
/// top of the tube and are converted with the tube-top position that was
/// valid at the measurement time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldUnit {
    #[serde(rename = "m")]
    M,
    #[serde(rename = "cm")]
    Cm,
    #[serde(rename = "mm")]
    Mm,
    #[serde(rename = "m t.o.v. bkb")]
    MBelowTubeTop,
    #[serde(rename = "cm t.o.v. bkb")]
    CmBelowTubeTop,
    #[serde(rename = "mm t.o.v. bkb")]
    MmBelowTubeTop,
}

impl FieldUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldUnit::M => "m",
            FieldUnit::Cm => "cm",
            FieldUnit::Mm => "mm",
            FieldUnit::MBelowTubeTop => "m t.o.v. bkb",
            FieldUnit::CmBelowTubeTop => "cm t.o.v. bkb",
            FieldUnit::MmBelowTubeTop => "mm t.o.v. bkb",
        }
    }

    /// Multiplier that brings a value in this unit to metres.
    pub fn metre_factor(&self) -> f64 {
        match self {
            FieldUnit::M | FieldUnit::MBelowTubeTop => 1.0,
            FieldUnit::Cm | FieldUnit::CmBelowTubeTop => 0.01,
            FieldUnit::Mm | FieldUnit::MmBelowTubeTop => 0.001,
        }
    }

    pub fn is_relative_to_tube_top(&self) -> bool {
        matches!(
            self,
            FieldUnit::MBelowTubeTop
                | FieldUnit::CmBelowTubeTop
                | FieldUnit::MmBelowTubeTop
        )
    }
}

code_from_str!(
    FieldUnit,
    "field value unit",
    [
        FieldUnit::M,
        FieldUnit::Cm,
        FieldUnit::Mm,
        FieldUnit::MBelowTubeTop,
        FieldUnit::CmBelowTubeTop,
        FieldUnit::MmBelowTubeTop,
    ]
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusQualityControl {
    Afgekeurd,
    Goedgekeurd,
    NogNietBeoordeeld,
    Onbeslist,
    #[default]
    Onbekend,
}

impl StatusQualityControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusQualityControl::Afgekeurd => "afgekeurd",
            StatusQualityControl::Goedgekeurd => "goedgekeurd",
            StatusQualityControl::NogNietBeoordeeld => "nogNietBeoordeeld",
            StatusQualityControl::Onbeslist => "onbeslist",
            StatusQualityControl::Onbekend => "onbekend",
        }
    }
}

code_from_str!(
    StatusQualityControl,
    "quality control status",
    [
        StatusQualityControl::Afgekeurd,
        StatusQualityControl::Goedgekeurd,
        StatusQualityControl::NogNietBeoordeeld,
        StatusQualityControl::Onbeslist,
        StatusQualityControl::Onbekend,
    ]
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CensorReason {
    GroterDanLimietwaarde,
    KleinerDanLimietwaarde,
    Onbekend,
}

impl CensorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CensorReason::GroterDanLimietwaarde => "groterDanLimietwaarde",
            CensorReason::KleinerDanLimietwaarde => "kleinerDanLimietwaarde",
            CensorReason::Onbekend => "onbekend",
        }
    }
}

code_from_str!(
    CensorReason,
    "censor reason",
    [
        CensorReason::GroterDanLimietwaarde,
        CensorReason::KleinerDanLimietwaarde,
        CensorReason::Onbekend,
    ]
);

/// Per-point metadata (quality control and censoring).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeasurementPointMetadata {
    #[serde(default)]
    pub status_quality_control: StatusQualityControl,
    #[serde(default)]
    pub censor_reason: Option<CensorReason>,
    /// Limit value in metres when the point is censored against a limit.
    #[serde(default)]
    pub censoring_limit: Option<f64>,
}

/// Single time/value pair of an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementTvp {
    pub observation: ObservationId,
    pub measurement_time: DateTime<Utc>,
    #[serde(default)]
    pub field_value: Option<f64>,
    pub field_value_unit: FieldUnit,
    /// Field value normalised to metres relative to NAP.
    #[serde(default)]
    pub calculated_value: Option<f64>,
    #[serde(default)]
    pub metadata: MeasurementPointMetadata,
}

impl MeasurementTvp {
    /// Rejected points are kept locally but never delivered.
    pub fn is_deliverable(&self) -> bool {
        self.metadata.status_quality_control != StatusQualityControl::Afgekeurd
    }
}
