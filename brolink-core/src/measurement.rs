//! Normalisation of raw field values to metres relative to NAP.

use brolink_model::{FieldUnit, MeasurementTvp, Observation, Tube};

use crate::error::{DeliveryError, Result};

/// Computes the calculated value for a single field value.
///
/// `NaN` and missing field values yield `None`; they are delivered as
/// censored points, never as zero. Units relative to the tube top need the
/// tube-top position valid at the measurement time.
pub fn calculated_value(
    field_value: Option<f64>,
    unit: FieldUnit,
    tube_top_position: Option<f64>,
) -> Result<Option<f64>> {
    let Some(value) = field_value.filter(|v| v.is_finite()) else {
        return Ok(None);
    };

    let metres = scale_to_metres(value, unit);
    if !unit.is_relative_to_tube_top() {
        return Ok(Some(metres));
    }

    let tube_top = tube_top_position.ok_or_else(|| {
        DeliveryError::Consistency(format!(
            "unit '{}' needs a tube-top position at the measurement time",
            unit.as_str()
        ))
    })?;
    Ok(Some(round_to_millimetre(tube_top - metres)))
}

fn scale_to_metres(value: f64, unit: FieldUnit) -> f64 {
    // Divide rather than multiply so cm/mm stay exact at 3 decimals.
    match unit {
        FieldUnit::M | FieldUnit::MBelowTubeTop => value,
        FieldUnit::Cm | FieldUnit::CmBelowTubeTop => value / 100.0,
        FieldUnit::Mm | FieldUnit::MmBelowTubeTop => value / 1_000.0,
    }
}

/// Rounds half away from zero at three decimals.
pub fn round_to_millimetre(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}

/// Renders a value with exactly three decimals, normalising `-0.000`.
pub fn format_metres(value: f64) -> String {
    let rounded = round_to_millimetre(value);
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{rounded:.3}")
}

/// Interval check shared by ingest and the envelope builder.
pub fn ensure_within(observation: &Observation, measurement: &MeasurementTvp) -> Result<()> {
    if observation.contains(measurement.measurement_time) {
        return Ok(());
    }
    Err(DeliveryError::InvalidInterval(format!(
        "measurement at {} lies outside observation {} [{}, {})",
        measurement.measurement_time.to_rfc3339(),
        observation.id,
        observation.starttime.to_rfc3339(),
        observation
            .endtime
            .map(|end| end.to_rfc3339())
            .unwrap_or_else(|| "open".to_string()),
    )))
}

/// Recomputes calculated values against the tube's current state history.
/// Returns how many measurements changed.
pub fn recompute_calculated_values(
    measurements: &mut [MeasurementTvp],
    tube: &Tube,
) -> Result<usize> {
    let mut changed = 0;
    for measurement in measurements.iter_mut() {
        let tube_top = tube.tube_top_at(measurement.measurement_time);
        let value = calculated_value(
            measurement.field_value,
            measurement.field_value_unit,
            tube_top,
        )?;
        if value != measurement.calculated_value {
            measurement.calculated_value = value;
            changed += 1;
        }
    }
    Ok(changed)
}
