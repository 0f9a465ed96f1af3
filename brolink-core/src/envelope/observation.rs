use brolink_model::{
    CensorReason, DeliveredObservation, EnvelopeChecksum, MeasurementTvp, MessageKind,
    ObservationType, QualityRegime, ValidationStatus,
};
use chrono::{DateTime, Duration, Utc};

use super::{
    DossierContext, Envelope, ObservationBundle, ObservationMessage, RequestHeader,
    accountable_party, checksum, finish, gml_id, require_registry_id, timestamp,
    writer::XmlWriter,
};
use crate::{
    error::{DeliveryError, Result},
    measurement::{ensure_within, format_metres},
};

const OBSERVATION_TYPE: &str = "http://www.opengis.net/def/observationType/waterml/2.0/MeasurementTimeseriesTVPObservation";
const PROCESS_TYPE: &str = "urn:bro:gld:ProcessType:algoritme";
const RESULT_DELAY_DAYS: i64 = 7;
const CORRECTION_REASON: &str = "eigenCorrectie";

pub(super) fn build(
    ctx: &DossierContext,
    regime: QualityRegime,
    observations: &[ObservationBundle],
    message: ObservationMessage,
) -> Result<Envelope> {
    let registry_id = require_registry_id(ctx)?;
    let first = observations.first().ok_or_else(|| {
        DeliveryError::InvalidEnvelope(format!(
            "dossier {} has no observations to deliver",
            ctx.dossier.id
        ))
    })?;
    let party = accountable_party(ctx)?;

    let (kind, root, label, correction_reason) = match message {
        ObservationMessage::Addition => {
            (MessageKind::Addition, "registrationRequest", "Addition", None)
        }
        ObservationMessage::Correction => (
            MessageKind::Correction,
            "correctionRequest",
            "Correction",
            Some(CORRECTION_REASON),
        ),
    };
    let reference = format!(
        "GLD_{label}_Observation_{}_{registry_id}",
        first.observation.id
    );

    let mut delivered = Vec::with_capacity(observations.len());
    let mut fragments = Vec::with_capacity(observations.len());
    for bundle in observations {
        if bundle.observation.dossier != ctx.dossier.id {
            return Err(DeliveryError::InvalidEnvelope(format!(
                "observation {} does not belong to dossier {}",
                bundle.observation.id, ctx.dossier.id
            )));
        }
        if message == ObservationMessage::Correction
            && bundle.observation.accepted_checksum.is_none()
        {
            return Err(DeliveryError::InvalidEnvelope(format!(
                "observation {} was never accepted and cannot be corrected",
                bundle.observation.id
            )));
        }
        let fragment = render_observation(bundle, regime)?;
        delivered.push(DeliveredObservation {
            id: bundle.observation.id,
            checksum: checksum(&fragment),
        });
        fragments.push(fragment);
    }

    let mut w = XmlWriter::document()?;
    let header = RequestHeader {
        root,
        reference: &reference,
        accountable_party: &party,
        registry_id: Some(registry_id),
        regime,
        correction_reason,
    };
    header.open(&mut w)?;
    w.open(
        "GLD_Addition",
        &[("gml:id", &gml_id("addition", first.observation.id.as_uuid()))],
    )?;
    for fragment in &fragments {
        w.raw(fragment);
    }
    w.close("GLD_Addition")?;
    header.close(&mut w)?;

    Ok(finish(kind, reference, w.finish(), delivered))
}

/// Content checksum of one observation: SHA-256 over its rendered element.
///
/// The element depends only on the observation, its measurements and the
/// regime, so an accepted checksum can be compared with the current one to
/// detect edits.
pub fn observation_checksum(
    bundle: &ObservationBundle,
    regime: QualityRegime,
) -> Result<EnvelopeChecksum> {
    render_observation(bundle, regime).map(|bytes| checksum(&bytes))
}

fn render_observation(bundle: &ObservationBundle, regime: QualityRegime) -> Result<Vec<u8>> {
    let observation = &bundle.observation;
    for measurement in &bundle.measurements {
        ensure_within(observation, measurement)?;
    }

    let invalid = |what: &str| {
        DeliveryError::InvalidEnvelope(format!("observation {}: {what}", observation.id))
    };

    let mut points: Vec<&MeasurementTvp> = bundle
        .measurements
        .iter()
        .filter(|m| m.is_deliverable())
        .collect();
    points.sort_by_key(|m| m.measurement_time);
    let last_point = points
        .last()
        .map(|m| m.measurement_time)
        .ok_or_else(|| invalid("no deliverable measurements"))?;

    let end = match observation.endtime {
        Some(end) => end,
        None if observation.is_provisional() => last_point,
        None => return Err(invalid("open observation must be closed or voorlopig")),
    };
    let result_time = result_time(bundle, end, last_point);

    let principal = observation
        .metadata
        .responsible_party
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| invalid("no responsible party"))?;
    let process = &observation.process;
    for (field, value) in [
        ("measurement instrument type", &process.measurement_instrument_type),
        ("process reference", &process.process_reference),
        ("evaluation procedure", &process.evaluation_procedure),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(&format!("{field} is empty")));
        }
    }

    let uuid = observation.id.as_uuid();
    let status = observation
        .metadata
        .status
        .unwrap_or(ValidationStatus::Onbekend);

    let mut w = XmlWriter::fragment();
    w.open("observation", &[])?;
    w.open("om:OM_Observation", &[("gml:id", &gml_id("obs", uuid))])?;
    w.empty("om:type", &[("xlink:href", OBSERVATION_TYPE)])?;

    w.open("om:metadata", &[])?;
    w.open("waterml:ObservationMetadata", &[])?;
    w.open("gldcommon:principalInvestigator", &[])?;
    w.leaf("gldcommon:chamberOfCommerceNumber", principal)?;
    w.close("gldcommon:principalInvestigator")?;
    w.leaf_with(
        "gldcommon:observationType",
        &[("codeSpace", "urn:bro:gld:ObservationType")],
        observation.metadata.observation_type.as_str(),
    )?;
    w.empty(
        "waterml:status",
        &[("xlink:href", &format!("urn:bro:gld:StatusCode:{}", status.as_str()))],
    )?;
    w.close("waterml:ObservationMetadata")?;
    w.close("om:metadata")?;

    w.open("om:phenomenonTime", &[])?;
    w.open("gml:TimePeriod", &[("gml:id", &gml_id("period", uuid))])?;
    w.leaf("gml:beginPosition", &timestamp(observation.starttime))?;
    w.leaf("gml:endPosition", &timestamp(end))?;
    w.close("gml:TimePeriod")?;
    w.close("om:phenomenonTime")?;

    w.open("om:resultTime", &[])?;
    w.open("gml:TimeInstant", &[("gml:id", &gml_id("result", uuid))])?;
    w.leaf("gml:timePosition", &timestamp(result_time))?;
    w.close("gml:TimeInstant")?;
    w.close("om:resultTime")?;

    w.open("om:procedure", &[])?;
    w.open("waterml:ObservationProcess", &[("gml:id", &gml_id("process", uuid))])?;
    w.empty("waterml:processType", &[("xlink:href", PROCESS_TYPE)])?;
    w.leaf_with(
        "gldcommon:processReference",
        &[("codeSpace", "urn:bro:gld:ProcessReference")],
        &process.process_reference,
    )?;
    w.leaf_with(
        "gldcommon:measurementInstrumentType",
        &[("codeSpace", "urn:bro:gld:MeasurementInstrumentType")],
        &process.measurement_instrument_type,
    )?;
    if let Some(compensation) = air_pressure_compensation(bundle, regime) {
        w.leaf_with(
            "gldcommon:airPressureCompensationType",
            &[("codeSpace", "urn:bro:gld:AirPressureCompensationType")],
            compensation,
        )?;
    }
    w.leaf_with(
        "gldcommon:evaluationProcedure",
        &[("codeSpace", "urn:bro:gld:EvaluationProcedure")],
        &process.evaluation_procedure,
    )?;
    w.close("waterml:ObservationProcess")?;
    w.close("om:procedure")?;

    w.empty("om:observedProperty", &[("xsi:nil", "true")])?;
    w.empty("om:featureOfInterest", &[("xsi:nil", "true")])?;

    w.open("om:result", &[])?;
    w.open("waterml:MeasurementTimeseries", &[("gml:id", &gml_id("series", uuid))])?;
    for point in points {
        write_point(&mut w, point)?;
    }
    w.close("waterml:MeasurementTimeseries")?;
    w.close("om:result")?;

    w.close("om:OM_Observation")?;
    w.close("observation")?;
    Ok(w.finish())
}

fn result_time(
    bundle: &ObservationBundle,
    end: DateTime<Utc>,
    last_point: DateTime<Utc>,
) -> DateTime<Utc> {
    let observation = &bundle.observation;
    if let Some(explicit) = observation.result_time {
        return explicit;
    }
    if observation.metadata.observation_type == ObservationType::Controlemeting
        || observation.is_provisional()
    {
        return last_point;
    }
    end.checked_add_signed(Duration::days(RESULT_DELAY_DAYS))
        .unwrap_or(end)
}

fn air_pressure_compensation(bundle: &ObservationBundle, regime: QualityRegime) -> Option<&str> {
    let value = bundle
        .observation
        .process
        .air_pressure_compensation_type
        .as_deref()
        .filter(|v| !v.trim().is_empty());
    match regime {
        QualityRegime::Imbro => value.filter(|v| !v.eq_ignore_ascii_case("onbekend")),
        QualityRegime::ImbroA => Some(value.unwrap_or("onbekend")),
    }
}

fn write_point(w: &mut XmlWriter, point: &MeasurementTvp) -> Result<()> {
    let value = point.calculated_value.filter(|v| v.is_finite());
    let censor = match (value, point.metadata.censor_reason) {
        (None, reason) => Some(reason.unwrap_or(CensorReason::Onbekend)),
        (Some(_), reason) => reason,
    };

    w.open("waterml:point", &[])?;
    w.open("waterml:MeasurementTVP", &[])?;
    w.leaf("waterml:time", &timestamp(point.measurement_time))?;
    match value {
        Some(v) => w.leaf_with("waterml:value", &[("uom", "m")], &format_metres(v))?,
        None => w.empty("waterml:value", &[("xsi:nil", "true")])?,
    }
    w.open("waterml:metadata", &[])?;
    w.open("waterml:TVPMeasurementMetadata", &[])?;
    w.open("waterml:qualifier", &[])?;
    w.open("swe:Category", &[("definition", "StatusQualityControl")])?;
    w.empty("swe:codeSpace", &[("xlink:href", "urn:bro:gld:StatusQualityControl")])?;
    w.leaf("swe:value", point.metadata.status_quality_control.as_str())?;
    w.close("swe:Category")?;
    w.close("waterml:qualifier")?;
    if let Some(reason) = censor {
        w.empty(
            "waterml:censoredReason",
            &[(
                "xlink:href",
                &format!("urn:bro:gld:CensorReason:{}", reason.as_str()),
            )],
        )?;
    }
    if let Some(limit) = point.metadata.censoring_limit.filter(|v| v.is_finite()) {
        w.open("waterml:qualifier", &[])?;
        w.open("swe:Quantity", &[("definition", "CensoringLimitValue")])?;
        w.empty("swe:uom", &[("code", "m")])?;
        w.leaf("swe:value", &format_metres(limit))?;
        w.close("swe:Quantity")?;
        w.close("waterml:qualifier")?;
    }
    w.close("waterml:TVPMeasurementMetadata")?;
    w.close("waterml:metadata")?;
    w.close("waterml:MeasurementTVP")?;
    w.close("waterml:point")
}
