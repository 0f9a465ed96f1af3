//! GMW construction document for a well.
//!
//! Unlike the GLD messages this one is not part of the delivery journal;
//! operators render it on demand and hand it to the registry themselves.

use brolink_model::{EnvelopeChecksum, QualityRegime, Tube, Well};
use chrono::{DateTime, Utc};

use super::{NS_BROCOM, NS_GML, NS_GMWCOMMON, NS_ISGMW, checksum, gml_id, writer::XmlWriter};
use crate::{
    error::{DeliveryError, Result},
    measurement::format_metres,
    validation::validate_well,
};

const RD_NEW: &str = "urn:ogc:def:crs:EPSG::28992";

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructionDocument {
    pub request_reference: String,
    pub bytes: Vec<u8>,
    pub checksum: EnvelopeChecksum,
}

/// Renders the construction document with each tube's state as valid at `at`.
pub fn build_construction(
    well: &Well,
    regime: QualityRegime,
    at: DateTime<Utc>,
) -> Result<ConstructionDocument> {
    let report = validate_well(well, regime, at);
    if !report.is_complete() {
        return Err(DeliveryError::InvalidEnvelope(format!(
            "well {} is not BRO-complete: {}",
            well.internal_id,
            report.to_string().trim_end()
        )));
    }
    // The predicate guarantees presence; these only guard the types.
    let missing = |field: &str| {
        DeliveryError::InvalidEnvelope(format!("well {}: {field} missing", well.internal_id))
    };
    let party = well
        .delivery_accountable_party
        .as_deref()
        .ok_or_else(|| missing("delivery accountable party"))?;
    let coordinates = well.coordinates.ok_or_else(|| missing("coordinates"))?;
    let offset = well.well_offset.ok_or_else(|| missing("well offset"))?;

    let reference = format!("GMW_Construction_{}", well.internal_id);
    let mut tubes: Vec<&Tube> = well.tubes.iter().collect();
    tubes.sort_by_key(|t| t.tube_number);

    let mut w = XmlWriter::document()?;
    w.open(
        "registrationRequest",
        &[
            ("xmlns", NS_ISGMW),
            ("xmlns:brocom", NS_BROCOM),
            ("xmlns:gmwcommon", NS_GMWCOMMON),
            ("xmlns:gml", NS_GML),
        ],
    )?;
    w.leaf("brocom:requestReference", &reference)?;
    w.leaf("brocom:deliveryAccountableParty", party)?;
    w.leaf("brocom:qualityRegime", regime.as_str())?;
    w.open("sourceDocument", &[])?;
    w.open("GMW_Construction", &[("gml:id", &gml_id("gmw", well.id.as_uuid()))])?;

    w.leaf("objectIdAccountableParty", &well.internal_id)?;
    coded(&mut w, "deliveryContext", "DeliveryContext", &well.delivery_context)?;
    coded(
        &mut w,
        "constructionStandard",
        "ConstructionStandard",
        &well.construction_standard,
    )?;
    coded(&mut w, "initialFunction", "InitialFunction", &well.initial_function)?;
    w.leaf("numberOfMonitoringTubes", &tubes.len().to_string())?;

    w.open("deliveredLocation", &[])?;
    w.open(
        "gmwcommon:location",
        &[("gml:id", "_location"), ("srsName", RD_NEW)],
    )?;
    w.leaf(
        "gml:pos",
        &format!("{:.3} {:.3}", coordinates.x, coordinates.y),
    )?;
    w.close("gmwcommon:location")?;
    coded(
        &mut w,
        "gmwcommon:horizontalPositioningMethod",
        "HorizontalPositioningMethod",
        &well.horizontal_positioning_method,
    )?;
    w.close("deliveredLocation")?;

    w.open("deliveredVerticalPosition", &[])?;
    coded(
        &mut w,
        "gmwcommon:localVerticalReferencePoint",
        "LocalVerticalReferencePoint",
        &well.local_vertical_reference_point,
    )?;
    w.leaf_with("gmwcommon:offset", &[("uom", "m")], &format_metres(offset))?;
    coded(
        &mut w,
        "gmwcommon:verticalDatum",
        "VerticalDatum",
        &well.vertical_datum,
    )?;
    w.close("deliveredVerticalPosition")?;

    w.open("wellConstructionDate", &[])?;
    match well.construction_date {
        Some(date) => w.leaf("brocom:date", &date.format("%Y-%m-%d").to_string())?,
        None => w.leaf("brocom:voidReason", "onbekend")?,
    }
    w.close("wellConstructionDate")?;

    for tube in tubes {
        write_tube(&mut w, tube, at)?;
    }

    w.close("GMW_Construction")?;
    w.close("sourceDocument")?;
    w.close("registrationRequest")?;

    let bytes = w.finish();
    Ok(ConstructionDocument {
        request_reference: reference,
        checksum: checksum(&bytes),
        bytes,
    })
}

fn coded(w: &mut XmlWriter, name: &str, list: &str, value: &Option<String>) -> Result<()> {
    match value {
        Some(v) => w.leaf_with(name, &[("codeSpace", &format!("urn:bro:gmw:{list}"))], v),
        None => Ok(()),
    }
}

fn write_tube(w: &mut XmlWriter, tube: &Tube, at: DateTime<Utc>) -> Result<()> {
    let latest = tube.latest_state(at);
    w.open("monitoringTube", &[])?;
    w.leaf("tubeNumber", &tube.tube_number.to_string())?;
    coded(w, "tubeType", "TubeType", &tube.tube_type)?;
    coded(
        w,
        "tubeStatus",
        "TubeStatus",
        &latest.and_then(|s| s.tube_status.clone()),
    )?;
    if let Some(top) = latest.and_then(|s| s.tube_top_position) {
        w.leaf_with("tubeTopPosition", &[("uom", "m")], &format_metres(top))?;
    }
    if let Some(length) = tube.screen_length {
        w.open("screen", &[])?;
        w.leaf_with("screenLength", &[("uom", "m")], &format_metres(length))?;
        w.close("screen")?;
    }
    w.close("monitoringTube")
}
