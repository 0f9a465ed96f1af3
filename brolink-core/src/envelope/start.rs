use brolink_model::{MessageKind, QualityRegime, RegistryId};

use super::{
    DossierContext, Envelope, RequestHeader, accountable_party, finish, gml_id,
    writer::XmlWriter,
};
use crate::error::{DeliveryError, Result};

pub(super) fn build(ctx: &DossierContext, regime: QualityRegime) -> Result<Envelope> {
    let dossier = &ctx.dossier;
    if let Some(existing) = &dossier.registry_id {
        return Err(DeliveryError::InvalidEnvelope(format!(
            "dossier {} is already registered as {existing}",
            dossier.id
        )));
    }
    let well_id = ctx.well.registry_id.as_ref().ok_or_else(|| {
        DeliveryError::InvalidEnvelope(format!(
            "well {} has no registry id",
            ctx.well.internal_id
        ))
    })?;
    let tube_number = dossier.tube.tube_number;
    if ctx.well.tube(tube_number).is_none() {
        return Err(DeliveryError::InvalidEnvelope(format!(
            "well {} has no tube {tube_number}",
            ctx.well.internal_id
        )));
    }
    let party = accountable_party(ctx)?;
    let reference = format!("GLD_StartRegistration_{well_id}_tube_{tube_number}");

    let mut w = XmlWriter::document()?;
    let header = RequestHeader {
        root: "registrationRequest",
        reference: &reference,
        accountable_party: &party,
        registry_id: None,
        regime,
        correction_reason: None,
    };
    header.open(&mut w)?;

    w.open(
        "GLD_StartRegistration",
        &[("gml:id", &gml_id("gld", dossier.id.as_uuid()))],
    )?;
    w.leaf(
        "objectIdAccountableParty",
        &format!("{}{tube_number}", ctx.well.internal_id),
    )?;

    for (index, net_id) in member_nets(ctx).into_iter().enumerate() {
        w.open("groundwaterMonitoringNet", &[])?;
        w.open(
            "gldcommon:GroundwaterMonitoringNet",
            &[("gml:id", &format!("_gmn_{}", index + 1))],
        )?;
        w.leaf("gldcommon:broId", net_id.as_str())?;
        w.close("gldcommon:GroundwaterMonitoringNet")?;
        w.close("groundwaterMonitoringNet")?;
    }

    w.open("monitoringPoint", &[])?;
    w.open(
        "gldcommon:GroundwaterMonitoringTube",
        &[("gml:id", "_monitoring_point")],
    )?;
    w.leaf("gldcommon:broId", well_id.as_str())?;
    w.leaf("gldcommon:tubeNumber", &tube_number.to_string())?;
    w.close("gldcommon:GroundwaterMonitoringTube")?;
    w.close("monitoringPoint")?;

    w.close("GLD_StartRegistration")?;
    header.close(&mut w)?;

    Ok(finish(MessageKind::Start, reference, w.finish(), Vec::new()))
}

/// Registered nets in which the dossier's tube is a measuring point, sorted
/// so the envelope does not depend on repository order.
fn member_nets(ctx: &DossierContext) -> Vec<RegistryId> {
    let tube = ctx.dossier.tube;
    let mut ids: Vec<RegistryId> = ctx
        .nets
        .iter()
        .filter(|net| match ctx.dossier.research_start_date {
            Some(date) => net.contains_tube_on(tube, date),
            None => net.measuring_points.iter().any(|p| p.tube == tube),
        })
        .filter_map(|net| net.registry_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}
