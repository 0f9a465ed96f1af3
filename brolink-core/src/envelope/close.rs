use brolink_model::{MessageKind, QualityRegime};

use super::{
    DossierContext, Envelope, RequestHeader, accountable_party, finish, gml_id,
    require_registry_id, writer::XmlWriter,
};
use crate::error::{DeliveryError, Result};

pub(super) fn build(ctx: &DossierContext, regime: QualityRegime) -> Result<Envelope> {
    let registry_id = require_registry_id(ctx)?;
    let last_date = ctx.dossier.research_last_date.ok_or_else(|| {
        DeliveryError::InvalidEnvelope(format!(
            "dossier {} has no research last date",
            ctx.dossier.id
        ))
    })?;
    let party = accountable_party(ctx)?;
    let reference = format!("GLD_Closure_{registry_id}");

    let mut w = XmlWriter::document()?;
    let header = RequestHeader {
        root: "registrationRequest",
        reference: &reference,
        accountable_party: &party,
        registry_id: Some(registry_id),
        regime,
        correction_reason: None,
    };
    header.open(&mut w)?;
    w.open(
        "GLD_Closure",
        &[("gml:id", &gml_id("closure", ctx.dossier.id.as_uuid()))],
    )?;
    w.open("researchLastDate", &[])?;
    w.leaf("brocom:date", &last_date.format("%Y-%m-%d").to_string())?;
    w.close("researchLastDate")?;
    w.close("GLD_Closure")?;
    header.close(&mut w)?;

    Ok(finish(MessageKind::Close, reference, w.finish(), Vec::new()))
}
