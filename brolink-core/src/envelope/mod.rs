//! Delivery envelopes.
//!
//! Every envelope is a pure function of its inputs: no wall clock, no
//! random ids, attributes in a fixed order, measurement points sorted by
//! time with ties kept in insertion order. Building twice yields the same
//! bytes and therefore the same checksum.

mod close;
pub mod construction;
mod observation;
mod start;
mod writer;

use brolink_model::{
    DeliveredObservation, Dossier, EnvelopeChecksum, MeasurementTvp, MessageKind,
    MonitoringNet, Observation, QualityRegime, RegistryId, Well,
};
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::error::{DeliveryError, Result};

pub use observation::observation_checksum;

pub(crate) const NS_ISGLD: &str = "http://www.broservices.nl/xsd/isgld/1.0";
pub(crate) const NS_ISGMW: &str = "http://www.broservices.nl/xsd/isgmw/1.0";
pub(crate) const NS_BROCOM: &str = "http://www.broservices.nl/xsd/brocommon/3.0";
pub(crate) const NS_GLDCOMMON: &str = "http://www.broservices.nl/xsd/gldcommon/1.0";
pub(crate) const NS_GMWCOMMON: &str = "http://www.broservices.nl/xsd/gmwcommon/1.1";
pub(crate) const NS_GML: &str = "http://www.opengis.net/gml/3.2";
pub(crate) const NS_OM: &str = "http://www.opengis.net/om/2.0";
pub(crate) const NS_WATERML: &str = "http://www.opengis.net/waterml/2.0";
pub(crate) const NS_SWE: &str = "http://www.opengis.net/swe/2.0";
pub(crate) const NS_XLINK: &str = "http://www.w3.org/1999/xlink";
pub(crate) const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// An observation together with the measurements it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBundle {
    pub observation: Observation,
    pub measurements: Vec<MeasurementTvp>,
}

impl ObservationBundle {
    pub fn deliverable_count(&self) -> usize {
        self.measurements.iter().filter(|m| m.is_deliverable()).count()
    }
}

/// Everything the builder needs to know about a dossier, gathered up front
/// so building stays synchronous.
#[derive(Debug, Clone, PartialEq)]
pub struct DossierContext {
    pub dossier: Dossier,
    pub well: Well,
    pub nets: Vec<MonitoringNet>,
}

/// A rendered delivery document.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: MessageKind,
    pub request_reference: String,
    pub bytes: Vec<u8>,
    pub checksum: EnvelopeChecksum,
    /// Observations carried, with their content checksums.
    pub observations: Vec<DeliveredObservation>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeBuilder;

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Builds the envelope for `kind`, dispatching on the message kind.
    pub fn build(
        &self,
        ctx: &DossierContext,
        kind: MessageKind,
        regime: QualityRegime,
        observations: &[ObservationBundle],
    ) -> Result<Envelope> {
        let envelope = match kind {
            MessageKind::Start => start::build(ctx, regime)?,
            MessageKind::Addition => {
                observation::build(ctx, regime, observations, ObservationMessage::Addition)?
            }
            MessageKind::Correction => {
                observation::build(ctx, regime, observations, ObservationMessage::Correction)?
            }
            MessageKind::Close => close::build(ctx, regime)?,
        };
        debug_assert_eq!(envelope.kind, kind);
        Ok(envelope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ObservationMessage {
    Addition,
    Correction,
}

pub fn checksum(bytes: &[u8]) -> EnvelopeChecksum {
    let digest = Sha256::digest(bytes);
    EnvelopeChecksum(format!("{digest:x}"))
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `gml:id` values must be NCNames; a leading underscore keeps uuids valid.
pub(crate) fn gml_id(prefix: &str, id: &uuid::Uuid) -> String {
    format!("_{prefix}_{}", id.simple())
}

pub(crate) fn accountable_party(ctx: &DossierContext) -> Result<String> {
    ctx.dossier
        .accountable_party(&ctx.well)
        .map(str::to_string)
        .filter(|party| !party.trim().is_empty())
        .ok_or_else(|| {
            DeliveryError::InvalidEnvelope(format!(
                "dossier {} has no delivery accountable party",
                ctx.dossier.id
            ))
        })
}

pub(crate) fn require_registry_id(ctx: &DossierContext) -> Result<&RegistryId> {
    ctx.dossier.registry_id.as_ref().ok_or_else(|| {
        DeliveryError::InvalidEnvelope(format!(
            "dossier {} is not registered yet",
            ctx.dossier.id
        ))
    })
}

/// Request header shared by every GLD message.
pub(crate) struct RequestHeader<'a> {
    pub root: &'a str,
    pub reference: &'a str,
    pub accountable_party: &'a str,
    pub registry_id: Option<&'a RegistryId>,
    pub regime: QualityRegime,
    pub correction_reason: Option<&'a str>,
}

impl RequestHeader<'_> {
    pub(crate) fn open(&self, w: &mut writer::XmlWriter) -> Result<()> {
        w.open(
            self.root,
            &[
                ("xmlns", NS_ISGLD),
                ("xmlns:brocom", NS_BROCOM),
                ("xmlns:gldcommon", NS_GLDCOMMON),
                ("xmlns:gml", NS_GML),
                ("xmlns:om", NS_OM),
                ("xmlns:waterml", NS_WATERML),
                ("xmlns:swe", NS_SWE),
                ("xmlns:xlink", NS_XLINK),
                ("xmlns:xsi", NS_XSI),
            ],
        )?;
        w.leaf("brocom:requestReference", self.reference)?;
        w.leaf("brocom:deliveryAccountableParty", self.accountable_party)?;
        if let Some(id) = self.registry_id {
            w.leaf("brocom:broId", id.as_str())?;
        }
        w.leaf("brocom:qualityRegime", self.regime.as_str())?;
        if let Some(reason) = self.correction_reason {
            w.leaf("brocom:correctionReason", reason)?;
        }
        w.open("sourceDocument", &[])
    }

    pub(crate) fn close(&self, w: &mut writer::XmlWriter) -> Result<()> {
        w.close("sourceDocument")?;
        w.close(self.root)
    }
}

pub(crate) fn finish(
    kind: MessageKind,
    request_reference: String,
    bytes: Vec<u8>,
    observations: Vec<DeliveredObservation>,
) -> Envelope {
    let checksum = checksum(&bytes);
    Envelope {
        kind,
        request_reference,
        bytes,
        checksum,
        observations,
    }
}
