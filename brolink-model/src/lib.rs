//! Core data model definitions shared across brolink crates.
//!
//! Entities reference each other by identifier only ([`TubeRef`],
//! [`DossierId`], [`ObservationId`]) so the model stays independent of
//! whichever persistence layer hosts it.
#![allow(missing_docs)]

pub use ::chrono;

pub mod credentials;
pub mod delivery;
pub mod dossier;
pub mod error;
pub mod ids;
pub mod measurement;
pub mod net;
pub mod observation;
pub mod organisation;
pub mod well;

// Intentionally curated re-exports for downstream consumers.
pub use credentials::RegistryCredentials;
pub use delivery::{
    DeliveredObservation, DeliveryLog, DeliveryPhase, EnvelopeChecksum,
    MessageKind, RemoteStatus,
};
pub use dossier::{Dossier, QualityRegime};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{
    DeliveryLogId, DossierId, NetId, ObservationId, OrganisationId,
    RegistryId, TubeRef, WellId,
};
pub use measurement::{
    CensorReason, FieldUnit, MeasurementPointMetadata, MeasurementTvp,
    StatusQualityControl,
};
pub use net::{MeasuringPoint, MonitoringNet};
pub use observation::{
    Observation, ObservationMetadata, ObservationProcess, ObservationType,
    ValidationStatus,
};
pub use organisation::Organisation;
pub use well::{Coordinates, Tube, TubeState, Well};
