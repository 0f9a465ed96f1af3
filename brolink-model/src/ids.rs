use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            pub fn new() -> Self {
                $name(Uuid::now_v7())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn to_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map($name).map_err(|err| {
                    ModelError::InvalidIdentifier(format!(
                        "{} '{s}': {err}",
                        stringify!($name)
                    ))
                })
            }
        }
    };
}

uuid_id!(
    /// Local identity of a groundwater monitoring well.
    WellId
);
uuid_id!(
    /// Local identity of a groundwater level dossier.
    DossierId
);
uuid_id!(
    /// Local identity of an observation inside a dossier.
    ObservationId
);
uuid_id!(
    /// Local identity of a groundwater monitoring net.
    NetId
);
uuid_id!(
    /// Local identity of an organisation (delivering party).
    OrganisationId
);
uuid_id!(
    /// Primary key of a delivery journal row.
    DeliveryLogId
);

/// Tubes are addressed by their well plus the tube number, never by object
/// graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TubeRef {
    pub well: WellId,
    pub tube_number: u16,
}

impl TubeRef {
    pub fn new(well: WellId, tube_number: u16) -> Self {
        Self { well, tube_number }
    }
}

impl fmt::Display for TubeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.well, self.tube_number)
    }
}

/// Durable identifier issued by the national registry (`GMW…`, `GLD…`,
/// `GMN…`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistryId(String);

impl RegistryId {
    /// Accepts a three letter uppercase object prefix followed by digits.
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let trimmed = raw.trim();
        let prefix = trimmed.get(..3).unwrap_or_default();
        let digits = trimmed.get(3..).unwrap_or_default();
        let prefix_ok =
            prefix.len() == 3 && prefix.chars().all(|c| c.is_ascii_uppercase());
        let digits_ok =
            !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit());
        if prefix_ok && digits_ok {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ModelError::InvalidIdentifier(format!(
                "registry id '{raw}' must look like GLD000000012345"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The object class prefix, e.g. `GLD`.
    pub fn object_class(&self) -> &str {
        &self.0[..3]
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RegistryId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RegistryId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RegistryId> for String {
    fn from(value: RegistryId) -> Self {
        value.0
    }
}
