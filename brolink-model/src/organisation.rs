use serde::{Deserialize, Serialize};

use crate::{credentials::RegistryCredentials, ids::OrganisationId};

/// Delivering party, identified towards the registry by its KvK number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organisation {
    pub id: OrganisationId,
    pub company_number: String,
    pub name: String,
    #[serde(default)]
    pub credentials: Option<RegistryCredentials>,
}
