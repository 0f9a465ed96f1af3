use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Token plus the KvK number it delivers on behalf of.
///
/// The token is wiped on drop and never printed through `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct RegistryCredentials {
    #[zeroize(skip)]
    pub company_number: String,
    token: String,
}

impl RegistryCredentials {
    pub fn new(company_number: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            company_number: company_number.into(),
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("company_number", &self.company_number)
            .field("token", &"<redacted>")
            .finish()
    }
}
