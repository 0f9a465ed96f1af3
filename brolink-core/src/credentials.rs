use std::sync::Arc;

use brolink_model::RegistryCredentials;

use crate::{
    envelope::DossierContext,
    error::{DeliveryError, Result},
    repository::DossierRepository,
};

/// Picks the credentials a dossier is delivered with.
///
/// The delivery accountable party (dossier first, then well) selects an
/// organisation; its stored credentials win over the configured default.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    repository: Arc<dyn DossierRepository>,
    default: Option<RegistryCredentials>,
}

impl CredentialResolver {
    pub fn new(
        repository: Arc<dyn DossierRepository>,
        default: Option<RegistryCredentials>,
    ) -> Self {
        Self {
            repository,
            default,
        }
    }

    pub async fn resolve(&self, ctx: &DossierContext) -> Result<RegistryCredentials> {
        let party = ctx.dossier.accountable_party(&ctx.well);
        if let Some(party) = party {
            let organisation = self.repository.get_organisation_by_company(party).await?;
            if let Some(credentials) = organisation.and_then(|o| o.credentials.clone()) {
                return Ok(credentials);
            }
        }

        self.default.clone().ok_or_else(|| {
            DeliveryError::Configuration(format!(
                "no registry credentials for accountable party {} and no default configured",
                party.unwrap_or("<none>")
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{envelope::fixtures::context, repository::MemoryRepository};
    use brolink_model::{Organisation, OrganisationId};

    #[tokio::test]
    async fn organisation_credentials_win_over_default() {
        let repository = Arc::new(MemoryRepository::new());
        repository
            .put_organisation(&Organisation {
                id: OrganisationId::new(),
                company_number: "12345678".into(),
                name: "Waterschap".into(),
                credentials: Some(RegistryCredentials::new("12345678", "org-token")),
            })
            .await
            .unwrap();
        let resolver = CredentialResolver::new(
            repository,
            Some(RegistryCredentials::new("00000000", "default-token")),
        );
        let credentials = resolver.resolve(&context()).await.unwrap();
        assert_eq!(credentials.token(), "org-token");
    }

    #[tokio::test]
    async fn missing_credentials_are_a_configuration_error() {
        let resolver = CredentialResolver::new(Arc::new(MemoryRepository::new()), None);
        let err = resolver.resolve(&context()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Configuration(_)));
    }

    #[tokio::test]
    async fn default_is_used_without_organisation() {
        let resolver = CredentialResolver::new(
            Arc::new(MemoryRepository::new()),
            Some(RegistryCredentials::new("00000000", "default-token")),
        );
        assert_eq!(
            resolver.resolve(&context()).await.unwrap().company_number,
            "00000000"
        );
    }
}
