use std::time::Duration;

use async_trait::async_trait;
use brolink_model::{RegistryCredentials, RegistryId, RemoteStatus};
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::RegistryClient;
use crate::{
    config::DeadlineConfig,
    error::{DeliveryError, Result},
};

const KVK_HEADER: &str = "X-Kvk";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    reference: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// `reqwest` implementation of the registry protocol.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    client: Client,
    base_url: Url,
    submit_deadline: Duration,
    poll_deadline: Duration,
}

impl HttpRegistryClient {
    pub fn new(base_url: &Url, deadlines: DeadlineConfig) -> Result<Self> {
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(DeliveryError::Configuration(format!(
                "registry base url must be http(s), got {base_url}"
            )));
        }
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| {
                DeliveryError::Configuration(format!("failed to build http client: {err}"))
            })?;

        Ok(Self {
            client,
            base_url: {
                let mut base = base_url.clone();
                base.set_query(None);
                base.set_fragment(None);
                base
            },
            submit_deadline: deadlines.submit(),
            poll_deadline: deadlines.poll(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                DeliveryError::Configuration(format!(
                    "registry base url {} cannot take a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(
        &self,
        request: RequestBuilder,
        credentials: &RegistryCredentials,
        deadline: Duration,
    ) -> RequestBuilder {
        request
            .bearer_auth(credentials.token())
            .header(KVK_HEADER, &credentials.company_number)
            .timeout(deadline)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(transport_error)
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn submit(
        &self,
        envelope: &[u8],
        credentials: &RegistryCredentials,
    ) -> Result<String> {
        let request = self
            .client
            .post(self.url(&["registrations"])?)
            .header(header::CONTENT_TYPE, "application/xml")
            .body(envelope.to_vec());
        let response = self
            .send(self.authorized(request, credentials, self.submit_deadline))
            .await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            return Err(status_error(status, response).await);
        }
        let body: SubmitResponse = response.json().await.map_err(|err| {
            // The payload may already be held remotely; treat as retryable and
            // let the registry dedupe on business keys.
            DeliveryError::Transient(format!("unreadable submit response: {err}"))
        })?;
        debug!(reference = %body.reference, %status, "registry accepted submission");
        Ok(body.reference)
    }

    async fn status(
        &self,
        reference: &str,
        credentials: &RegistryCredentials,
    ) -> Result<RemoteStatus> {
        let request = self.client.get(self.url(&["registrations", reference])?);
        let response = self
            .send(self.authorized(request, credentials, self.poll_deadline))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }
        let body: StatusResponse = response.json().await.map_err(|err| {
            DeliveryError::Transient(format!("unreadable status response: {err}"))
        })?;
        RemoteStatus::from_wire(&body.status, body.reason).ok_or_else(|| {
            DeliveryError::Transient(format!(
                "unknown remote status '{}' for {reference}",
                body.status
            ))
        })
    }

    async fn fetch_registry_id(
        &self,
        reference: &str,
        credentials: &RegistryCredentials,
    ) -> Result<Option<RegistryId>> {
        let request = self
            .client
            .get(self.url(&["registrations", reference, "id"])?);
        let response = self
            .send(self.authorized(request, credentials, self.poll_deadline))
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }
        let body: IdResponse = response.json().await.map_err(|err| {
            DeliveryError::Transient(format!("unreadable id response: {err}"))
        })?;
        let id = RegistryId::parse(&body.id).map_err(|err| {
            DeliveryError::Consistency(format!(
                "registry issued malformed id for {reference}: {err}"
            ))
        })?;
        Ok(Some(id))
    }
}

fn transport_error(err: reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        return DeliveryError::Configuration(format!("invalid registry request: {err}"));
    }
    if err.is_timeout() {
        return DeliveryError::Transient(format!("registry call timed out: {err}"));
    }
    DeliveryError::Transient(format!("registry unreachable: {err}"))
}

/// 408, 429 and 5xx are retryable; every other non-success is final.
pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

async fn status_error(status: StatusCode, response: Response) -> DeliveryError {
    let body = response.text().await.unwrap_or_default();
    let detail = body.trim();
    let message = if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    };
    if is_retryable_status(status) {
        DeliveryError::Transient(message)
    } else {
        DeliveryError::Permanent(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[test]
    fn base_url_is_normalised() {
        let url = Url::parse("https://registry.example/api/v2/?debug=1").unwrap();
        let client = HttpRegistryClient::new(&url, DeadlineConfig::default()).unwrap();
        assert_eq!(client.base_url().as_str(), "https://registry.example/api/v2/");
        assert_eq!(
            client.url(&["registrations"]).unwrap().as_str(),
            "https://registry.example/api/v2/registrations"
        );
    }

    #[test]
    fn references_stay_inside_their_path_segment() {
        let url = Url::parse("https://registry.example/api").unwrap();
        let client = HttpRegistryClient::new(&url, DeadlineConfig::default()).unwrap();
        let built = client.url(&["registrations", "a/b?c#d", "id"]).unwrap();
        assert_eq!(
            built.as_str(),
            "https://registry.example/api/registrations/a%2Fb%3Fc%23d/id"
        );
        assert_eq!(built.query(), None);
    }

    #[test]
    fn non_http_scheme_is_a_configuration_error() {
        let url = Url::parse("ftp://registry.example").unwrap();
        assert!(matches!(
            HttpRegistryClient::new(&url, DeadlineConfig::default()),
            Err(DeliveryError::Configuration(_))
        ));
    }
}
