use std::{collections::VecDeque, fmt, sync::Arc};

use async_trait::async_trait;
use brolink_core::{DeliveryError, RegistryClient, Result};
use brolink_model::{RegistryCredentials, RegistryId, RemoteStatus};
use tokio::sync::Mutex;

/// Scripted outcome for one registry call.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Transient(&'static str),
    Permanent(&'static str),
}

impl<T> Reply<T> {
    fn into_result(self) -> Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Transient(reason) => Err(DeliveryError::Transient(reason.to_string())),
            Reply::Permanent(reason) => Err(DeliveryError::Permanent(reason.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Submit { body: String, company_number: String },
    Status(String),
    FetchId(String),
}

#[derive(Default)]
struct Script {
    submits: VecDeque<Reply<String>>,
    statuses: VecDeque<Reply<RemoteStatus>>,
    ids: VecDeque<Reply<Option<RegistryId>>>,
    calls: Vec<Call>,
    issued: usize,
}

/// In-process registry. Unscripted calls succeed: submits get a fresh
/// reference, polls report accepted and id lookups return
/// `GLD000000000001`.
#[derive(Clone, Default)]
pub struct ScriptedRegistry {
    script: Arc<Mutex<Script>>,
}

impl fmt::Debug for ScriptedRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedRegistry").finish()
    }
}

pub fn gld(n: u64) -> RegistryId {
    RegistryId::parse(&format!("GLD{n:012}")).unwrap()
}

impl ScriptedRegistry {
    pub async fn on_submit(&self, reply: Reply<String>) {
        self.script.lock().await.submits.push_back(reply);
    }

    pub async fn on_status(&self, reply: Reply<RemoteStatus>) {
        self.script.lock().await.statuses.push_back(reply);
    }

    pub async fn on_fetch_id(&self, reply: Reply<Option<RegistryId>>) {
        self.script.lock().await.ids.push_back(reply);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.script.lock().await.calls.clone()
    }

    pub async fn submitted_bodies(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                Call::Submit { body, .. } => Some(body),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RegistryClient for ScriptedRegistry {
    async fn submit(&self, envelope: &[u8], credentials: &RegistryCredentials) -> Result<String> {
        let mut script = self.script.lock().await;
        script.calls.push(Call::Submit {
            body: String::from_utf8_lossy(envelope).into_owned(),
            company_number: credentials.company_number.clone(),
        });
        script.issued += 1;
        let fallback = Reply::Ok(format!("ref-{}", script.issued));
        script.submits.pop_front().unwrap_or(fallback).into_result()
    }

    async fn status(
        &self,
        reference: &str,
        _credentials: &RegistryCredentials,
    ) -> Result<RemoteStatus> {
        let mut script = self.script.lock().await;
        script.calls.push(Call::Status(reference.to_string()));
        script
            .statuses
            .pop_front()
            .unwrap_or(Reply::Ok(RemoteStatus::Accepted))
            .into_result()
    }

    async fn fetch_registry_id(
        &self,
        reference: &str,
        _credentials: &RegistryCredentials,
    ) -> Result<Option<RegistryId>> {
        let mut script = self.script.lock().await;
        script.calls.push(Call::FetchId(reference.to_string()));
        script
            .ids
            .pop_front()
            .unwrap_or_else(|| Reply::Ok(Some(gld(1))))
            .into_result()
    }
}
