use std::{fs, io::Write, path::Path, sync::Arc};

use anyhow::{Context, bail};
use brolink_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use brolink_core::{
    Coordinator, DeliveryLogStore, DossierRepository, HttpRegistryClient, Ingestor, LogFilter, Snapshot,
    SqliteLogStore, SqliteRepository, TickReport, TickScope,
    envelope::construction::build_construction, open_database,
};
use brolink_model::{
    DeliveryLog, MessageKind, WellId,
    chrono::Utc,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Command, Outcome, RenderCommand};

struct Runtime {
    config: Config,
    store: Arc<SqliteLogStore>,
    repository: Arc<SqliteRepository>,
}

impl Runtime {
    async fn open(options: ConfigLoaderOptions) -> anyhow::Result<Self> {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();

        let ConfigLoad { config, warnings } = ConfigLoader::with_options(options)
            .load()
            .context("failed to load configuration")?;

        if config.metadata.env_file_loaded {
            info!("loaded .env file");
        }
        if let Some(path) = &config.metadata.config_path {
            info!(path = %path.display(), "configuration file loaded");
        }
        for warning in &warnings.items {
            match &warning.hint {
                Some(hint) => warn!(message = %warning.message, hint = %hint, "configuration warning"),
                None => warn!(message = %warning.message, "configuration warning"),
            }
        }

        let pool = open_database(&config.database.url)
            .await
            .with_context(|| format!("failed to open database {}", config.database.url))?;

        Ok(Self {
            store: Arc::new(SqliteLogStore::new(pool.clone())),
            repository: Arc::new(SqliteRepository::new(pool)),
            config,
        })
    }

    fn coordinator(&self) -> anyhow::Result<Coordinator> {
        let registry =
            HttpRegistryClient::new(&self.config.registry.base_url, self.config.delivery.deadlines)
                .context("failed to build registry client")?;
        Ok(Coordinator::new(
            self.store.clone(),
            self.repository.clone(),
            Arc::new(registry),
            self.config.delivery.clone(),
            Some(self.config.registry.credentials.clone()),
        ))
    }
}

pub(crate) async fn run(command: Command, options: ConfigLoaderOptions) -> anyhow::Result<Outcome> {
    let runtime = Runtime::open(options).await?;

    match command {
        Command::SyncStarts => tick(&runtime, TickScope::Only(MessageKind::Start)).await,
        Command::SyncAdditions => tick(&runtime, TickScope::Only(MessageKind::Addition)).await,
        Command::CheckStatus => tick(&runtime, TickScope::StatusOnly).await,
        Command::Tick => tick(&runtime, TickScope::All).await,
        Command::Requeue { log_id } => {
            let log = runtime
                .coordinator()?
                .requeue(log_id)
                .await
                .with_context(|| format!("failed to requeue {log_id}"))?;
            println!("{}", describe(&log));
            Ok(Outcome::Ok)
        }
        Command::Logs {
            dossier,
            phase,
            kind,
            json,
        } => {
            let filter = LogFilter {
                dossier,
                kind,
                phase,
            };
            let logs = runtime
                .store
                .list(&filter)
                .await
                .context("failed to read delivery journal")?;
            let mut out = std::io::stdout().lock();
            for log in &logs {
                if json {
                    writeln!(out, "{}", serde_json::to_string(log)?)?;
                } else {
                    writeln!(out, "{}", describe(log))?;
                }
            }
            Ok(Outcome::Ok)
        }
        Command::Import { snapshot } => {
            import(&runtime, &snapshot).await?;
            Ok(Outcome::Ok)
        }
        Command::Render(RenderCommand::Construction { well_id, output }) => {
            render_construction(&runtime, well_id, output.as_deref()).await?;
            Ok(Outcome::Ok)
        }
    }
}

async fn tick(runtime: &Runtime, scope: TickScope) -> anyhow::Result<Outcome> {
    let report = runtime
        .coordinator()?
        .tick(scope)
        .await
        .context("delivery pass aborted")?;
    println!("{report}");
    Ok(outcome_of(&report))
}

/// Unreachable wins over rejections when both apply.
fn outcome_of(report: &TickReport) -> Outcome {
    if report.registry_unreachable() {
        Outcome::RegistryUnreachable
    } else if report.has_rejections() {
        Outcome::Rejections
    } else {
        Outcome::Ok
    }
}

async fn import(runtime: &Runtime, path: &Path) -> anyhow::Result<()> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let snapshot = Snapshot::from_json(&bytes)
        .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
    let report = Ingestor::new(runtime.repository.clone(), runtime.store.clone())
        .import_snapshot(snapshot)
        .await
        .context("snapshot import failed")?;
    println!("{report}");
    Ok(())
}

async fn render_construction(
    runtime: &Runtime,
    well_id: WellId,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let Some(well) = runtime.repository.get_well(well_id).await? else {
        bail!("well {well_id} does not exist");
    };
    let regime = well
        .quality_regime
        .unwrap_or(runtime.config.delivery.quality_regime_default);
    let document = build_construction(&well, regime, Utc::now())
        .with_context(|| format!("cannot render construction for {}", well.internal_id))?;

    match output {
        Some(path) => {
            fs::write(path, &document.bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(
                path = %path.display(),
                reference = %document.request_reference,
                checksum = %document.checksum.short(),
                "construction document written"
            );
        }
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(&document.bytes)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn describe(log: &DeliveryLog) -> String {
    let mut line = format!(
        "{id} dossier={dossier} kind={kind} attempt={attempt} phase={phase}{superseded} updated={updated}",
        id = log.id,
        dossier = log.dossier,
        kind = log.kind,
        attempt = log.attempt,
        phase = log.phase,
        superseded = if log.superseded { " (superseded)" } else { "" },
        updated = log.updated_at.to_rfc3339(),
    );
    if let Some(reference) = &log.remote_reference {
        line.push_str(&format!(" reference={reference}"));
    }
    if let Some(at) = log.earliest_retry_at {
        line.push_str(&format!(" retry_at={}", at.to_rfc3339()));
    }
    if let Some(error) = &log.last_error {
        line.push_str(&format!(" reason=\"{error}\""));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_registry_wins_over_rejections() {
        let report = TickReport {
            rejected: 1,
            registry_calls: 2,
            transient_registry_failures: 2,
            ..TickReport::default()
        };
        assert_eq!(outcome_of(&report), Outcome::RegistryUnreachable);
    }

    #[test]
    fn rejections_and_clean_passes() {
        let rejected = TickReport {
            rejected: 1,
            registry_calls: 3,
            transient_registry_failures: 1,
            ..TickReport::default()
        };
        assert_eq!(outcome_of(&rejected), Outcome::Rejections);
        assert_eq!(outcome_of(&TickReport::default()), Outcome::Ok);
    }
}
