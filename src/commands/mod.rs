pub mod encrypt;
pub mod list_versions;
pub mod pull;
pub mod push;
pub mod rotate_key;

pub use encrypt::{decrypt, encrypt};
pub use list_versions::list_versions;
pub use pull::pull;
pub use push::push;
pub use rotate_key::rotate_key;

use crate::api::http::{HttpClient, HttpEnvClient, HttpKeyService};
use crate::api::EnvClient;
use crate::cache::LocalCache;
use crate::config::{self, WorkspaceConfig};
use crate::error::{HxError, Result};
use crate::keystore::{FileKeyProvider, KeyProvider, KeyStore, RemoteKeyProvider};
use crate::sync::{CancelToken, EnvOutcome, SyncSummary, SyncTarget, Synchroniser};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Keep the project key in `.hxkey` only; never talk to the key service
    pub local_secret: bool,
    pub cancel: CancelToken,
}

/// Everything one command invocation works with.
pub struct Session {
    pub config: WorkspaceConfig,
    pub root: PathBuf,
    pub home: Option<PathBuf>,
    pub client: Box<dyn EnvClient>,
    pub keys: KeyStore,
    pub cache: LocalCache,
    pub cancel: CancelToken,
}

impl Session {
    /// Load configuration for the workspace at `root` and connect to the remote
    pub fn open(root: &Path, options: SessionOptions) -> Result<Self> {
        let home = config::home_dir();
        let cfg = WorkspaceConfig::load(root, home.as_deref())?;
        let cache = match &home {
            Some(home) => LocalCache::in_home(home),
            None => return Err(HxError::Config("Could not determine the home directory".into())),
        };

        let api = cfg.api_settings();
        debug!(api_url = %api.base_url, timeout = ?api.timeout, "connecting");
        let http = HttpClient::new(&api)?;
        let client = Box::new(HttpEnvClient::new(http.clone(), &api));

        let mut providers: Vec<Box<dyn KeyProvider>> = Vec::new();
        if !options.local_secret {
            providers.push(Box::new(RemoteKeyProvider::new(Box::new(
                HttpKeyService::new(http, &api),
            ))));
        }
        providers.push(Box::new(FileKeyProvider::new(root, home.clone())));

        Ok(Self {
            config: cfg,
            root: root.to_path_buf(),
            home,
            client,
            keys: KeyStore::new(providers),
            cache,
            cancel: options.cancel,
        })
    }

    pub fn synchroniser(&self) -> Synchroniser<'_> {
        Synchroniser::new(self.client.as_ref(), &self.keys, &self.cache).with_cancel(self.cancel.clone())
    }

    pub fn org(&self) -> Result<&str> {
        self.config.organization_id()
    }

    pub fn project(&self) -> Result<&str> {
        self.config.project_id()
    }

    /// The apps a command runs against: the workspace itself, or each app of a monorepo
    pub fn targets(&self) -> Result<Vec<SyncTarget>> {
        let org = self.org()?.to_string();
        let project = self.project()?.to_string();

        let Some(apps) = self.config.monorepo_apps() else {
            return Ok(vec![SyncTarget {
                org,
                project,
                app: self.config.app_id()?.to_string(),
                dir: self.root.clone(),
            }]);
        };

        let mut targets = Vec::new();
        for app_dir in apps {
            let dir = self.root.join(app_dir);
            let app = WorkspaceConfig::load(&dir, None).and_then(|cfg| cfg.app_id().map(str::to_string));
            match app {
                Ok(app) => targets.push(SyncTarget {
                    org: org.clone(),
                    project: project.clone(),
                    app,
                    dir,
                }),
                Err(e) => warn!(app = %app_dir, error = %e, "skipping app"),
            }
        }
        if targets.is_empty() {
            return Err(HxError::Config("No usable apps listed in the monorepo config".into()));
        }
        Ok(targets)
    }
}

/// Run `op` against every target, printing each summary.
///
/// In a monorepo a failing app is reported and the remaining apps still run.
fn for_each_target<F>(session: &Session, verb: &str, op: F) -> Result<()>
where
    F: Fn(&Synchroniser<'_>, &SyncTarget) -> Result<SyncSummary>,
{
    let targets = session.targets()?;
    let monorepo = targets.len() > 1;
    let sync = session.synchroniser();

    let mut failed = 0;
    for target in &targets {
        let summary = match op(&sync, target) {
            Ok(summary) => summary,
            Err(e) if monorepo => {
                warn!(app = %target.app, error = %e, "app failed");
                eprintln!("{}: {e}", target.app);
                failed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        print_summary(verb, monorepo.then_some(target.app.as_str()), &summary);
        if summary.was_cancelled() {
            return Err(HxError::Cancelled);
        }
        failed += summary.failed();
    }

    if failed > 0 {
        return Err(HxError::Incomplete { failed });
    }
    Ok(())
}

fn print_summary(verb: &str, app: Option<&str>, summary: &SyncSummary) {
    if let Some(app) = app {
        println!("{app}:");
    }
    for report in &summary.reports {
        match &report.outcome {
            EnvOutcome::Synced { version } => {
                println!("  {}: {verb} (version {version})", report.name)
            }
            EnvOutcome::Created => println!("  {}: created empty file", report.name),
            EnvOutcome::Skipped(reason) => println!("  {}: skipped ({reason})", report.name),
            EnvOutcome::Failed(e) => eprintln!("  {}: {e}", report.name),
        }
    }
    println!(
        "{} {verb}, {} skipped, {} failed",
        summary.synced(),
        summary.skipped(),
        summary.failed()
    );
}
