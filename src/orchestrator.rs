//! Check orchestration
//!
//! Builds the endpoint registry, controller and checks from configuration,
//! then either serves (every check loop plus the status server) or runs a
//! one-shot pass.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::check::{Check, Harness, NoObserver, RunOutcome};
use crate::config::Config;
use crate::controller::{Controller, Loopback, LoopbackOptions};
use crate::endpoint::Registry;
use crate::scheduler::run_loop;
use crate::status::{self, StatusBoard};

/// Everything built at startup
pub struct Runtime {
    pub config: Arc<Config>,
    pub registry: Registry,
    pub harness: Arc<Harness>,
    pub checks: Vec<Arc<Check>>,
    pub board: Arc<StatusBoard>,
}

/// Create the controller named by `controller.backend`
pub fn build_controller(config: &Config, registry: &Registry) -> Result<Arc<dyn Controller>> {
    match config.controller.backend.as_str() {
        "loopback" => {
            info!("Using loopback controller ({} routed links)", registry.iter().filter(|e| e.number.is_some()).count());
            let lb = Loopback::from_registry(registry, config.controller.dialplan.clone(), LoopbackOptions::default());
            Ok(Arc::new(lb))
        }
        other => bail!("Unsupported controller backend '{}'", other),
    }
}

/// Validate `config` and build the runtime around the configured backend
pub fn bootstrap(config: Config) -> Result<Runtime> {
    config.validate()?;
    let registry = Registry::from_config(&config.links);
    let controller = build_controller(&config, &registry)?;
    bootstrap_with(config, registry, controller)
}

/// Build the runtime around an existing controller
pub fn bootstrap_with(config: Config, registry: Registry, controller: Arc<dyn Controller>) -> Result<Runtime> {
    let harness = Arc::new(Harness::new(
        controller,
        config.controller.dialplan.clone(),
        &config.controller.app,
    ));
    let checks = config
        .calls
        .iter()
        .map(|(name, call)| {
            Check::new(name, call.clone(), &registry)
                .map(Arc::new)
                .with_context(|| format!("Cannot set up check '{}'", name))
        })
        .collect::<Result<Vec<_>>>()?;
    let board = Arc::new(StatusBoard::new(checks.iter().cloned()));
    info!("{} links, {} checks", registry.len(), checks.len());

    Ok(Runtime {
        config: Arc::new(config),
        registry,
        harness,
        checks,
        board,
    })
}

impl Runtime {
    /// Checks selected by name, or every non-skip check when `names` is
    /// empty
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<Check>>> {
        if names.is_empty() {
            return Ok(self.checks.iter().filter(|c| !c.config.skip).cloned().collect());
        }
        names
            .iter()
            .map(|name| {
                self.checks
                    .iter()
                    .find(|c| &c.name == name)
                    .cloned()
                    .with_context(|| format!("Unknown check '{}'", name))
            })
            .collect()
    }

    /// Run the selected checks once, concurrently
    pub async fn run_once(&self, names: &[String]) -> Result<Vec<(String, RunOutcome)>> {
        let selected = self.select(names)?;
        if selected.is_empty() {
            bail!("No checks to run. Missing config file?");
        }
        let mut handles = Vec::new();
        for check in selected {
            let harness = self.harness.clone();
            let board = self.board.clone();
            handles.push(tokio::spawn(async move {
                let outcome = check.run_once(&harness, &*board).await;
                (check.name.clone(), outcome)
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.context("Check task panicked")?);
        }
        Ok(results)
    }

    /// Run every check loop plus the status server until `shutdown`
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<()> {
        let server = &self.config.server;
        let listener = status::bind(&server.host, server.port).await?;
        let server_task = tokio::spawn(status::serve(listener, self.board.clone(), shutdown.clone()));

        let mut loops = Vec::new();
        for check in &self.checks {
            let check = check.clone();
            let harness = self.harness.clone();
            let board = self.board.clone();
            let shutdown = shutdown.clone();
            loops.push(tokio::spawn(async move {
                tokio::select! {
                    _ = run_loop(&check, &harness, &*board) => {}
                    _ = shutdown.cancelled() => {
                        info!("{}: scheduler stopped", check.name);
                    }
                }
            }));
        }
        info!("Serving {} checks", loops.len());

        shutdown.cancelled().await;
        for handle in loops {
            if let Err(e) = handle.await {
                error!("Check loop ended abnormally: {}", e);
            }
        }
        if let Err(e) = server_task.await {
            error!("Status server ended abnormally: {}", e);
        }
        Ok(())
    }
}

/// Run one check outside any board, for tools and tests
pub async fn run_single(check: &Check, harness: &Harness) -> RunOutcome {
    check.run_once(harness, &NoObserver).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[links.a]
channel = "LOOP/{nr}"
number = "+4930100"

[links.b]
channel = "LOOP/{nr}"
number = "+4930200"

[calls.ring_b]
mode = "ring"
src = "a"
dst = "b"
delay = { ring = 0, answer = 0 }

[calls.manual]
mode = "wait"
dst = "a"
test = { skip = true }
"#;

    #[test]
    fn test_bootstrap_builds_checks() {
        let rt = bootstrap(Config::from_toml_str(CONFIG).unwrap()).unwrap();
        assert_eq!(rt.checks.len(), 2);
        assert_eq!(rt.registry.len(), 2);
        assert_eq!(rt.board.len(), 2);
    }

    #[test]
    fn test_bootstrap_rejects_invalid() {
        let text = "[calls.x]\nmode = \"ring\"\n";
        let err = bootstrap(Config::from_toml_str(text).unwrap()).err().unwrap();
        assert!(err.to_string().contains("Configuration validation failed"));
    }

    #[test]
    fn test_unsupported_backend() {
        let config = Config::from_toml_str("[controller]\nbackend = \"ari\"\n").unwrap();
        let registry = Registry::from_config(&config.links);
        assert!(build_controller(&config, &registry).is_err());
    }

    #[test]
    fn test_select_checks() {
        let rt = bootstrap(Config::from_toml_str(CONFIG).unwrap()).unwrap();
        let all: Vec<String> = rt.select(&[]).unwrap().iter().map(|c| c.name.clone()).collect();
        assert_eq!(all, vec!["ring_b".to_string()]);
        assert_eq!(rt.select(&["manual".to_string()]).unwrap().len(), 1);
        assert!(rt.select(&["ghost".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_run_once_default_selection() {
        let rt = bootstrap(Config::from_toml_str(CONFIG).unwrap()).unwrap();
        let results = rt.run_once(&[]).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "ring_b");
        // Nobody listens on "b", so the call rings unrouted
        assert_eq!(results[0].1, RunOutcome::Passed);
        let snap = rt.board.snapshot("ring_b").unwrap();
        assert_eq!(snap.n_run, 1);
    }
}
