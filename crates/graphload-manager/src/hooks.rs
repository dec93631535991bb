//! Statements run before and after an import.

use std::time::Duration;

use graphload_client::{Client, Pool};
use graphload_core::{ConfigError, HookConfig, HooksConfig};
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ManagerResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hook {
    pub statements: Vec<String>,
    /// Pause after the statements ran, e.g. to let schema changes propagate.
    pub wait: Option<Duration>,
}

impl Hook {
    pub fn new(statements: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
            wait: None,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn from_config(config: &HookConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            statements: config.statements.clone(),
            wait: config.wait()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hooks {
    pub before: Vec<Hook>,
    pub after: Vec<Hook>,
}

impl Hooks {
    pub fn from_config(config: &HooksConfig) -> Result<Self, ConfigError> {
        let convert = |hooks: &[HookConfig]| {
            hooks
                .iter()
                .map(Hook::from_config)
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            before: convert(&config.before)?,
            after: convert(&config.after)?,
        })
    }
}

/// Run `hooks` in order on one dedicated client. The client skips the pool's
/// init hook, since a before-hook may be what creates the graph.
pub(crate) async fn run_hooks(
    pool: &Pool,
    graph: &str,
    stage: &'static str,
    hooks: &[Hook],
) -> ManagerResult<()> {
    if hooks.iter().all(|h| h.statements.is_empty() && h.wait.is_none()) {
        return Ok(());
    }

    let mut options = pool.options().client.clone();
    options.client_init = None;
    let mut client = pool.get_client_with(options).await?;

    let result = run_on(&mut client, graph, stage, hooks).await;
    if let Err(e) = client.close().await {
        warn!(graph, stage, error = %e, "failed to close hook client");
    }
    result
}

async fn run_on(
    client: &mut Client,
    graph: &str,
    stage: &'static str,
    hooks: &[Hook],
) -> ManagerResult<()> {
    for hook in hooks {
        for statement in &hook.statements {
            debug!(graph, stage, statement = %statement, "running hook statement");
            let resp = client
                .execute(statement)
                .await
                .map_err(|e| ManagerError::Hook {
                    graph: graph.to_string(),
                    statement: statement.clone(),
                    cause: e.into(),
                })?;
            if !resp.is_succeed() {
                return Err(ManagerError::Hook {
                    graph: graph.to_string(),
                    statement: statement.clone(),
                    cause: anyhow::anyhow!(
                        resp.error()
                            .unwrap_or_else(|| "statement did not succeed".to_string())
                    ),
                });
            }
        }
        if let Some(wait) = hook.wait.filter(|w| !w.is_zero()) {
            info!(graph, stage, wait_ms = wait.as_millis() as u64, "waiting after hook");
            tokio::time::sleep(wait).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphload_client::Options;
    use graphload_client::mock::{MockResponse, MockServer};
    use graphload_core::Address;

    fn pool(server: &MockServer) -> Pool {
        Pool::new(
            Options::new(vec![Address::new("graphd", 9669)], server.factory()).with_retry(0),
        )
    }

    #[test]
    fn hooks_from_config() {
        let config: HooksConfig = HooksConfig {
            before: vec![HookConfig {
                statements: vec!["CREATE SPACE basic".into()],
                wait: Some("10s".into()),
            }],
            after: vec![HookConfig {
                statements: vec!["SUBMIT JOB STATS".into()],
                wait: None,
            }],
        };
        let hooks = Hooks::from_config(&config).unwrap();
        assert_eq!(
            hooks.before,
            vec![Hook::new(["CREATE SPACE basic"]).with_wait(Duration::from_secs(10))]
        );
        assert_eq!(hooks.after, vec![Hook::new(["SUBMIT JOB STATS"])]);
    }

    #[test]
    fn invalid_wait_is_rejected() {
        let config = HookConfig {
            statements: vec![],
            wait: Some("soon".into()),
        };
        assert!(Hook::from_config(&config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn statements_run_in_order_with_wait() {
        let server = MockServer::new();
        let pool = pool(&server);
        let hooks = vec![
            Hook::new(["CREATE SPACE basic", "USE basic"]).with_wait(Duration::from_secs(10)),
            Hook::new(["CREATE TAG person(name string)"]),
        ];

        let started = tokio::time::Instant::now();
        run_hooks(&pool, "basic", "before", &hooks).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(
            server.statements(),
            vec!["CREATE SPACE basic", "USE basic", "CREATE TAG person(name string)"]
        );
        assert_eq!(server.opens(), server.closes());
    }

    #[tokio::test]
    async fn failing_statement_aborts_remaining_hooks() {
        let server = MockServer::with_responder(|_, stmt| {
            if stmt.contains("bad") {
                Ok(MockResponse::permanent("SyntaxError"))
            } else {
                Ok(MockResponse::success())
            }
        });
        let pool = pool(&server);
        let hooks = vec![Hook::new(["good", "bad", "never"]), Hook::new(["never either"])];

        let err = run_hooks(&pool, "basic", "before", &hooks).await.unwrap_err();
        match err {
            ManagerError::Hook { statement, .. } => assert_eq!(statement, "bad"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(server.statements(), vec!["good", "bad"]);
    }

    #[tokio::test]
    async fn empty_hooks_do_not_connect() {
        let server = MockServer::new();
        let pool = pool(&server);
        run_hooks(&pool, "basic", "after", &[]).await.unwrap();
        assert_eq!(server.opens(), 0);
    }
}
