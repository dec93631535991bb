use std::path::Path;

use anyhow::Context;
use graphload_core::LoaderConfig;
use serde::Serialize;

/// What `config check` reports about a valid configuration.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub version: String,
    pub addresses: Vec<String>,
    pub user: String,
    pub workers: usize,
    pub queue_size: usize,
    pub retry: u32,
    pub graph_name: String,
    pub reader_concurrency: usize,
    pub importer_concurrency: usize,
    pub before_hooks: usize,
    pub after_hooks: usize,
}

impl Summary {
    pub fn from_config(config: &LoaderConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let client = &config.client;
        let manager = &config.manager;
        let addresses = client.addresses()?;
        Ok(Self {
            version: client.version()?.to_string(),
            workers: addresses.len() * client.concurrency_per_address()?,
            addresses: addresses.iter().map(ToString::to_string).collect(),
            user: client.user().to_string(),
            queue_size: client.queue_size()?,
            retry: client.retry(),
            graph_name: manager.graph_name().to_string(),
            reader_concurrency: manager.reader_concurrency()?,
            importer_concurrency: manager.importer_concurrency()?,
            before_hooks: manager.hooks.before.len(),
            after_hooks: manager.hooks.after.len(),
        })
    }

    fn format_text(&self) -> String {
        format!(
            "version:    {}\n\
             addresses:  {}\n\
             user:       {}\n\
             workers:    {} (queue {}, retry {})\n\
             graph:      {}\n\
             readers:    {}\n\
             importers:  {}\n\
             hooks:      {} before, {} after",
            self.version,
            self.addresses.join(", "),
            self.user,
            self.workers,
            self.queue_size,
            self.retry,
            if self.graph_name.is_empty() { "-" } else { self.graph_name.as_str() },
            self.reader_concurrency,
            self.importer_concurrency,
            self.before_hooks,
            self.after_hooks,
        )
    }
}

pub fn init(path: &str, graph: &str, force: bool) -> anyhow::Result<()> {
    let output = Path::new(path).join("graphload.toml");
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let config = LoaderConfig::scaffold(graph);
    std::fs::write(&output, config.to_toml_string()?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::debug!(path = %output.display(), graph, "scaffold written");
    println!("✓ Generated {}", output.display());
    Ok(())
}

pub fn check(path: &str, format: &str) -> anyhow::Result<()> {
    let config = LoaderConfig::from_file(Path::new(path))?;
    let summary = Summary::from_config(&config)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            println!("✓ {path} is valid");
            println!("{}", summary.format_text());
        }
    }

    Ok(())
}
