//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat, StateCommand};
use crate::config::SyncSettings;
use crate::engine::{JsonLinesSink, SyncEngine};
use crate::error::{Error, Result};
use crate::source::{load_source, HttpSource, SourceDefinition};
use crate::state::WatermarkStore;
use crate::types::PartitionKey;
use serde_json::{json, Value};
use tracing::info;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Run { streams } => self.sync(streams.as_deref()).await,
            Commands::Validate => self.validate(),
            Commands::State { action } => match action {
                StateCommand::Show => self.show_state().await,
                StateCommand::Reset { stream, partition } => {
                    self.reset_state(stream.as_deref(), partition.as_deref())
                        .await
                }
            },
        }
    }

    /// Load source definition
    fn load_source(&self) -> Result<SourceDefinition> {
        let path = self
            .cli
            .source
            .as_ref()
            .ok_or_else(|| Error::config("Source file not specified (use --source)"))?;
        load_source(path)
    }

    /// Load settings, applying the `--mode` override
    fn load_settings(&self) -> Result<SyncSettings> {
        let settings = match &self.cli.settings {
            Some(path) => SyncSettings::from_file(path)?,
            None => SyncSettings::new(),
        };
        Ok(match self.cli.mode {
            Some(mode) => settings.with_mode(mode.into()),
            None => settings,
        })
    }

    /// Open the state file, or an in-memory store without one
    fn open_store(&self) -> Result<WatermarkStore> {
        match &self.cli.state {
            Some(path) => WatermarkStore::from_file(path),
            None => Ok(WatermarkStore::in_memory()),
        }
    }

    /// Sync the selected streams
    async fn sync(&self, streams: Option<&str>) -> Result<()> {
        let definition = self.load_source()?;
        let settings = self.load_settings()?;
        let store = self.open_store()?;

        let only: Option<Vec<String>> = streams.map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        });

        let source = HttpSource::new(definition, &settings)?;
        let streams = source.streams(only.as_deref())?;
        let partitions = source.partitions();
        info!(source = source.name(), streams = streams.len(), "loaded source");

        let engine = SyncEngine::new(settings, store);
        let sink = JsonLinesSink::new(std::io::stdout()).with_logs(self.cli.verbose);
        let report = engine.run(partitions.as_ref(), &streams, &sink).await?;

        self.output_message(&json!({
            "type": "state_snapshot",
            "state": report.state,
        }));
        self.output_message(&json!({
            "type": "summary",
            "source": source.name(),
            "state_file": self.cli.state,
            "stats": report.stats,
            "partitions": report.partitions,
        }));

        let failed = report.failures().count();
        if failed > 0 {
            return Err(Error::Other(format!(
                "{failed} stream partitions failed"
            )));
        }
        Ok(())
    }

    /// Validate source definition and settings
    fn validate(&self) -> Result<()> {
        let definition = self.load_source()?;
        let settings = self.load_settings()?;
        settings.validate()?;

        self.output_message(&json!({
            "type": "log",
            "level": "info",
            "message": format!(
                "Source '{}' is valid with {} streams",
                definition.name,
                definition.streams.len()
            )
        }));
        Ok(())
    }

    /// Print persisted state
    async fn show_state(&self) -> Result<()> {
        let store = self.open_store()?;
        let state: Value = serde_json::from_str(&store.to_json().await?)?;
        self.output_message(&state);
        Ok(())
    }

    /// Drop watermarks from the state file
    async fn reset_state(&self, stream: Option<&str>, partition: Option<&str>) -> Result<()> {
        if self.cli.state.is_none() {
            return Err(Error::config("State file not specified (use --state)"));
        }
        let store = self.open_store()?;

        let message = match (stream, partition) {
            (Some(stream), Some(partition)) => {
                let removed = store.remove(stream, &PartitionKey::new(partition)).await?;
                if removed.is_some() {
                    format!("Reset {stream} of {partition}")
                } else {
                    format!("No state for {stream} of {partition}")
                }
            }
            (Some(stream), None) => {
                store.clear_stream(stream).await?;
                format!("Reset stream {stream}")
            }
            (None, None) => {
                store.clear().await?;
                "Reset all state".to_string()
            }
            (None, Some(_)) => {
                return Err(Error::config("--partition requires --stream"));
            }
        };
        store.save().await?;

        self.output_message(&json!({
            "type": "log",
            "level": "info",
            "message": message,
        }));
        Ok(())
    }

    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}
