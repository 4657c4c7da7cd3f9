// src/schema.rs

use std::{fs, path::Path};

use anyhow::{Context, Error};
use chat_message::{InboundMessage, OutboundMessage, OutgoingEnvelope};
use schemars::{JsonSchema, schema_for};
use tracing::info;

use crate::{
    config::BotConfig,
    flow::{StepResult, manager::TurnOutcome, session::Session},
};

fn write_one<T: JsonSchema>(out_dir: &Path, name: &str) -> Result<(), Error> {
    let schema = schema_for!(T);
    let json = serde_json::to_string_pretty(&schema)?;
    let path = out_dir.join(format!("{}.schema.json", name));
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Writes the JSON schema of every type that crosses the process boundary
/// into `out_dir` and returns the file names, sorted.
pub fn write_schema(out_dir: &Path) -> Result<Vec<String>, Error> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating schema directory {}", out_dir.display()))?;

    write_one::<InboundMessage>(out_dir, "inbound-message")?;
    write_one::<OutboundMessage>(out_dir, "outbound-message")?;
    write_one::<OutgoingEnvelope>(out_dir, "outgoing-envelope")?;
    write_one::<Session>(out_dir, "session")?;
    write_one::<StepResult>(out_dir, "step-result")?;
    write_one::<TurnOutcome>(out_dir, "turn-outcome")?;
    write_one::<BotConfig>(out_dir, "config")?;

    let mut written: Vec<String> = fs::read_dir(out_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".schema.json"))
        .collect();
    written.sort();
    Ok(written)
}
