//! `hotview synth` - one-shot synthesis.
//!
//! Feeds the given files through a fresh synthesizer in order and prints
//! every emitted unit to stdout. Useful to inspect what a device receives.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::{
    config::HotConfig,
    log,
    synth::{ClassSynthesizer, EmittedUnit, MarkupDocument, SourceDocument, SynthOutcome},
};

pub fn synth(config: &HotConfig, files: &[PathBuf]) -> Result<()> {
    let synthesizer = ClassSynthesizer::from_config(config)?;
    let units = synthesize_files(&synthesizer, files)?;

    if units.is_empty() {
        log!("synth"; "nothing emitted (is the behind-code among the files?)");
        return Ok(());
    }

    let mut out = std::io::stdout().lock();
    for unit in &units {
        writeln!(out, "// {} v{} ({})", unit.full_name, unit.version, unit.type_name)?;
        writeln!(out, "{}", unit.source)?;
    }
    Ok(())
}

/// Apply each file as an edit; the last unit per view wins.
fn synthesize_files(synthesizer: &ClassSynthesizer, files: &[PathBuf]) -> Result<Vec<EmittedUnit>> {
    let mut order: Vec<String> = Vec::new();

    for file in files {
        let path = std::path::absolute(file)
            .with_context(|| format!("invalid path {}", file.display()))?;
        let Some(outcome) = apply(synthesizer, &path)? else {
            log!("synth"; "skipping {}", file.display());
            continue;
        };
        if let SynthOutcome::Rebuilt { full_name, .. } = outcome
            && !order.contains(&full_name)
        {
            order.push(full_name);
        }
    }

    Ok(order
        .iter()
        .filter_map(|name| synthesizer.take_rebuild(name))
        .collect())
}

fn apply(synthesizer: &ClassSynthesizer, path: &Path) -> Result<Option<SynthOutcome>> {
    let read_err = || format!("failed to read {}", path.display());
    if synthesizer.is_markup(path) {
        let doc = MarkupDocument::read(path).with_context(read_err)?;
        Ok(Some(synthesizer.on_markup_updated(&doc)?))
    } else if synthesizer.is_source(path) {
        let doc = SourceDocument::read(path).with_context(read_err)?;
        Ok(Some(synthesizer.on_source_updated(&doc)?))
    } else {
        Ok(None)
    }
}
