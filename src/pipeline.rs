//! Per-protein pipeline and the batch runner around it.

use crate::aggregate::{heatmap_axes, heatmap_rows, ResidueAggregates};
use crate::dataset::{confidence_samples, write_confidence_table, write_heatmap_table};
use crate::error::PipelineError;
use crate::logger::{progress_bar, Logger, COUNT_TEMPLATE};
use crate::source::DataSource;
use crate::structure::{residue_confidences, rewrite_structure, REWRITTEN_PREFIX};
use crate::variant::parse_variant_table;
use rayon::prelude::*;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Prefix of the long-form heatmap table.
pub const HEATMAP_PREFIX: &str = "heatmap_";
/// Prefix of the pLDDT comparison table.
pub const CONFIDENCE_PREFIX: &str = "plddt_am_";

/// Outcome of one protein's run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProteinReport {
    pub identifier: String,
    pub variants: usize,
    pub skipped_rows: usize,
    pub residues_with_scores: usize,
    pub atoms_rewritten: usize,
    pub atoms_unchanged: usize,
    pub outputs: Vec<PathBuf>,
}

/// Split an identifier file on commas and whitespace.
///
/// Repeated accessions are dropped; the first occurrence keeps its place.
pub fn parse_identifiers(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

/// `heatmap_<table stem>.csv`, dropping a `.gz` suffix and the table's own extension.
///
/// The prefix keeps the output from ever replacing the table it was read from.
pub fn heatmap_table_name(variant_table_name: &str) -> String {
    let name = variant_table_name.strip_suffix(".gz").unwrap_or(variant_table_name);
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("variants");
    format!("{HEATMAP_PREFIX}{stem}.csv")
}

pub fn rewritten_structure_name(structure_name: &str) -> String {
    format!("{REWRITTEN_PREFIX}{structure_name}")
}

pub fn confidence_table_name(identifier: &str) -> String {
    format!("{CONFIDENCE_PREFIX}{identifier}.csv")
}

/// Write to a uniquely named temp file next to `path`, then rename it into place.
///
/// Concurrent writers of the same path each get their own temp file; the last
/// rename wins and readers only ever see a complete file.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), PipelineError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Fetch, parse, aggregate, rewrite and tabulate one protein.
///
/// All outputs are built in memory first; nothing is written to `output_dir`
/// unless every step succeeded. `output_dir` must already exist.
pub fn process_protein(
    identifier: &str,
    source: &dyn DataSource,
    output_dir: &Path,
    logger: &Logger,
) -> Result<ProteinReport, PipelineError> {
    logger.step(&format!("Processing {identifier}"));

    let inputs = source.fetch(identifier, logger).map_err(|e| match e {
        PipelineError::SourceUnavailable { .. } => e,
        other => PipelineError::unavailable(identifier, other.to_string()),
    })?;

    let table = parse_variant_table(&inputs.variant_table_name, &inputs.variant_table).map_err(|e| match e {
        PipelineError::SourceUnavailable { reason, .. } => {
            PipelineError::unavailable(identifier, format!("{}: {reason}", inputs.variant_table_name))
        }
        other => PipelineError::unavailable(identifier, format!("{}: {other}", inputs.variant_table_name)),
    })?;
    logger.info(&format!(
        "Parsed {} variants from {} ({} rows skipped)",
        table.records.len(),
        inputs.variant_table_name,
        table.skip_count()
    ));
    if let Some(first) = table.skipped.first() {
        logger.info(&format!("First skipped row: {first}"));
    }
    if table.records.is_empty() {
        return Err(PipelineError::unavailable(
            identifier,
            format!("{} contains no usable variant records", inputs.variant_table_name),
        ));
    }

    let aggregates = ResidueAggregates::from_records(&table.records);
    let rows = heatmap_rows(&table.records);
    let axes = heatmap_axes(&rows);
    logger.info(&format!(
        "Averaged scores for {} residues (heatmap {} x {})",
        aggregates.len(),
        axes.residues.len(),
        axes.substitutions.len()
    ));

    let structure = String::from_utf8(inputs.structure).map_err(|e| {
        PipelineError::format_violation(0, format!("{} is not UTF-8: {e}", inputs.structure_name))
    })?;
    let rewritten = rewrite_structure(&structure, &aggregates)?;
    let samples = confidence_samples(&aggregates, &residue_confidences(&structure)?);
    logger.info(&format!(
        "Rewrote {} atoms, left {} atoms without variants unchanged",
        rewritten.atoms_rewritten, rewritten.atoms_unchanged
    ));

    let mut heatmap_csv = Vec::new();
    write_heatmap_table(&mut heatmap_csv, &rows)?;
    let mut confidence_csv = Vec::new();
    write_confidence_table(&mut confidence_csv, &samples)?;

    let outputs = vec![
        (output_dir.join(heatmap_table_name(&inputs.variant_table_name)), heatmap_csv),
        (
            output_dir.join(rewritten_structure_name(&inputs.structure_name)),
            rewritten.to_text().into_bytes(),
        ),
        (output_dir.join(confidence_table_name(identifier)), confidence_csv),
    ];
    let mut written = Vec::with_capacity(outputs.len());
    for (path, contents) in outputs {
        write_atomically(&path, &contents)?;
        logger.info(&format!("Wrote {}", path.display()));
        written.push(path);
    }

    Ok(ProteinReport {
        identifier: identifier.to_string(),
        variants: table.records.len(),
        skipped_rows: table.skip_count(),
        residues_with_scores: aggregates.len(),
        atoms_rewritten: rewritten.atoms_rewritten,
        atoms_unchanged: rewritten.atoms_unchanged,
        outputs: written,
    })
}

/// Per-identifier results of a batch, in input order.
#[derive(Debug)]
pub struct BatchSummary {
    pub results: Vec<(String, Result<ProteinReport, PipelineError>)>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Plain-text report in the style of the run statistics file.
    pub fn write_report<W: Write>(&self, mut out: W, settings: &[(&str, String)]) -> std::io::Result<()> {
        writeln!(out, "=== AlphaMissense Structure Mapper: Batch Report ===")?;
        writeln!(out, "\n=== Settings ===")?;
        for (name, value) in settings {
            writeln!(out, "{name}: {value}")?;
        }

        writeln!(out, "\n=== Results ===")?;
        writeln!(out, "Proteins Requested: {}", self.results.len())?;
        writeln!(out, "Proteins Succeeded: {}", self.succeeded())?;
        writeln!(out, "Proteins Failed: {}", self.failed())?;

        writeln!(out, "\n=== Per Protein ===")?;
        for (identifier, result) in &self.results {
            match result {
                Ok(report) => writeln!(
                    out,
                    "{identifier}: ok ({} variants, {} skipped rows, {} residues scored, {} atoms rewritten)",
                    report.variants, report.skipped_rows, report.residues_with_scores, report.atoms_rewritten
                )?,
                Err(e) => writeln!(out, "{identifier}: FAILED ({e})")?,
            }
        }
        Ok(())
    }
}

/// Run every identifier, continuing past per-protein failures.
///
/// With `jobs > 1` proteins are processed on a rayon pool; results keep input order.
pub fn run_batch(
    identifiers: &[String],
    source: &dyn DataSource,
    output_dir: &Path,
    logger: &Logger,
    jobs: usize,
) -> BatchSummary {
    let pb = progress_bar(identifiers.len() as u64, COUNT_TEMPLATE);
    let run_one = |identifier: &String| {
        let result = process_protein(identifier, source, output_dir, logger);
        if let Err(e) = &result {
            logger.error(&format!("{identifier}: {e}"));
        }
        pb.inc(1);
        (identifier.clone(), result)
    };

    let results: Vec<(String, Result<ProteinReport, PipelineError>)> = if jobs > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(|| identifiers.par_iter().map(run_one).collect()),
            Err(e) => {
                logger.error(&format!("Could not start {jobs} worker threads ({e}); running sequentially"));
                identifiers.iter().map(run_one).collect()
            }
        }
    } else {
        identifiers.iter().map(run_one).collect()
    };
    pb.finish_with_message("Batch complete.");

    BatchSummary { results }
}
