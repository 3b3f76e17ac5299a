//! Tables handed to the plot renderer.

use crate::aggregate::{HeatmapRow, ResidueAggregates};
use crate::error::PipelineError;
use crate::structure::ResidueConfidence;
use std::io::Write;

/// Per-residue pairing of structure confidence and mean pathogenicity.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceSample {
    /// 1-based index of the residue in file order.
    pub position: usize,
    pub residue_seq_number: i32,
    pub original_confidence: f64,
    /// `None` when no variant was observed at this residue.
    pub mean_pathogenicity: Option<f64>,
}

impl ConfidenceSample {
    /// pLDDT rescaled from 0-100 to 0-1, matching the pathogenicity axis.
    pub fn rescaled_confidence(&self) -> f64 {
        self.original_confidence / 100.0
    }
}

/// Join structure residues with their aggregates.
pub fn confidence_samples(
    aggregates: &ResidueAggregates,
    residues: &[ResidueConfidence],
) -> Vec<ConfidenceSample> {
    residues
        .iter()
        .enumerate()
        .map(|(index, residue)| ConfidenceSample {
            position: index + 1,
            residue_seq_number: residue.residue_seq_number,
            original_confidence: residue.confidence,
            mean_pathogenicity: aggregates.mean_for_residue(residue.residue_seq_number),
        })
        .collect()
}

/// Long-form heatmap table, one row per variant.
pub fn write_heatmap_table<W: Write>(writer: W, rows: &[HeatmapRow]) -> Result<(), PipelineError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "reference_aa",
        "residue_number",
        "alternative_aa",
        "pathogenicity_score",
    ])?;
    for row in rows {
        wtr.write_record(&[
            row.reference_aa.to_string(),
            row.position.to_string(),
            row.alternative_aa.to_string(),
            row.pathogenicity_score.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Confidence-vs-pathogenicity table; absent aggregates are empty cells.
pub fn write_confidence_table<W: Write>(
    writer: W,
    samples: &[ConfidenceSample],
) -> Result<(), PipelineError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "position",
        "residue_number",
        "original_confidence",
        "confidence_rescaled",
        "mean_pathogenicity",
    ])?;
    for sample in samples {
        wtr.write_record(&[
            sample.position.to_string(),
            sample.residue_seq_number.to_string(),
            sample.original_confidence.to_string(),
            sample.rescaled_confidence().to_string(),
            sample.mean_pathogenicity.map(|m| m.to_string()).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
