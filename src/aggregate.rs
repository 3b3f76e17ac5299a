//! Per-residue reduction of variant scores, and the long-form heatmap table.

use crate::variant::VariantRecord;
use std::collections::BTreeMap;

/// Canonical amino-acid order for heatmap columns.
pub const AMINO_ACID_ORDER: &str = "ACDEFGHIKLMNPQRSTVWY";

/// Mean pathogenicity of every variant observed at one residue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResidueAggregate {
    pub position: u32,
    pub mean_pathogenicity: f64,
    pub variant_count: usize,
}

/// Aggregates keyed by residue position.
///
/// Positions without variants are absent; there is no zero default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResidueAggregates {
    by_position: BTreeMap<u32, ResidueAggregate>,
}

impl ResidueAggregates {
    /// Group records by position and average their scores in a single pass.
    ///
    /// Duplicate `(position, alternative)` entries each contribute to the mean.
    pub fn from_records(records: &[VariantRecord]) -> Self {
        let mut sums: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
        for record in records {
            let entry = sums.entry(record.position).or_insert((0.0, 0));
            entry.0 += record.pathogenicity_score;
            entry.1 += 1;
        }

        let by_position = sums
            .into_iter()
            .map(|(position, (sum, count))| {
                (
                    position,
                    ResidueAggregate {
                        position,
                        mean_pathogenicity: sum / count as f64,
                        variant_count: count,
                    },
                )
            })
            .collect();
        Self { by_position }
    }

    pub fn get(&self, position: u32) -> Option<&ResidueAggregate> {
        self.by_position.get(&position)
    }

    /// Look up a residue number as it appears in a structure file, which may be
    /// zero or negative.
    pub fn mean_for_residue(&self, residue_seq_number: i32) -> Option<f64> {
        let position = u32::try_from(residue_seq_number).ok()?;
        self.get(position).map(|a| a.mean_pathogenicity)
    }

    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }

    /// Aggregates in ascending position order.
    pub fn iter(&self) -> impl Iterator<Item = &ResidueAggregate> {
        self.by_position.values()
    }
}

/// One row of the heatmap table: a single substitution and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapRow {
    pub reference_aa: char,
    pub position: u32,
    pub alternative_aa: char,
    pub pathogenicity_score: f64,
}

impl HeatmapRow {
    /// Row label used on the heatmap's residue axis, e.g. `M1`.
    pub fn residue_label(&self) -> String {
        format!("{}{}", self.reference_aa, self.position)
    }
}

/// Sort key for alternative amino acids: canonical letters first, then any
/// other letter alphabetically.
fn amino_acid_rank(aa: char) -> (usize, char) {
    match AMINO_ACID_ORDER.find(aa) {
        Some(index) => (index, aa),
        None => (AMINO_ACID_ORDER.len(), aa),
    }
}

/// Reshape records into the long-form table: ascending position, then
/// canonical amino-acid order. Ties (duplicate entries) keep input order.
pub fn heatmap_rows(records: &[VariantRecord]) -> Vec<HeatmapRow> {
    let mut rows: Vec<HeatmapRow> = records
        .iter()
        .map(|r| HeatmapRow {
            reference_aa: r.reference_aa,
            position: r.position,
            alternative_aa: r.alternative_aa,
            pathogenicity_score: r.pathogenicity_score,
        })
        .collect();
    rows.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| amino_acid_rank(a.alternative_aa).cmp(&amino_acid_rank(b.alternative_aa)))
    });
    rows
}

/// Axis labels a renderer pivots the long-form table on.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapAxes {
    /// `<Ref><Position>` labels in ascending position.
    pub residues: Vec<String>,
    /// Alternative amino acids in canonical order.
    pub substitutions: Vec<char>,
}

pub fn heatmap_axes(rows: &[HeatmapRow]) -> HeatmapAxes {
    let mut residues: BTreeMap<u32, String> = BTreeMap::new();
    let mut substitutions: Vec<char> = Vec::new();
    for row in rows {
        residues.entry(row.position).or_insert_with(|| row.residue_label());
        if !substitutions.contains(&row.alternative_aa) {
            substitutions.push(row.alternative_aa);
        }
    }
    substitutions.sort_by_key(|aa| amino_acid_rank(*aa));
    HeatmapAxes {
        residues: residues.into_values().collect(),
        substitutions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, score: f64) -> VariantRecord {
        let (reference_aa, position, alternative_aa) =
            crate::variant::parse_variant_code(code).expect("valid code");
        VariantRecord {
            reference_aa,
            position,
            alternative_aa,
            pathogenicity_score: score,
            classification: None,
        }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn averages_scores_per_position() {
        let records = vec![record("M1A", 0.9), record("M1C", 0.7), record("K2A", 0.2)];
        let aggregates = ResidueAggregates::from_records(&records);
        assert_eq!(aggregates.len(), 2);
        assert_close(aggregates.get(1).expect("pos 1").mean_pathogenicity, 0.8);
        assert_close(aggregates.get(2).expect("pos 2").mean_pathogenicity, 0.2);
        assert_eq!(aggregates.get(1).expect("pos 1").variant_count, 2);
        assert!(aggregates.get(3).is_none());
    }

    #[test]
    fn duplicate_substitutions_both_count() {
        let records = vec![record("M1A", 0.9), record("M1A", 0.3), record("M1C", 0.6)];
        let aggregates = ResidueAggregates::from_records(&records);
        let aggregate = aggregates.get(1).expect("pos 1");
        assert_eq!(aggregate.variant_count, 3);
        assert_close(aggregate.mean_pathogenicity, (0.9 + 0.3 + 0.6) / 3.0);
    }

    #[test]
    fn structure_residue_lookup_ignores_non_positive_numbers() {
        let aggregates = ResidueAggregates::from_records(&[record("M1A", 0.4)]);
        assert_eq!(aggregates.mean_for_residue(1), Some(0.4));
        assert_eq!(aggregates.mean_for_residue(0), None);
        assert_eq!(aggregates.mean_for_residue(-3), None);
    }

    #[test]
    fn heatmap_rows_follow_position_then_canonical_order() {
        let records = vec![
            record("K2Y", 0.1),
            record("M1W", 0.2),
            record("K2A", 0.3),
            record("M1C", 0.4),
            record("M1A", 0.5),
            record("M1X", 0.6),
        ];
        let rows = heatmap_rows(&records);
        let order: Vec<String> = rows
            .iter()
            .map(|r| format!("{}{}", r.residue_label(), r.alternative_aa))
            .collect();
        assert_eq!(order, ["M1A", "M1C", "M1W", "M1X", "K2A", "K2Y"]);

        let mut shuffled = records.clone();
        shuffled.reverse();
        assert_eq!(heatmap_rows(&shuffled), rows);
    }

    #[test]
    fn axes_list_residues_and_substitutions() {
        let records = vec![record("K2Y", 0.1), record("M1C", 0.2), record("M1A", 0.3)];
        let axes = heatmap_axes(&heatmap_rows(&records));
        assert_eq!(axes.residues, ["M1", "K2"]);
        assert_eq!(axes.substitutions, ['A', 'C', 'Y']);
    }
}
