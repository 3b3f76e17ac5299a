//! Fixed-column coordinate files (PDB layout).
//!
//! Only three fields are interpreted: the record name, the residue identity and
//! the B-factor column that AlphaFold uses for pLDDT. Everything else on an atom
//! line is copied byte for byte.

use crate::aggregate::ResidueAggregates;
use crate::error::PipelineError;
use std::ops::Range;

/// Column layout of an `ATOM`/`HETATM` record (0-based, end-exclusive).
pub mod columns {
    use std::ops::Range;

    pub const RECORD_NAME: Range<usize> = 0..6;
    pub const CHAIN_ID: Range<usize> = 21..22;
    pub const RES_SEQ: Range<usize> = 22..26;
    pub const INSERTION_CODE: Range<usize> = 26..27;
    pub const B_FACTOR: Range<usize> = 60..66;
    /// Decimal places written into the B-factor field.
    pub const B_FACTOR_PRECISION: usize = 2;
}

const ATOM_RECORDS: [&str; 2] = ["ATOM", "HETATM"];

/// Prefix for rewritten structure files.
pub const REWRITTEN_PREFIX: &str = "AM_scores_";

pub fn is_atom_line(line: &str) -> bool {
    let name = line.get(columns::RECORD_NAME).unwrap_or(line).trim_end();
    ATOM_RECORDS.contains(&name)
}

fn field<'a>(line: &'a str, range: Range<usize>, line_no: usize, what: &str) -> Result<&'a str, PipelineError> {
    line.get(range.clone()).ok_or_else(|| {
        PipelineError::format_violation(
            line_no,
            format!(
                "line is {} bytes, too short for the {what} field (columns {}-{})",
                line.len(),
                range.start + 1,
                range.end
            ),
        )
    })
}

/// Residue sequence number of an atom line.
pub fn residue_seq_number(line: &str, line_no: usize) -> Result<i32, PipelineError> {
    let raw = field(line, columns::RES_SEQ, line_no, "residue sequence number")?;
    raw.trim().parse::<i32>().map_err(|_| {
        PipelineError::format_violation(line_no, format!("residue sequence number '{raw}' is not an integer"))
    })
}

/// The B-factor (pLDDT) value of an atom line.
pub fn b_factor(line: &str, line_no: usize) -> Result<f64, PipelineError> {
    let raw = field(line, columns::B_FACTOR, line_no, "B-factor")?;
    raw.trim().parse::<f64>().map_err(|_| {
        PipelineError::format_violation(line_no, format!("B-factor '{raw}' is not a number"))
    })
}

/// Right-justify `value` into the B-factor field, refusing to overflow it.
pub fn format_b_factor(value: f64, line_no: usize) -> Result<String, PipelineError> {
    let width = columns::B_FACTOR.len();
    let text = format!("{:>width$.prec$}", value, width = width, prec = columns::B_FACTOR_PRECISION);
    if text.len() > width {
        return Err(PipelineError::format_violation(
            line_no,
            format!("value {text} does not fit the {width}-column B-factor field"),
        ));
    }
    Ok(text)
}

/// Split a line from `split_inclusive('\n')` into its body and its terminator.
fn split_terminator(raw: &str) -> (&str, &str) {
    let body = match raw.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => raw,
    };
    (body, &raw[body.len()..])
}

/// A rewritten structure plus counts for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenStructure {
    /// Output lines, each with the terminator (`\n`, `\r\n` or none) it had on input.
    pub lines: Vec<String>,
    /// Atom lines whose B-factor now carries a residue aggregate.
    pub atoms_rewritten: usize,
    /// Atom lines kept as-is because their residue has no variants.
    pub atoms_unchanged: usize,
}

impl RewrittenStructure {
    pub fn to_text(&self) -> String {
        self.lines.concat()
    }
}

/// Replace each atom's B-factor with the mean pathogenicity of its residue.
///
/// Atoms of residues without an aggregate keep their original value. Lines other
/// than `ATOM`/`HETATM` pass through untouched. Any malformed atom line aborts
/// the whole rewrite so no partial structure is produced.
pub fn rewrite_structure(
    content: &str,
    aggregates: &ResidueAggregates,
) -> Result<RewrittenStructure, PipelineError> {
    let mut rewritten = RewrittenStructure {
        lines: Vec::new(),
        atoms_rewritten: 0,
        atoms_unchanged: 0,
    };

    for (index, raw) in content.split_inclusive('\n').enumerate() {
        let line_no = index + 1;
        let (line, terminator) = split_terminator(raw);
        if !is_atom_line(line) {
            rewritten.lines.push(raw.to_string());
            continue;
        }

        let residue = residue_seq_number(line, line_no)?;
        // Checked even when the residue has no aggregate: a truncated atom
        // line is still a broken file.
        field(line, columns::B_FACTOR, line_no, "B-factor")?;

        match aggregates.mean_for_residue(residue) {
            Some(mean) => {
                let value = format_b_factor(mean, line_no)?;
                let mut edited = String::with_capacity(raw.len());
                edited.push_str(&line[..columns::B_FACTOR.start]);
                edited.push_str(&value);
                edited.push_str(&line[columns::B_FACTOR.end..]);
                edited.push_str(terminator);
                rewritten.lines.push(edited);
                rewritten.atoms_rewritten += 1;
            }
            None => {
                rewritten.lines.push(raw.to_string());
                rewritten.atoms_unchanged += 1;
            }
        }
    }
    Ok(rewritten)
}

/// Confidence value of one residue, taken from its first atom.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidueConfidence {
    pub chain_id: char,
    pub residue_seq_number: i32,
    pub confidence: f64,
}

/// One entry per residue in file order.
///
/// A residue starts whenever the (chain, sequence number, insertion code)
/// triple changes between consecutive atom lines.
pub fn residue_confidences(content: &str) -> Result<Vec<ResidueConfidence>, PipelineError> {
    let mut residues = Vec::new();
    let mut current: Option<(String, i32, String)> = None;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        if !is_atom_line(line) {
            continue;
        }
        let chain = field(line, columns::CHAIN_ID, line_no, "chain identifier")?;
        let residue = residue_seq_number(line, line_no)?;
        let insertion = field(line, columns::INSERTION_CODE, line_no, "insertion code")?;

        let key = (chain.to_string(), residue, insertion.to_string());
        if current.as_ref() == Some(&key) {
            continue;
        }
        residues.push(ResidueConfidence {
            chain_id: chain.chars().next().unwrap_or(' '),
            residue_seq_number: residue,
            confidence: b_factor(line, line_no)?,
        });
        current = Some(key);
    }
    Ok(residues)
}
