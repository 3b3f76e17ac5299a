//! AlphaMissense variant tables.
//!
//! Two layouts are in circulation: the AlphaFold DB per-protein CSV
//! (`protein_variant,am_pathogenicity,am_class`) and the genome-build TSV files
//! (hg19/hg38), which open with `#` comment lines and a `#CHROM ...` header.
//! Both decode to the same [`VariantRecord`]. Rows that fail to decode are
//! skipped and reported, never fatal.

use crate::error::PipelineError;
use flate2::read::MultiGzDecoder;
use regex::Regex;
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::OnceLock;

const VARIANT_COLUMNS: [&str; 2] = ["protein_variant", "variant"];
const SCORE_COLUMNS: [&str; 2] = ["am_pathogenicity", "pathogenicity_score"];
const CLASS_COLUMNS: [&str; 2] = ["am_class", "classification"];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// AlphaMissense class label attached to a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    LikelyBenign,
    Ambiguous,
    LikelyPathogenic,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::LikelyBenign => "likely_benign",
            Classification::Ambiguous => "ambiguous",
            Classification::LikelyPathogenic => "likely_pathogenic",
        }
    }
}

impl FromStr for Classification {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "likely_benign" | "lben" => Ok(Classification::LikelyBenign),
            "ambiguous" | "amb" => Ok(Classification::Ambiguous),
            "likely_pathogenic" | "lpath" => Ok(Classification::LikelyPathogenic),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One amino-acid substitution with its pathogenicity score.
///
/// The score is kept as read; values outside `[0, 1]` are data, not clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub reference_aa: char,
    pub position: u32,
    pub alternative_aa: char,
    pub pathogenicity_score: f64,
    pub classification: Option<Classification>,
}

impl VariantRecord {
    /// Rebuild the `<Ref><Position><Alt>` code, e.g. `M1A`.
    pub fn variant_code(&self) -> String {
        format!("{}{}{}", self.reference_aa, self.position, self.alternative_aa)
    }
}

fn variant_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Z])([1-9][0-9]*)([A-Z])$").expect("variant code pattern is valid")
    })
}

/// Split a variant code such as `K2A` into reference, position and alternative.
///
/// Positions are 1-based; `0` and zero-padded numbers are rejected so that
/// [`VariantRecord::variant_code`] reproduces the input exactly.
pub fn parse_variant_code(code: &str) -> Option<(char, u32, char)> {
    let caps = variant_code_pattern().captures(code)?;
    let reference = caps[1].chars().next()?;
    let position = caps[2].parse::<u32>().ok()?;
    let alternative = caps[3].chars().next()?;
    Some((reference, position, alternative))
}

/// Result of decoding a table: the records plus one `MalformedRecord` per skipped row.
#[derive(Debug, Default)]
pub struct ParsedTable {
    pub records: Vec<VariantRecord>,
    pub skipped: Vec<PipelineError>,
}

impl ParsedTable {
    pub fn skip_count(&self) -> usize {
        self.skipped.len()
    }
}

struct Columns {
    variant: usize,
    score: usize,
    class: Option<usize>,
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

fn is_header_line(line: &str) -> bool {
    let stripped = line.trim_start_matches('#');
    stripped
        .split(&['\t', ','][..])
        .any(|h| VARIANT_COLUMNS.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
}

fn decode_bytes(name: &str, bytes: &[u8]) -> Result<String, PipelineError> {
    let raw = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        MultiGzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| PipelineError::unavailable(name, format!("cannot decompress table: {e}")))?;
        out
    } else {
        bytes.to_vec()
    };
    String::from_utf8(raw).map_err(|e| PipelineError::unavailable(name, format!("table is not UTF-8: {e}")))
}

/// Decode the variant table `name` (plain or gzipped, comma- or tab-delimited).
///
/// Errors with `SourceUnavailable` only when the table as a whole is unusable:
/// undecodable bytes or a header without variant and score columns. Row
/// problems land in [`ParsedTable::skipped`].
pub fn parse_variant_table(name: &str, bytes: &[u8]) -> Result<ParsedTable, PipelineError> {
    let text = decode_bytes(name, bytes)?;

    // Locate the header, skipping the comment block of the genome-build files.
    let mut offset = 0;
    let mut header_index = None;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && (!trimmed.starts_with('#') || is_header_line(trimmed)) {
            header_index = Some(index);
            break;
        }
        offset += line.len();
    }
    let header_index =
        header_index.ok_or_else(|| PipelineError::unavailable(name, "table has no header row"))?;
    let body = text[offset..].trim_start_matches('#');
    let header_line = body.lines().next().unwrap_or("");
    let delimiter = if header_line.contains('\t') { b'\t' } else { b',' };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::unavailable(name, format!("unreadable header: {e}")))?
        .clone();
    let header_line_no = header_index + 1;
    let columns = Columns {
        variant: find_column(&headers, &VARIANT_COLUMNS).ok_or_else(|| {
            PipelineError::unavailable(name, format!("header on line {header_line_no} has no variant column"))
        })?,
        score: find_column(&headers, &SCORE_COLUMNS).ok_or_else(|| {
            PipelineError::unavailable(
                name,
                format!("header on line {header_line_no} has no pathogenicity score column"),
            )
        })?,
        class: find_column(&headers, &CLASS_COLUMNS),
    };

    let mut table = ParsedTable::default();
    for result in reader.records() {
        match result {
            Ok(row) => {
                let line = row
                    .position()
                    .map(|p| header_index + p.line() as usize)
                    .unwrap_or(0);
                match decode_row(&row, &columns) {
                    Ok(record) => table.records.push(record),
                    Err(reason) => table.skipped.push(PipelineError::malformed(line, reason)),
                }
            }
            Err(e) => {
                let line = e
                    .position()
                    .map(|p| header_index + p.line() as usize)
                    .unwrap_or(0);
                table.skipped.push(PipelineError::malformed(line, e.to_string()));
            }
        }
    }
    Ok(table)
}

fn decode_row(row: &csv::StringRecord, columns: &Columns) -> Result<VariantRecord, String> {
    let code = row
        .get(columns.variant)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("missing variant code")?;
    let (reference_aa, position, alternative_aa) =
        parse_variant_code(code).ok_or_else(|| format!("invalid variant code '{code}'"))?;

    let raw_score = row
        .get(columns.score)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("missing pathogenicity score")?;
    let pathogenicity_score = raw_score
        .parse::<f64>()
        .map_err(|_| format!("non-numeric pathogenicity score '{raw_score}'"))?;
    if !pathogenicity_score.is_finite() {
        return Err(format!("non-finite pathogenicity score '{raw_score}'"));
    }

    let classification = columns
        .class
        .and_then(|i| row.get(i))
        .and_then(|s| s.parse::<Classification>().ok());

    Ok(VariantRecord {
        reference_aa,
        position,
        alternative_aa,
        pathogenicity_score,
        classification,
    })
}
