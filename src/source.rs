//! Where the two inputs of a protein come from.
//!
//! The pipeline only sees the [`DataSource`] trait, so the core runs the same
//! against the AlphaFold DB, a directory of earlier downloads, or in-memory
//! fixtures. Retries live here and nowhere else.

use crate::error::PipelineError;
use crate::logger::{progress_bar, Logger, BYTES_TEMPLATE};
use crate::pipeline::{write_atomically, CONFIDENCE_PREFIX, HEATMAP_PREFIX};
use crate::structure::REWRITTEN_PREFIX;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://alphafold.ebi.ac.uk/api/prediction";

const TABLE_SUFFIXES: [&str; 4] = [".csv", ".tsv", ".csv.gz", ".tsv.gz"];

/// Files this crate writes; never picked up as inputs.
const DERIVED_PREFIXES: [&str; 3] = [REWRITTEN_PREFIX, HEATMAP_PREFIX, CONFIDENCE_PREFIX];

/// Raw bytes of one protein's variant table and structure file.
#[derive(Debug, Clone)]
pub struct ProteinInputs {
    pub variant_table_name: String,
    pub variant_table: Vec<u8>,
    pub structure_name: String,
    pub structure: Vec<u8>,
}

impl ProteinInputs {
    /// Store both files under their own names in `dir`, where a [`LocalSource`]
    /// finds them again.
    pub fn save_to(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        let files = [
            (&self.variant_table_name, &self.variant_table),
            (&self.structure_name, &self.structure),
        ];
        let mut saved = Vec::with_capacity(files.len());
        for (name, contents) in files {
            let path = dir.join(name);
            write_atomically(&path, contents)?;
            saved.push(path);
        }
        Ok(saved)
    }
}

/// Capability to fetch a protein's inputs by accession.
pub trait DataSource: Sync {
    fn fetch(&self, identifier: &str, logger: &Logger) -> Result<ProteinInputs, PipelineError>;
}

/// Which AlphaMissense table to request from the AlphaFold DB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnotationSet {
    #[default]
    Default,
    Hg19,
    Hg38,
}

impl FromStr for AnnotationSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(AnnotationSet::Default),
            "hg19" | "grch37" => Ok(AnnotationSet::Hg19),
            "hg38" | "grch38" => Ok(AnnotationSet::Hg38),
            other => Err(format!("unknown annotation set '{other}' (expected default, hg19 or hg38)")),
        }
    }
}

impl fmt::Display for AnnotationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationSet::Default => write!(f, "default"),
            AnnotationSet::Hg19 => write!(f, "hg19"),
            AnnotationSet::Hg38 => write!(f, "hg38"),
        }
    }
}

impl AnnotationSet {
    const ALL: [AnnotationSet; 3] = [AnnotationSet::Default, AnnotationSet::Hg19, AnnotationSet::Hg38];

    /// Whether a local table file name belongs to this set.
    fn matches_table_name(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        match self {
            AnnotationSet::Default => !name.contains("hg19") && !name.contains("hg38"),
            AnnotationSet::Hg19 => name.contains("hg19"),
            AnnotationSet::Hg38 => name.contains("hg38"),
        }
    }
}

/// The fields used from one AlphaFold DB prediction entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictionEntry {
    pdb_url: Option<String>,
    cif_url: Option<String>,
    pae_image_url: Option<String>,
    am_annotations_url: Option<String>,
    am_annotations_hg19_url: Option<String>,
    am_annotations_hg38_url: Option<String>,
}

impl PredictionEntry {
    fn annotations_url(&self, annotations: AnnotationSet) -> Option<&str> {
        let url = match annotations {
            AnnotationSet::Default => &self.am_annotations_url,
            AnnotationSet::Hg19 => &self.am_annotations_hg19_url,
            AnnotationSet::Hg38 => &self.am_annotations_hg38_url,
        };
        url.as_deref().filter(|u| u.starts_with("http"))
    }
}

/// First entry of a prediction response.
fn first_entry(body: &[u8], identifier: &str) -> Result<PredictionEntry, PipelineError> {
    let entries: Vec<PredictionEntry> = serde_json::from_slice(body)?;
    entries
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::unavailable(identifier, "API returned no predictions"))
}

/// Pick the (variant table, structure) URLs out of a prediction entry.
fn select_urls(
    entry: &PredictionEntry,
    identifier: &str,
    annotations: AnnotationSet,
) -> Result<(String, String), PipelineError> {
    let table_url = entry.annotations_url(annotations).ok_or_else(|| {
        PipelineError::unavailable(identifier, format!("no AlphaMissense ({annotations}) data"))
    })?;
    let pdb_url = entry
        .pdb_url
        .as_deref()
        .filter(|u| u.starts_with("http"))
        .ok_or_else(|| PipelineError::unavailable(identifier, "no PDB URL"))?;
    Ok((table_url.to_string(), pdb_url.to_string()))
}

/// Everything else worth keeping next to the inputs: the mmCIF model, the PAE
/// image and the AlphaMissense tables of the other annotation sets.
fn extra_urls(entry: &PredictionEntry, annotations: AnnotationSet) -> Vec<String> {
    let mut urls: Vec<&str> = [&entry.cif_url, &entry.pae_image_url]
        .into_iter()
        .filter_map(|u| u.as_deref())
        .filter(|u| u.starts_with("http"))
        .collect();
    urls.extend(
        AnnotationSet::ALL
            .into_iter()
            .filter(|set| *set != annotations)
            .filter_map(|set| entry.annotations_url(set)),
    );
    urls.into_iter().map(str::to_string).collect()
}

fn file_name_from_url(url: &str) -> String {
    let path = url.split(&['?', '#'][..]).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Retry/backoff settings for HTTP requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: the n-th retry waits `n * delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.delay * attempt
    }

    /// Wait before retrying after an unsuccessful `status` on `attempt`, or
    /// `None` to give up.
    ///
    /// Only 429 and 5xx are retried. A `Retry-After` header in seconds takes
    /// precedence over the backoff.
    pub fn wait_after_status(
        &self,
        status: StatusCode,
        retry_after: Option<&str>,
        attempt: u32,
    ) -> Option<Duration> {
        let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        if !retryable || attempt >= self.max_attempts {
            return None;
        }
        let wait = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.backoff(attempt));
        Some(wait)
    }

    /// Wait before retrying after a transport error on `attempt`, or `None` to give up.
    pub fn wait_after_error(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then(|| self.backoff(attempt))
    }
}

/// Fetches predictions and files from the AlphaFold DB.
pub struct AlphaFoldSource {
    client: Client,
    api_base: String,
    annotations: AnnotationSet,
    retry: RetryPolicy,
}

impl AlphaFoldSource {
    pub fn new(
        api_base: &str,
        annotations: AnnotationSet,
        retry: RetryPolicy,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .user_agent(concat!("am-mapper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            annotations,
            retry,
        })
    }

    fn get_with_retry(&self, url: &str, logger: &Logger) -> Result<Response, PipelineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok());
                    let Some(wait) = self.retry.wait_after_status(status, retry_after, attempt) else {
                        return Err(PipelineError::unavailable(
                            url,
                            format!("HTTP {status} after {attempt} attempt(s)"),
                        ));
                    };
                    logger.info(&format!(
                        "HTTP {status} from {url}; retrying in {}s",
                        wait.as_secs()
                    ));
                    thread::sleep(wait);
                }
                Err(e) => {
                    let Some(wait) = self.retry.wait_after_error(attempt) else {
                        return Err(PipelineError::Http(e));
                    };
                    logger.info(&format!("Request to {url} failed ({e}); retrying in {}s", wait.as_secs()));
                    thread::sleep(wait);
                }
            }
        }
    }

    fn prediction(&self, identifier: &str, logger: &Logger) -> Result<PredictionEntry, PipelineError> {
        let api_url = format!("{}/{}", self.api_base, identifier);
        logger.info(&format!("Fetching AlphaFold DB entry for {identifier}"));
        let body = self.get_with_retry(&api_url, logger)?.bytes()?;
        first_entry(&body, identifier)
    }

    fn fetch_entry(
        &self,
        identifier: &str,
        entry: &PredictionEntry,
        logger: &Logger,
    ) -> Result<ProteinInputs, PipelineError> {
        let (table_url, pdb_url) = select_urls(entry, identifier, self.annotations)?;
        let variant_table = self.download(&table_url, logger)?;
        let structure = self.download(&pdb_url, logger)?;
        Ok(ProteinInputs {
            variant_table_name: file_name_from_url(&table_url),
            variant_table,
            structure_name: file_name_from_url(&pdb_url),
            structure,
        })
    }

    /// Download one protein's files into `dir` for later runs with a [`LocalSource`].
    ///
    /// With `include_extras` the mmCIF model, the PAE image and the other
    /// AlphaMissense tables are saved as well, when the entry lists them.
    pub fn download_entry(
        &self,
        identifier: &str,
        dir: &Path,
        include_extras: bool,
        logger: &Logger,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let entry = self.prediction(identifier, logger)?;
        let mut saved = self.fetch_entry(identifier, &entry, logger)?.save_to(dir)?;
        if include_extras {
            for url in extra_urls(&entry, self.annotations) {
                let path = dir.join(file_name_from_url(&url));
                write_atomically(&path, &self.download(&url, logger)?)?;
                saved.push(path);
            }
        }
        for path in &saved {
            logger.info(&format!("Saved {}", path.display()));
        }
        Ok(saved)
    }

    fn download(&self, url: &str, logger: &Logger) -> Result<Vec<u8>, PipelineError> {
        logger.info(&format!("Starting download from {url}"));
        let mut response = self.get_with_retry(url, logger)?;
        let total_size = response.content_length().unwrap_or(0);
        let pb = progress_bar(total_size, BYTES_TEMPLATE);

        let mut data = Vec::with_capacity(total_size as usize);
        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = response.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            data.extend_from_slice(&buffer[..bytes_read]);
            pb.set_position(data.len() as u64);
        }
        pb.finish_with_message("Download complete");
        Ok(data)
    }
}

impl DataSource for AlphaFoldSource {
    fn fetch(&self, identifier: &str, logger: &Logger) -> Result<ProteinInputs, PipelineError> {
        let entry = self.prediction(identifier, logger)?;
        self.fetch_entry(identifier, &entry, logger)
    }
}

/// True when `identifier` occurs in `name` as a whole token, bounded by `-`,
/// `_`, `.` or the ends of the name. `A0A023` does not match `AF-A0A023GPI8-F1`.
fn names_accession(name: &str, identifier: &str) -> bool {
    let is_boundary = |c: Option<char>| c.map_or(true, |c| matches!(c, '-' | '_' | '.'));
    !identifier.is_empty()
        && name.match_indices(identifier).any(|(start, _)| {
            is_boundary(name[..start].chars().next_back())
                && is_boundary(name[start + identifier.len()..].chars().next())
        })
}

/// Reads inputs from a directory of previously downloaded files.
///
/// Files are matched by accession token in their name; the structure is the
/// `.pdb` file and the variant table the `.csv`/`.tsv` (optionally gzipped)
/// file of the requested annotation set. Outputs of earlier runs are ignored,
/// so the directory may double as the output directory.
pub struct LocalSource {
    dir: PathBuf,
    annotations: AnnotationSet,
}

impl LocalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            annotations: AnnotationSet::Default,
        }
    }

    pub fn with_annotations(mut self, annotations: AnnotationSet) -> Self {
        self.annotations = annotations;
        self
    }
}

impl DataSource for LocalSource {
    fn fetch(&self, identifier: &str, logger: &Logger) -> Result<ProteinInputs, PipelineError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            PipelineError::unavailable(identifier, format!("cannot read {}: {e}", self.dir.display()))
        })?;
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| names_accession(name, identifier))
            .filter(|name| !DERIVED_PREFIXES.iter().any(|p| name.starts_with(p)))
            .collect();
        names.sort();

        let structure_name = names
            .iter()
            .find(|n| n.ends_with(".pdb"))
            .cloned()
            .ok_or_else(|| PipelineError::unavailable(identifier, "no structure file found"))?;
        let tables: Vec<&String> = names
            .iter()
            .filter(|n| TABLE_SUFFIXES.iter().any(|s| n.ends_with(s)))
            .collect();
        // The default set falls back to any table; genome builds must match.
        let variant_table_name = tables
            .iter()
            .find(|n| self.annotations.matches_table_name(n))
            .or_else(|| match self.annotations {
                AnnotationSet::Default => tables.first(),
                _ => None,
            })
            .map(|n| n.to_string())
            .ok_or_else(|| {
                PipelineError::unavailable(
                    identifier,
                    format!("no variant table found for annotation set {}", self.annotations),
                )
            })?;

        logger.info(&format!(
            "Found local files {variant_table_name} and {structure_name}"
        ));
        Ok(ProteinInputs {
            variant_table: fs::read(self.dir.join(&variant_table_name))?,
            variant_table_name,
            structure: fs::read(self.dir.join(&structure_name))?,
            structure_name,
        })
    }
}
