use am_structure_mapper::logger::Logger;
use am_structure_mapper::pipeline::{parse_identifiers, run_batch};
use am_structure_mapper::source::{
    AlphaFoldSource, AnnotationSet, DataSource, LocalSource, RetryPolicy, DEFAULT_API_BASE,
};
use chrono::prelude::*;
use clap::{Parser, ValueEnum};
use std::error::Error;
use std::fs::{self, File};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    /// Query the AlphaFold DB API and download the files
    Alphafold,
    /// Read previously downloaded files from --local-dir
    Local,
}

/// Command-line arguments
#[derive(Parser)]
#[command(
    name = "am-mapper",
    about = "Write AlphaMissense average pathogenicity into AlphaFold structures and prepare plot tables"
)]
struct Args {
    /// Text file of UniProt accessions separated by commas or whitespace
    #[arg(value_name = "FILE")]
    ids: PathBuf,

    /// Directory for rewritten structures and plot tables
    #[arg(short, long, default_value = "data_output")]
    output_dir: PathBuf,

    /// Where protein inputs come from
    #[arg(long, value_enum, default_value_t = SourceKind::Alphafold)]
    source: SourceKind,

    /// Directory searched by the local source and filled by --download-only
    #[arg(long, default_value = "downloaded_files")]
    local_dir: PathBuf,

    /// Only download each protein's files from the AlphaFold DB into --local-dir
    #[arg(long)]
    download_only: bool,

    /// With --download-only, also save the mmCIF model, PAE image and other AlphaMissense tables
    #[arg(long, requires = "download_only")]
    extra_files: bool,

    /// AlphaMissense table to use: "default", "hg19" or "hg38"
    #[arg(short, long, default_value = "default")]
    annotations: AnnotationSet,

    /// AlphaFold DB prediction endpoint
    #[arg(long, default_value = DEFAULT_API_BASE)]
    api_base: String,

    /// Attempts per HTTP request before giving up on a protein
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Base delay between HTTP retries, multiplied by the attempt number
    #[arg(long, default_value_t = 5)]
    retry_delay_secs: u64,

    /// Proteins processed in parallel (0 = one per CPU core)
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Log file (appended to)
    #[arg(long, default_value = "am_mapper.log")]
    log_file: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let logger = Logger::open(&args.log_file)?;

    logger.setting("=== AlphaMissense Structure Mapper ===");
    let now: DateTime<Utc> = Utc::now();
    logger.setting(&format!("Timestamp: {}", now.to_rfc3339()));

    let jobs = if args.jobs == 0 { num_cpus::get() } else { args.jobs };
    let source_label = match args.source {
        SourceKind::Alphafold => format!("AlphaFold DB ({})", args.api_base),
        SourceKind::Local => format!("local directory {}", args.local_dir.display()),
    };
    logger.setting(&format!("Identifier File: {}", args.ids.display()));
    logger.setting(&format!("Output Directory: {}", args.output_dir.display()));
    logger.setting(&format!("Source: {source_label}"));
    logger.setting(&format!("Annotations: {}", args.annotations));
    logger.setting(&format!("Parallel Jobs: {jobs}"));

    logger.step("Checking arguments...");
    if !args.ids.exists() {
        return Err(format!("Identifier file not found: {}", args.ids.display()).into());
    }
    let identifiers = parse_identifiers(&fs::read_to_string(&args.ids)?);
    if identifiers.is_empty() {
        return Err(format!("No identifiers found in {}", args.ids.display()).into());
    }
    logger.info(&format!("Read {} identifiers", identifiers.len()));

    let retry = RetryPolicy {
        max_attempts: args.max_attempts.max(1),
        delay: Duration::from_secs(args.retry_delay_secs),
    };

    if args.download_only {
        if matches!(args.source, SourceKind::Local) {
            return Err("--download-only needs --source alphafold".into());
        }
        fs::create_dir_all(&args.local_dir)?;
        logger.step(&format!("Downloading into: {}", args.local_dir.display()));
        let source = AlphaFoldSource::new(&args.api_base, args.annotations, retry)?;
        let mut failed = 0;
        for identifier in &identifiers {
            logger.step(&format!("Downloading {identifier}"));
            if let Err(e) = source.download_entry(identifier, &args.local_dir, args.extra_files, &logger) {
                logger.error(&format!("{identifier}: {e}"));
                failed += 1;
            }
        }
        logger.setting(&format!(
            "Done. {} of {} proteins downloaded, {failed} failed.",
            identifiers.len() - failed,
            identifiers.len()
        ));
        if failed == identifiers.len() {
            return Err("every download in the batch failed".into());
        }
        return Ok(());
    }

    fs::create_dir_all(&args.output_dir)?;
    logger.step(&format!(
        "Ensuring output directory exists: {}",
        args.output_dir.display()
    ));

    let source: Box<dyn DataSource> = match args.source {
        SourceKind::Alphafold => Box::new(AlphaFoldSource::new(&args.api_base, args.annotations, retry)?),
        SourceKind::Local => {
            Box::new(LocalSource::new(&args.local_dir).with_annotations(args.annotations))
        }
    };

    let summary = run_batch(&identifiers, source.as_ref(), &args.output_dir, &logger, jobs);

    let summary_path = args
        .output_dir
        .join(format!("batch_summary_{}.txt", now.format("%Y%m%d_%H%M%S")));
    logger.step(&format!("Writing batch summary to: {}", summary_path.display()));
    let settings = [
        ("Date/Time", now.to_rfc3339()),
        ("Identifier File", args.ids.display().to_string()),
        ("Source", source_label),
        ("Annotations", args.annotations.to_string()),
    ];
    summary.write_report(File::create(&summary_path)?, &settings)?;

    logger.setting(&format!(
        "Done. {} of {} proteins processed, {} failed.",
        summary.succeeded(),
        identifiers.len(),
        summary.failed()
    ));

    if summary.succeeded() == 0 {
        return Err("every protein in the batch failed".into());
    }
    Ok(())
}
