use am_structure_mapper::logger::Logger;
use am_structure_mapper::pipeline::{parse_identifiers, process_protein, run_batch};
use am_structure_mapper::source::{DataSource, LocalSource, ProteinInputs};
use am_structure_mapper::PipelineError;
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

const STRUCTURE: &str = "\
HEADER    PREDICTED PROTEIN                       01-JUL-21
ATOM      1  N   MET A   1     -11.235  12.431   3.331  1.00 91.25           N
ATOM      2  CA  MET A   1     -10.111  11.541   3.554  1.00 91.25           C
ATOM      3  N   LYS A   2      -9.108  12.004   2.788  1.00 84.10           N
ATOM      4  N   GLY A   3      -8.001  10.210   1.002  1.00 55.00           N
TER       5      GLY A   3
END
";

const VARIANTS: &str = "protein_variant,am_pathogenicity,am_class
K2A,0.2,likely_benign
M1C,0.7,ambiguous
X9999Z,notanumber,ambiguous
M1A,0.9,likely_pathogenic
";

/// Serves fixed inputs per accession; anything else is unavailable.
struct MemorySource {
    proteins: HashMap<String, (String, String)>,
}

impl MemorySource {
    fn new(entries: &[(&str, &str, &str)]) -> Self {
        let proteins = entries
            .iter()
            .map(|(id, table, pdb)| (id.to_string(), (table.to_string(), pdb.to_string())))
            .collect();
        Self { proteins }
    }
}

impl DataSource for MemorySource {
    fn fetch(&self, identifier: &str, _logger: &Logger) -> Result<ProteinInputs, PipelineError> {
        let (table, pdb) = self
            .proteins
            .get(identifier)
            .ok_or_else(|| PipelineError::unavailable(identifier, "not in fixture"))?;
        Ok(ProteinInputs {
            variant_table_name: format!("AF-{identifier}-F1-aa-substitutions.csv"),
            variant_table: table.clone().into_bytes(),
            structure_name: format!("AF-{identifier}-F1-model_v4.pdb"),
            structure: pdb.clone().into_bytes(),
        })
    }
}

fn b_factor(line: &str) -> &str {
    &line[60..66]
}

#[test]
fn rewrites_structure_and_writes_plot_tables() {
    let out = TempDir::new().expect("tempdir");
    let source = MemorySource::new(&[("P12345", VARIANTS, STRUCTURE)]);

    let report = process_protein("P12345", &source, out.path(), &Logger::silent()).expect("run");
    assert_eq!(report.variants, 3);
    assert_eq!(report.skipped_rows, 1);
    assert_eq!(report.residues_with_scores, 2);
    assert_eq!(report.atoms_rewritten, 3);
    assert_eq!(report.atoms_unchanged, 1);
    assert_eq!(report.outputs.len(), 3);

    let rewritten = fs::read_to_string(out.path().join("AM_scores_AF-P12345-F1-model_v4.pdb"))
        .expect("rewritten structure");
    let lines: Vec<&str> = rewritten.lines().collect();
    let original: Vec<&str> = STRUCTURE.lines().collect();
    assert_eq!(lines.len(), original.len());
    assert_eq!(b_factor(lines[1]), "  0.80");
    assert_eq!(b_factor(lines[2]), "  0.80");
    assert_eq!(b_factor(lines[3]), "  0.20");
    assert_eq!(b_factor(lines[4]), " 55.00");
    assert_eq!(lines[0], original[0]);
    assert_eq!(lines[5], original[5]);

    let heatmap = fs::read_to_string(out.path().join("heatmap_AF-P12345-F1-aa-substitutions.csv"))
        .expect("heatmap table");
    assert_eq!(
        heatmap,
        "reference_aa,residue_number,alternative_aa,pathogenicity_score\n\
         M,1,A,0.9\n\
         M,1,C,0.7\n\
         K,2,A,0.2\n"
    );

    let comparison = fs::read_to_string(out.path().join("plddt_am_P12345.csv")).expect("comparison");
    let rows: Vec<&str> = comparison.lines().collect();
    assert_eq!(rows.len(), 4);
    assert!(rows[1].starts_with("1,1,91.25,0.9125,0.8"));
    assert_eq!(rows[2], "2,2,84.1,0.841,0.2");
    assert_eq!(rows[3], "3,3,55,0.55,");
}

#[test]
fn repeated_runs_are_byte_identical() {
    let source = MemorySource::new(&[("P12345", VARIANTS, STRUCTURE)]);
    let first = TempDir::new().expect("tempdir");
    let second = TempDir::new().expect("tempdir");
    let a = process_protein("P12345", &source, first.path(), &Logger::silent()).expect("run");
    process_protein("P12345", &source, second.path(), &Logger::silent()).expect("run");

    for path in &a.outputs {
        let name = path.file_name().expect("file name");
        assert_eq!(
            fs::read(path).expect("first"),
            fs::read(second.path().join(name)).expect("second"),
            "{name:?} differs between runs"
        );
    }
}

#[test]
fn format_violation_writes_nothing() {
    let out = TempDir::new().expect("tempdir");
    let broken = STRUCTURE.replace("LYS A   2", "LYS A   ?");
    let source = MemorySource::new(&[("P12345", VARIANTS, broken.as_str())]);

    let err = process_protein("P12345", &source, out.path(), &Logger::silent()).expect_err("should fail");
    assert!(matches!(err, PipelineError::FormatViolation { line: 4, .. }));
    assert_eq!(fs::read_dir(out.path()).expect("read dir").count(), 0);
}

#[test]
fn table_without_usable_rows_is_unavailable() {
    let out = TempDir::new().expect("tempdir");
    let source = MemorySource::new(&[(
        "P12345",
        "protein_variant,am_pathogenicity\nbad,0.1\n",
        STRUCTURE,
    )]);
    let err = process_protein("P12345", &source, out.path(), &Logger::silent()).expect_err("no rows");
    assert!(matches!(err, PipelineError::SourceUnavailable { .. }));
}

#[test]
fn batch_continues_past_failures() {
    let out = TempDir::new().expect("tempdir");
    let broken = STRUCTURE.replace("GLY A   3     ", "GLY A   Q     ");
    let source = MemorySource::new(&[
        ("P11111", VARIANTS, STRUCTURE),
        ("P22222", VARIANTS, broken.as_str()),
        ("P33333", VARIANTS, STRUCTURE),
    ]);
    let ids: Vec<String> = ["P11111", "P22222", "MISSING", "P33333"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    for jobs in [1, 3] {
        let summary = run_batch(&ids, &source, out.path(), &Logger::silent(), jobs);
        let order: Vec<&str> = summary.results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, ["P11111", "P22222", "MISSING", "P33333"]);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 2);
        assert!(matches!(
            summary.results[1].1,
            Err(PipelineError::FormatViolation { .. })
        ));
        assert!(matches!(
            summary.results[2].1,
            Err(PipelineError::SourceUnavailable { .. })
        ));

        let mut report = Vec::new();
        summary
            .write_report(&mut report, &[("Source", "memory".to_string())])
            .expect("report");
        let report = String::from_utf8(report).expect("utf8");
        assert!(report.contains("Proteins Failed: 2"));
        assert!(report.contains("MISSING: FAILED (No usable data for MISSING: not in fixture)"));
    }
    assert!(!out.path().join("AM_scores_AF-P22222-F1-model_v4.pdb").exists());
    assert!(out.path().join("AM_scores_AF-P33333-F1-model_v4.pdb").exists());
}

#[test]
fn duplicate_identifiers_in_parallel_batches_all_succeed() {
    let out = TempDir::new().expect("tempdir");
    let source = MemorySource::new(&[("P12345", VARIANTS, STRUCTURE)]);
    let ids = vec!["P12345".to_string(); 8];

    for _ in 0..5 {
        let summary = run_batch(&ids, &source, out.path(), &Logger::silent(), 8);
        assert_eq!(summary.failed(), 0, "{:?}", summary.results);
    }
    let rewritten = fs::read_to_string(out.path().join("AM_scores_AF-P12345-F1-model_v4.pdb"))
        .expect("rewritten structure");
    assert_eq!(rewritten.len(), STRUCTURE.len());
    // Only the three outputs remain; no temp files are left behind.
    assert_eq!(fs::read_dir(out.path()).expect("read dir").count(), 3);

    assert_eq!(parse_identifiers("P12345\nP12345,P12345"), ["P12345"]);
}

#[test]
fn local_inputs_survive_sharing_the_output_directory() {
    let dir = TempDir::new().expect("tempdir");
    let table = dir.path().join("AF-P12345-F1-aa-substitutions.csv");
    fs::write(&table, VARIANTS).expect("write table");
    fs::write(dir.path().join("AF-P12345-F1-model_v4.pdb"), STRUCTURE).expect("write structure");
    let source = LocalSource::new(dir.path());

    let first = process_protein("P12345", &source, dir.path(), &Logger::silent()).expect("first run");
    let second = process_protein("P12345", &source, dir.path(), &Logger::silent()).expect("second run");
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&table).expect("table"), VARIANTS);
    assert!(dir.path().join("heatmap_AF-P12345-F1-aa-substitutions.csv").exists());
}

#[test]
fn saved_downloads_feed_a_later_local_run() {
    let downloads = TempDir::new().expect("tempdir");
    let out = TempDir::new().expect("tempdir");
    let memory = MemorySource::new(&[("P12345", VARIANTS, STRUCTURE)]);
    memory
        .fetch("P12345", &Logger::silent())
        .expect("inputs")
        .save_to(downloads.path())
        .expect("save");

    let report = process_protein("P12345", &LocalSource::new(downloads.path()), out.path(), &Logger::silent())
        .expect("local run");
    assert_eq!(report.variants, 3);
    assert_eq!(report.atoms_rewritten, 3);
    let rewritten = fs::read_to_string(out.path().join("AM_scores_AF-P12345-F1-model_v4.pdb"))
        .expect("rewritten structure");
    assert_eq!(b_factor(rewritten.lines().nth(1).expect("atom")), "  0.80");
}
