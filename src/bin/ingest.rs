//! Ingest CLI - Command-line interface for Synheart Ingest
//!
//! Commands:
//! - extract: Extract normalized records from an unpacked export and stamp them
//! - verify: Check a persisted artifact against its digest
//! - scan: List the files extraction would read and the metric each maps to

use clap::{Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use synheart_ingest::integrity;
use synheart_ingest::resolver::MetricResolver;
use synheart_ingest::types::{ExtractionResult, IntegrityDigest, MetricSummary};
use synheart_ingest::{ExtractConfig, Extractor, IngestError, INGEST_VERSION, PRODUCER_NAME};

/// Ingest - Fitness export extraction with integrity stamping
#[derive(Parser)]
#[command(name = "ingest")]
#[command(author = "Synheart AI Inc")]
#[command(version = INGEST_VERSION)]
#[command(about = "Extract normalized fitness records from data exports", long_about = None)]
struct Cli {
    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract records from an unpacked export directory
    Extract {
        /// Root of the unpacked export
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "json")]
        format: OutputFormat,

        /// Number of decode workers (overrides the config file)
        #[arg(long)]
        workers: Option<usize>,

        /// Load extraction settings from a JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the integrity digest as JSON to this file
        #[arg(long)]
        digest_out: Option<PathBuf>,
    },

    /// Verify an artifact written by `extract --format json`
    Verify {
        /// Artifact file
        #[arg(short, long)]
        artifact: PathBuf,

        /// Expected hex digest
        #[arg(long, conflicts_with = "digest_file", required_unless_present = "digest_file")]
        digest: Option<String>,

        /// Digest JSON written by `extract --digest-out`
        #[arg(long)]
        digest_file: Option<PathBuf>,
    },

    /// List candidate files and their metric names without decoding them
    Scan {
        /// Root of the unpacked export
        #[arg(short, long)]
        input: PathBuf,

        /// Load extraction settings from a JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Canonical artifact: compact JSON array of records (the digested bytes)
    Json,
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// Pretty-printed JSON array
    JsonPretty,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    None,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let report = serde_json::to_string(&CliError::from(e))
                .unwrap_or_else(|_| "Unknown error".to_string());
            eprintln!("{report}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: LogLevel) {
    let level = match log_level {
        LogLevel::None => return,
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env = env_logger::Env::default().filter_or("RUST_LOG", level);

    env_logger::Builder::from_env(env)
        .format_module_path(false)
        .format_target(matches!(log_level, LogLevel::Debug | LogLevel::Trace))
        .init();
}

fn run(command: Commands) -> Result<(), IngestCliError> {
    match command {
        Commands::Extract {
            input,
            output,
            format,
            workers,
            config,
            digest_out,
        } => cmd_extract(
            &input,
            &output,
            format,
            workers,
            config.as_deref(),
            digest_out.as_deref(),
        ),

        Commands::Verify {
            artifact,
            digest,
            digest_file,
        } => cmd_verify(&artifact, digest, digest_file.as_deref()),

        Commands::Scan { input, config, json } => cmd_scan(&input, config.as_deref(), json),
    }
}

fn load_config(
    path: Option<&Path>,
    workers: Option<usize>,
) -> Result<ExtractConfig, IngestCliError> {
    let mut config = match path {
        Some(path) => ExtractConfig::from_file(path)?,
        None => ExtractConfig::default(),
    };
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    Ok(config)
}

fn cmd_extract(
    input: &Path,
    output: &Path,
    format: OutputFormat,
    workers: Option<usize>,
    config: Option<&Path>,
    digest_out: Option<&Path>,
) -> Result<(), IngestCliError> {
    let extractor = Extractor::new(load_config(config, workers)?)?;
    let result = extractor.extract(input)?;
    let digest = IntegrityDigest::of_result(&result)?;

    let rendered = format_output(&result, &format)?;
    let to_stdout = output.to_string_lossy() == "-";
    if to_stdout {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&rendered)?;
        stdout.flush()?;
    } else {
        fs::write(output, &rendered)?;
    }

    if let Some(path) = digest_out {
        fs::write(path, serde_json::to_vec_pretty(&digest)?)?;
    }

    let report = ExtractReport {
        producer: PRODUCER_NAME.to_string(),
        version: INGEST_VERSION.to_string(),
        records: result.len(),
        files_scanned: result.files_scanned(),
        files_skipped: result.files_skipped(),
        devices: result.devices().iter().cloned().collect(),
        metrics: result.summary(),
        digest,
    };

    if to_stdout {
        log::info!(
            "Extracted {} records, digest {}",
            report.records,
            report.digest.hex
        );
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

fn cmd_verify(
    artifact: &Path,
    digest: Option<String>,
    digest_file: Option<&Path>,
) -> Result<(), IngestCliError> {
    let expected = match (digest, digest_file) {
        (Some(hex), _) => hex,
        (None, Some(path)) => {
            let stored: IntegrityDigest = serde_json::from_str(&fs::read_to_string(path)?)?;
            if stored.algorithm != integrity::DIGEST_ALGORITHM {
                return Err(IngestCliError::UnsupportedAlgorithm(stored.algorithm));
            }
            stored.hex
        }
        (None, None) => return Err(IngestCliError::MissingDigest),
    };

    let verified = integrity::verify_file(&expected, artifact)?;
    let report = VerifyReport {
        artifact: artifact.display().to_string(),
        algorithm: integrity::DIGEST_ALGORITHM.to_string(),
        expected: expected.trim().to_ascii_lowercase(),
        verified,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if verified {
        Ok(())
    } else {
        Err(IngestCliError::VerificationFailed)
    }
}

fn cmd_scan(input: &Path, config: Option<&Path>, json: bool) -> Result<(), IngestCliError> {
    if !input.is_dir() {
        return Err(IngestCliError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("'{}' is not a directory", input.display()),
        )));
    }

    let extractor = Extractor::new(load_config(config, None)?)?;
    let entries: Vec<ScanEntry> = extractor
        .candidates(input)
        .map(|candidate| {
            let file_name = candidate.file_name();
            ScanEntry {
                path: candidate.relative.display().to_string(),
                metric: MetricResolver::resolve(&file_name),
                rule: MetricResolver::matching_rule(&file_name),
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{}\t{}", entry.metric, entry.path);
        }
        eprintln!("{} candidate files", entries.len());
    }

    if entries.is_empty() {
        return Err(IngestError::NoFitDataFound.into());
    }
    Ok(())
}

fn format_output(
    result: &ExtractionResult,
    format: &OutputFormat,
) -> Result<Vec<u8>, IngestCliError> {
    let bytes = match format {
        OutputFormat::Json => result.artifact()?,
        OutputFormat::JsonPretty => serde_json::to_vec_pretty(result.records())?,
        OutputFormat::Ndjson => {
            let mut out = Vec::new();
            for record in result.records() {
                serde_json::to_writer(&mut out, record)?;
                out.push(b'\n');
            }
            out
        }
    };
    Ok(bytes)
}

// Error handling

#[derive(Debug)]
enum IngestCliError {
    Io(io::Error),
    Ingest(IngestError),
    Json(serde_json::Error),
    MissingDigest,
    UnsupportedAlgorithm(String),
    VerificationFailed,
}

impl From<io::Error> for IngestCliError {
    fn from(e: io::Error) -> Self {
        IngestCliError::Io(e)
    }
}

impl From<IngestError> for IngestCliError {
    fn from(e: IngestError) -> Self {
        IngestCliError::Ingest(e)
    }
}

impl From<serde_json::Error> for IngestCliError {
    fn from(e: serde_json::Error) -> Self {
        IngestCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<IngestCliError> for CliError {
    fn from(e: IngestCliError) -> Self {
        match e {
            IngestCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            IngestCliError::Ingest(e) => CliError {
                code: ingest_error_code(&e).to_string(),
                hint: Some(e.remediation().to_string()),
                message: e.to_string(),
            },
            IngestCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            IngestCliError::MissingDigest => CliError {
                code: "MISSING_DIGEST".to_string(),
                message: "No digest given".to_string(),
                hint: Some("Pass --digest HEX or --digest-file FILE".to_string()),
            },
            IngestCliError::UnsupportedAlgorithm(algorithm) => CliError {
                code: "UNSUPPORTED_ALGORITHM".to_string(),
                message: format!("Digest algorithm '{algorithm}' is not supported"),
                hint: Some(format!("Only {} digests can be verified", integrity::DIGEST_ALGORITHM)),
            },
            IngestCliError::VerificationFailed => CliError {
                code: "VERIFICATION_FAILED".to_string(),
                message: "Artifact does not match the digest".to_string(),
                hint: Some(
                    "The artifact was altered or the digest belongs to another extraction"
                        .to_string(),
                ),
            },
        }
    }
}

fn ingest_error_code(e: &IngestError) -> &'static str {
    match e {
        IngestError::CorruptArchive(_) => "CORRUPT_ARCHIVE",
        IngestError::NoFitDataFound => "NO_FIT_DATA",
        IngestError::NoValidDataFound => "NO_VALID_DATA",
        IngestError::ArchiveTooLarge { .. } => "ARCHIVE_TOO_LARGE",
        IngestError::Config(_) => "CONFIG_ERROR",
        IngestError::JsonError(_) => "JSON_ERROR",
        IngestError::Io(_) => "IO_ERROR",
    }
}

// Report types

#[derive(serde::Serialize)]
struct ExtractReport {
    producer: String,
    version: String,
    records: usize,
    files_scanned: usize,
    files_skipped: usize,
    devices: Vec<String>,
    metrics: BTreeMap<String, MetricSummary>,
    digest: IntegrityDigest,
}

#[derive(serde::Serialize)]
struct VerifyReport {
    artifact: String,
    algorithm: String,
    expected: String,
    verified: bool,
}

#[derive(serde::Serialize)]
struct ScanEntry {
    path: String,
    metric: String,
    rule: Option<&'static str>,
}
