//! pathflux CLI - Command-line interface for pathflux
//!
//! Commands:
//! - build: Turn an event log into graph, vector and stats artifacts
//! - validate: Check raw records against the configured column mapping
//! - describe: Print trajectory and per-event statistics
//! - schema: Print input, config or output schema

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use pathflux::encoder::{ArtifactEncoder, FORMAT_VERSION};
use pathflux::normalizer::EventNormalizer;
use pathflux::stats::RunStats;
use pathflux::types::RawRecord;
use pathflux::{PathError, Pipeline, PipelineConfig, PATHFLUX_VERSION};

/// pathflux - Event log to transition graph and trajectory vector engine
#[derive(Parser)]
#[command(name = "pathflux")]
#[command(author = "Synheart AI Inc")]
#[command(version = PATHFLUX_VERSION)]
#[command(about = "Turn event logs into transition graphs and trajectory vectors", long_about = None)]
struct Cli {
    /// Enable debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build graph, vector and stats artifacts from an event log
    Build {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,

        /// Skip malformed records instead of failing
        #[arg(long)]
        lenient: bool,
    },

    /// Validate raw records
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print trajectory and event statistics
    Describe {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Pipeline configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON document
    Json,
    /// Pretty-printed JSON document
    JsonPretty,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Raw event record
    Input,
    /// Pipeline configuration
    Config,
    /// Artifact document
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PathfluxCliError> {
    match cli.command {
        Commands::Build {
            input,
            output,
            config,
            input_format,
            output_format,
            lenient,
        } => cmd_build(
            &input,
            &output,
            config.as_deref(),
            input_format,
            output_format,
            lenient,
        ),

        Commands::Validate {
            input,
            config,
            input_format,
            json,
        } => cmd_validate(&input, config.as_deref(), input_format, json),

        Commands::Describe {
            input,
            config,
            input_format,
            json,
        } => cmd_describe(&input, config.as_deref(), input_format, json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_build(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    input_format: InputFormat,
    output_format: OutputFormat,
    lenient: bool,
) -> Result<(), PathfluxCliError> {
    let pipeline = Pipeline::new(load_config(config)?)?;
    let records = read_records(input, &input_format)?;

    let output_doc = if lenient {
        let (output, rejected) = pipeline.run_lenient(&records)?;
        for record in &rejected {
            warn!(index = record.index, reason = %record.reason, "skipped record");
        }
        output
    } else {
        pipeline.run(&records)?
    };

    let encoder = ArtifactEncoder::new();
    let output_data = match output_format {
        OutputFormat::Json => encoder.encode_to_json(&output_doc, pipeline.config())?,
        OutputFormat::JsonPretty => encoder.encode_to_json_pretty(&output_doc, pipeline.config())?,
    };

    if output.to_string_lossy() == "-" {
        println!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
        debug!(path = %output.display(), "wrote artifact");
    }

    Ok(())
}

fn cmd_validate(
    input: &Path,
    config: Option<&Path>,
    input_format: InputFormat,
    json: bool,
) -> Result<(), PathfluxCliError> {
    let pipeline = Pipeline::new(load_config(config)?)?;
    let records = read_records(input, &input_format)?;
    let rejected = pipeline.validate(&records);

    let report = ValidationReport {
        total_records: records.len(),
        valid_records: records.len() - rejected.len(),
        invalid_records: rejected.len(),
        errors: rejected
            .into_iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                error: r.reason,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Record {}: {}", err.index, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(PathfluxCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_describe(
    input: &Path,
    config: Option<&Path>,
    input_format: InputFormat,
    json: bool,
) -> Result<(), PathfluxCliError> {
    let pipeline = Pipeline::new(load_config(config)?)?;
    let records = read_records(input, &input_format)?;
    let stats = pipeline.describe(&records)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats);
    }
    Ok(())
}

fn print_stats(stats: &RunStats) {
    let summary = &stats.summary;
    println!("Run {}", summary.run_id);
    println!("==========================================");
    println!("Users:                  {}", summary.users);
    println!("Trajectories:           {}", summary.trajectories);
    println!("Events:                 {}", summary.events);
    println!("Unique events:          {}", summary.unique_events);
    println!("Mean trajectory length: {:.2}", summary.mean_trajectory_length);
    println!("Max trajectory length:  {}", summary.max_trajectory_length);
    println!("Mean duration (sec):    {:.1}", summary.mean_duration_sec);

    println!("\nEvents:");
    println!(
        "  {:<24} {:>8} {:>8} {:>8} {:>9}",
        "event", "count", "users", "paths", "drop-off"
    );
    for event in &stats.events {
        println!(
            "  {:<24} {:>8} {:>7.1}% {:>7.1}% {:>8.1}%",
            event.event,
            event.occurrences,
            event.unique_users_share * 100.0,
            event.unique_trajectories_share * 100.0,
            event.dropoff_share * 100.0
        );
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), PathfluxCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input: one JSON object per event record");
                println!();
                println!("Required keys (names set by config.columns):");
                println!("- user_id:   string or number");
                println!("- event:     non-empty string");
                println!("- timestamp: RFC 3339, \"YYYY-MM-DD HH:MM:SS[.fff]\", \"YYYY-MM-DD\",");
                println!("             or epoch seconds (integer or float)");
                println!();
                println!("Other keys are ignored.");
            }
        }
        SchemaType::Config => {
            if json_schema {
                println!("{}", get_config_json_schema());
            } else {
                println!("Pipeline configuration (all keys optional):");
                println!();
                println!("{}", PipelineConfig::default().to_json()?);
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output: artifact document {}", FORMAT_VERSION);
                println!();
                println!("- format_version, run_id, computed_at_utc");
                println!("- producer: {{ name, version, instance_id }}");
                println!("- config: the effective pipeline configuration");
                println!("- graph: {{ aggregation_mode, normalization_mode, nodes[{{name}}], edges[{{source, target, weight}}] }}");
                println!("- vectors: {{ mode, index, labels, rows[{{trajectory_id, user_id, values}}] }}");
                println!("- stats: {{ summary, events[] }}");
            }
        }
    }
    Ok(())
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, PathfluxCliError> {
    match path {
        Some(path) => Ok(PipelineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_records(input: &Path, format: &InputFormat) -> Result<Vec<RawRecord>, PathfluxCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let records = match format {
        InputFormat::Ndjson => EventNormalizer::parse_ndjson(&input_data)?,
        InputFormat::Json => EventNormalizer::parse_array(&input_data)?,
    };

    if records.is_empty() {
        return Err(PathfluxCliError::NoRecords);
    }
    debug!(records = records.len(), "read input");
    Ok(records)
}

fn get_input_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "pathflux.event_record",
        "description": "One row of a user event log",
        "type": "object",
        "required": ["user_id", "event", "timestamp"],
        "properties": {
            "user_id": { "type": ["string", "number"] },
            "event": { "type": "string", "minLength": 1 },
            "timestamp": { "type": ["string", "number"] }
        }
    })
    .to_string()
}

fn get_config_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "pathflux.config",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "columns": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "user_id": { "type": "string" },
                    "event_name": { "type": "string" },
                    "timestamp": { "type": "string" }
                }
            },
            "session_timeout_sec": { "type": ["number", "null"], "exclusiveMinimum": 0 },
            "boundary_events": { "type": "array", "items": { "type": "string" } },
            "boundary_policy": { "enum": ["start-next", "end-current", "exclude"] },
            "aggregation_mode": { "enum": ["raw-count", "unique-user", "time-weighted"] },
            "normalization_mode": { "enum": ["none", "row", "node", "full"] },
            "include_self_loops": { "type": "boolean" },
            "vectorization_mode": { "enum": ["count-based", "graph-based"] },
            "count_encoding": { "enum": ["count", "binary", "frequency", "time", "time-fraction"] },
            "duplicate_policy": { "enum": ["keep-first", "keep-all", "error"] },
            "add_path_markers": { "type": "boolean" },
            "edge_weight_threshold": { "type": ["number", "null"], "minimum": 0 },
            "parallel": { "type": "boolean" }
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "pathflux.artifact",
        "type": "object",
        "required": ["format_version", "producer", "run_id", "computed_at_utc", "config", "graph", "vectors", "stats"],
        "properties": {
            "format_version": { "type": "string" },
            "producer": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" },
                    "instance_id": { "type": "string" }
                }
            },
            "run_id": { "type": "string", "format": "uuid" },
            "computed_at_utc": { "type": "string", "format": "date-time" },
            "config": { "type": "object" },
            "graph": {
                "type": "object",
                "properties": {
                    "aggregation_mode": { "type": "string" },
                    "normalization_mode": { "type": "string" },
                    "nodes": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": { "name": { "type": "string" } }
                        }
                    },
                    "edges": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "source": { "type": "string" },
                                "target": { "type": "string" },
                                "weight": { "type": "number" }
                            }
                        }
                    }
                }
            },
            "vectors": {
                "type": "object",
                "properties": {
                    "mode": { "enum": ["count-based", "graph-based"] },
                    "index": { "type": "object" },
                    "labels": { "type": "array", "items": { "type": "string" } },
                    "rows": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "trajectory_id": { "type": "string" },
                                "user_id": { "type": "string" },
                                "values": { "type": "array", "items": { "type": "number" } }
                            }
                        }
                    }
                }
            },
            "stats": { "type": "object" }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum PathfluxCliError {
    Io(io::Error),
    Pipeline(PathError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
}

impl From<io::Error> for PathfluxCliError {
    fn from(e: io::Error) -> Self {
        PathfluxCliError::Io(e)
    }
}

impl From<PathError> for PathfluxCliError {
    fn from(e: PathError) -> Self {
        PathfluxCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for PathfluxCliError {
    fn from(e: serde_json::Error) -> Self {
        PathfluxCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PathfluxCliError> for CliError {
    fn from(e: PathfluxCliError) -> Self {
        match e {
            PathfluxCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PathfluxCliError::Pipeline(e) => {
                let hint = match &e {
                    PathError::Schema { .. } => "Run 'pathflux validate' or retry with --lenient",
                    PathError::Config(_) => "Run 'pathflux schema config' for accepted keys",
                    PathError::EmptyGraph(_) => "Use row normalization or provide multi-event trajectories",
                    PathError::EmptyTrajectory { .. } => "Check boundary_events and boundary_policy",
                    _ => "Check input ordering and configuration",
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            PathfluxCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PathfluxCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            PathfluxCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    error: String,
}
