//! Command-line interface for mongobucket
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Positional tokens (`debug`, `key`, `restrict` and config paths)
//! - Loading settings and applying command-line overrides
//! - Dispatching commands to the executor and printing their results

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::config::{
    DEFAULT_DESTINATION_CONFIG, DEFAULT_SOURCE_CONFIG, DestinationConfig, LogLevel, Settings,
    SourceConfig,
};
use crate::error::{ConfigError, Result};
use crate::executor::{Executor, ParseReport, RunOptions, StoreReport};
use crate::export::ChunkFormat;
use crate::utils::convert::format_bytes;
use crate::utils::time::format_duration;

/// Export MongoDB databases into S3-compatible buckets
#[derive(Parser, Debug)]
#[command(
    name = "mongobucket",
    version,
    about = "Stream a MongoDB database into an object storage bucket",
    long_about = "Reads every collection of a MongoDB database and uploads it to an
S3-compatible bucket as a series of bounded segments.

Positional arguments after the command are config file paths, in order
(database config, then bucket config), plus the tokens `debug`, `key`
and `restrict`."
)]
pub struct CliArgs {
    /// Command to run
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose (debug) logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Trace logging
    #[arg(long, global = true)]
    pub trace: bool,

    /// Runtime settings file (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    pub settings: Option<PathBuf>,

    /// Chunk format (bson, jsonl)
    #[arg(long, value_name = "FORMAT", global = true)]
    pub format: Option<ChunkFormat>,

    /// Maximum segment size (e.g. 32MB)
    #[arg(long, value_name = "SIZE", global = true)]
    pub segment_size: Option<String>,

    /// Re-download every segment and compare it with what was sent
    #[arg(long, global = true)]
    pub verify: bool,
}

/// Subcommands for mongobucket
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read the whole database and report its size, without uploading
    #[command(visible_alias = "p")]
    Parse {
        /// [DB_CONFIG] [debug]
        #[arg(value_name = "ARGS")]
        args: Vec<String>,

        /// Also write the export to this file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Upload a sample object to check the bucket configuration
    #[command(visible_alias = "t")]
    Test {
        /// [BUCKET_CONFIG] [key] [restrict] [debug]
        #[arg(value_name = "ARGS")]
        args: Vec<String>,

        #[command(flatten)]
        access: AccessArgs,
    },

    /// Export the database into the bucket
    #[command(visible_alias = "s")]
    Store {
        /// [DB_CONFIG] [BUCKET_CONFIG] [key] [restrict] [debug]
        #[arg(value_name = "ARGS")]
        args: Vec<String>,

        #[command(flatten)]
        access: AccessArgs,
    },
}

/// Capability sharing flags
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct AccessArgs {
    /// Print the serialized access capability after a successful upload
    #[arg(long)]
    pub share_access: bool,

    /// Print a restricted capability (per the bucket config's disallow flags)
    #[arg(long)]
    pub restrict: bool,
}

/// Positional arguments, sorted into tokens and config paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Positionals {
    pub debug: bool,
    pub share_access: bool,
    pub restrict: bool,
    pub paths: Vec<PathBuf>,
}

impl Positionals {
    /// Sort positional arguments
    ///
    /// # Arguments
    /// * `args` - Raw positional arguments
    /// * `max_paths` - Number of config paths the command accepts
    pub fn parse(args: &[String], max_paths: usize) -> Result<Self> {
        let mut positionals = Self::default();
        for arg in args {
            match arg.as_str() {
                "debug" => positionals.debug = true,
                "key" => positionals.share_access = true,
                "restrict" => positionals.restrict = true,
                path if positionals.paths.len() < max_paths => {
                    positionals.paths.push(PathBuf::from(path));
                }
                extra => {
                    return Err(ConfigError::InvalidValue {
                        field: "arguments".to_string(),
                        value: extra.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(positionals)
    }

    /// Config path at `index`, or `default`
    pub fn path_or(&self, index: usize, default: &str) -> PathBuf {
        self.paths
            .get(index)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(default))
    }
}

/// CLI interface handler
pub struct CliInterface {
    args: CliArgs,
    positionals: Positionals,
    settings: Settings,
}

impl CliInterface {
    /// Parse the process arguments and load settings
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Build from already-parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let positionals = match &args.command {
            Commands::Parse { args, .. } => Positionals::parse(args, 1)?,
            Commands::Test { args, .. } => Positionals::parse(args, 1)?,
            Commands::Store { args, .. } => Positionals::parse(args, 2)?,
        };

        let mut settings = Settings::load(args.settings.as_deref())?;
        Self::apply_args_to_settings(&mut settings, &args, &positionals);
        settings.validate()?;

        Ok(Self {
            args,
            positionals,
            settings,
        })
    }

    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether verbose output was requested by flag or positional token
    pub fn debug(&self) -> bool {
        self.args.debug || self.args.trace || self.positionals.debug
    }

    /// Switches passed down to the executor
    pub fn run_options(&self) -> RunOptions {
        let access = match &self.args.command {
            Commands::Test { access, .. } | Commands::Store { access, .. } => *access,
            Commands::Parse { .. } => AccessArgs::default(),
        };
        RunOptions {
            debug: self.debug(),
            share_access: access.share_access || self.positionals.share_access,
            restrict: access.restrict || self.positionals.restrict,
        }
    }

    /// Override settings with command-line arguments
    fn apply_args_to_settings(settings: &mut Settings, args: &CliArgs, positionals: &Positionals) {
        if let Some(format) = args.format {
            settings.export.format = format;
        }
        if let Some(size) = &args.segment_size {
            settings.export.segment_size = size.clone();
        }
        if args.verify {
            settings.export.verify = true;
        }

        settings.logging.level = if args.trace {
            LogLevel::Trace
        } else if args.debug || positionals.debug {
            LogLevel::Debug
        } else {
            settings.logging.level
        };
    }

    /// Run the selected command
    ///
    /// # Arguments
    /// * `cancel` - Token cancelled on Ctrl-C
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let executor = Executor::new(self.settings.clone(), self.run_options(), cancel);

        match &self.args.command {
            Commands::Parse { output, .. } => {
                let source = self.source_config()?;
                println!("Connecting to {}", source.sanitized_uri());
                let report = executor.parse(&source, output.as_deref()).await?;
                self.print_parse_report(&report, output.as_deref());
            }
            Commands::Test { .. } => {
                let destination = self.destination_config(0)?;
                let report = executor.test_upload(&destination).await?;
                self.print_store_report(&report, &destination);
            }
            Commands::Store { .. } => {
                let source = self.source_config()?;
                let destination = self.destination_config(1)?;
                println!("Connecting to {}", source.sanitized_uri());
                let report = executor.store(&source, &destination).await?;
                self.print_store_report(&report, &destination);
            }
        }
        Ok(())
    }

    fn source_config(&self) -> Result<SourceConfig> {
        let path = self.positionals.path_or(0, DEFAULT_SOURCE_CONFIG);
        SourceConfig::load(path)
    }

    fn destination_config(&self, index: usize) -> Result<DestinationConfig> {
        let path = self.positionals.path_or(index, DEFAULT_DESTINATION_CONFIG);
        DestinationConfig::load(path)
    }

    fn print_parse_report(&self, report: &ParseReport, output: Option<&Path>) {
        println!(
            "Read {} document(s) from {} collection(s): {}",
            report.documents,
            report.collections,
            format_bytes(report.bytes)
        );
        if let Some(path) = output {
            println!("Export written to {}", path.display());
        }
        if self.debug() {
            println!("Elapsed: {}", format_duration(ms(report.elapsed_ms)));
        }
    }

    fn print_store_report(&self, report: &StoreReport, destination: &DestinationConfig) {
        for segment in &report.relay.segments {
            let verified = if segment.verified { " (verified)" } else { "" };
            println!(
                "Uploaded {}/{} {}{}",
                destination.bucket,
                segment.key,
                format_bytes(segment.bytes as u64),
                verified
            );
        }
        println!(
            "{} segment(s), {} document(s), {} in {}",
            report.relay.segments.len(),
            report.documents,
            format_bytes(report.relay.total_bytes),
            format_duration(ms(report.relay.elapsed_ms))
        );
        if let Some(token) = &report.shared_access {
            println!("Serialized access key: {}", token);
        }
    }
}

fn ms(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
