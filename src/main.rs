use anyhow::Result;
use clap::{Parser, Subcommand};
use sheetforge::cli::{self, BuildOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sheetforge")]
#[command(about = "Declarative spreadsheet compiler: YAML + theme in, ODS or XLSX out.")]
#[command(long_about = "sheetforge - Declarative spreadsheet compiler

Workbook definitions and themes are plain YAML. Styles are resolved through
theme inheritance and traits, formulas are checked for circular references,
and the output is written atomically (temp file, verify, rename).

COMMANDS:
  build     - Compile a definition to .ods (streamed) or .xlsx
  check     - Full validation without writing anything
  inspect   - Hardened read-back summary of an .ods file

EXAMPLES:
  sheetforge build budget.yaml                      # writes budget.ods
  sheetforge build budget.yaml -o budget.xlsx --theme themes/corporate.yaml
  sheetforge check budget.yaml --variant dark
  sheetforge inspect budget.ods --json

LOGGING:
  Set SHEETFORGE_LOG (e.g. SHEETFORGE_LOG=debug) for tracing output.")]
#[command(version)]
struct Cli {
    /// Show debug logging and extra detail
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Compile a workbook definition.

The output format follows the extension: .ods is written as a streamed
OpenDocument package, .xlsx goes through the Excel writer. The file only
appears at the destination once it has been fully written and verified.

EXAMPLES:
  sheetforge build report.yaml -o out/report.ods
  sheetforge build report.yaml --theme corporate.yaml --variant dark
  sheetforge build report.yaml --config limits.yaml")]
    /// Compile a workbook definition to .ods or .xlsx
    Build {
        /// Path to the YAML workbook definition
        definition: PathBuf,

        /// Output file (.ods or .xlsx); defaults to the definition name with .ods
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Theme file (overrides the definition's `theme`)
        #[arg(short, long)]
        theme: Option<PathBuf>,

        /// Theme variant to apply
        #[arg(long)]
        variant: Option<String>,

        /// Config file with resource limits and resolver settings
        #[arg(short, long, env = "SHEETFORGE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Validate a definition (structure, styles, formulas) without output
    Check {
        /// Path to the YAML workbook definition
        definition: PathBuf,

        /// Theme file (overrides the definition's `theme`)
        #[arg(short, long)]
        theme: Option<PathBuf>,

        /// Theme variant to apply
        #[arg(long)]
        variant: Option<String>,

        /// Config file with resource limits and resolver settings
        #[arg(short, long, env = "SHEETFORGE_CONFIG")]
        config: Option<PathBuf>,
    },

    #[command(long_about = "Summarize an .ods file using the hardened reader.

The archive is checked against the configured limits (entry count,
compression ratio, total inflated size) before anything is inflated, and
DOCTYPE declarations are rejected.")]
    /// Summarize an .ods file (sheets, rows, formulas, named ranges)
    Inspect {
        /// Path to the .ods document
        document: PathBuf,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,

        /// Config file with resource limits
        #[arg(short, long, env = "SHEETFORGE_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("SHEETFORGE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Build {
            definition,
            output,
            theme,
            variant,
            config,
        } => {
            let options = BuildOptions {
                theme,
                variant,
                config,
                verbose: cli.verbose,
            };
            cli::build(definition, output, options)?;
        }

        Commands::Check {
            definition,
            theme,
            variant,
            config,
        } => {
            let options = BuildOptions {
                theme,
                variant,
                config,
                verbose: cli.verbose,
            };
            cli::check(definition, options)?;
        }

        Commands::Inspect {
            document,
            json,
            config,
        } => cli::inspect(document, json, config)?,
    }
    Ok(())
}
