use clap::{Parser, Subcommand};
use miette::{miette, Result};
use std::path::PathBuf;

use kernel_cfg::cli;
use kernel_cfg::cli::cfg::CfgFormat;

#[derive(Parser)]
#[command(name = "kernel-cfg")]
#[command(about = "Control-flow graphs and structured exit lowering for kernel IR")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lower multi-level continue/break into single-level exits
    Normalize {
        /// Input kernel IR (JSON)
        input: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compile config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the lowered IR as text instead of JSON
        #[arg(long)]
        text: bool,
    },

    /// Build control flow graphs
    Cfg {
        /// Input kernel IR (JSON)
        input: PathBuf,

        /// Compile config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output DOT file for visualization (optional)
        #[arg(short, long)]
        dot: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: CfgFormat,

        /// Build the graph without lowering exits first
        #[arg(long)]
        no_normalize: bool,
    },

    /// Print kernel IR as text
    Dump {
        /// Input kernel IR (JSON)
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Normalize {
            input,
            output,
            config,
            text,
        } => {
            let args = cli::normalize::NormalizeArgs {
                input_path: input,
                output_path: output,
                config_path: config,
                text,
            };
            cli::normalize::normalize(&args).map_err(|e| miette!("{}", e))
        }
        Commands::Cfg {
            input,
            config,
            dot,
            format,
            no_normalize,
        } => {
            let args = cli::cfg::CfgArgs {
                input_path: input,
                config_path: config,
                dot_path: dot,
                format,
                no_normalize,
            };
            cli::cfg::cfg(&args).map_err(|e| miette!("{}", e))
        }
        Commands::Dump { input } => cli::dump::dump(&input).map_err(|e| miette!("{}", e)),
    }
}
