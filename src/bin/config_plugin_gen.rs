//! Config plugin generator CLI
//!
//! Compiles a YAML configuration schema into the C sources of the config
//! manager plugin.

use std::path::PathBuf;

use clap::Parser;
use config_plugin_gen::{loader, Generator, Result};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "config-plugin-gen")]
#[command(version)]
#[command(about = "Generate config manager plugin C sources from a YAML schema")]
struct Cli {
    /// Define override, NAME=VALUE; may be repeated
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
    define: Vec<String>,

    /// Input schema file
    input_file: PathBuf,

    /// Output directory for the generated sources
    output_dir: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let model = loader::load_file(&cli.input_file, &cli.define)?;
    Generator::new(&model).generate(&cli.output_dir)
}
