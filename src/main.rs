extern crate eso_meters;

use clap::Parser;
use eso_meters::output::FileOutput;
use eso_meters::run_project;
use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Default, Debug)]
#[clap(author, version, about, long_about = None)]
struct EsoArgs {
    input_file: String,
    /// Directory the reports are written to (defaults to the input file's directory)
    #[arg(long, short)]
    output_dir: Option<PathBuf>,
    /// File name for each report, with `{}` standing for the report's extension
    #[arg(long, short)]
    file_template: Option<String>,
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = EsoArgs::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let input_file = Path::new(args.input_file.as_str());
    let input_file_stem = input_file
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("eplusout");
    let output_dir = args.output_dir.unwrap_or_else(|| {
        input_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    });
    let file_template = args
        .file_template
        .unwrap_or_else(|| format!("{input_file_stem}.{{}}"));

    let summary = run_project(
        BufReader::new(File::open(input_file)?),
        FileOutput::new(output_dir, file_template),
    )?;

    info!(
        "Finished: {} standard records, {} meter records, {} warnings",
        summary.records.standard,
        summary.records.meter,
        summary.warnings.len()
    );

    Ok(())
}
