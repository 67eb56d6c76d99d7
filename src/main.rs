use anyhow::Result;
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{info, warn, LevelFilter};
use std::path::PathBuf;

use docker2singularity::{
    AciSource, BootstrapLayout, DockerSource, ImageToBundleConverter, LegacyLayout,
    SingularityDLayout, Source,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Layout {
    /// Flat bootstrap files in the rootfs root (pre-2.2 Singularity)
    Legacy,
    /// `.singularity.d/` app-layer convention (requires a local install)
    SingularityD,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(help = "Docker image or container name")]
    input: String,

    #[arg(help = "Singularity container image path (no extension for a directory, .sqsh for SquashFS)")]
    output: PathBuf,

    #[arg(
        short,
        long,
        help = "Unprivileged mode (uses docker2aci instead of the Docker daemon)"
    )]
    unprivileged: bool,

    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Contents to add to the output image (accepted but not implemented yet)"
    )]
    add: Vec<PathBuf>,

    #[arg(
        long,
        value_enum,
        default_value = "legacy",
        help = "Bootstrap file layout expected by the target Singularity version"
    )]
    layout: Layout,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v for debug, -vv for trace)"
    )]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    info!("input = {}", cli.input);
    info!("output = {}", cli.output.display());
    info!("unprivileged = {}", cli.unprivileged);

    if !cli.add.is_empty() {
        warn!(
            "--add is accepted but not implemented yet; ignoring {} path(s)",
            cli.add.len()
        );
    }

    match (cli.unprivileged, cli.layout) {
        (false, Layout::Legacy) => run(DockerSource::new()?, LegacyLayout, &cli),
        (false, Layout::SingularityD) => run(DockerSource::new()?, SingularityDLayout::new()?, &cli),
        (true, Layout::Legacy) => run(AciSource::new()?, LegacyLayout, &cli),
        (true, Layout::SingularityD) => run(AciSource::new()?, SingularityDLayout::new()?, &cli),
    }
}

fn run<S: Source, L: BootstrapLayout>(source: S, layout: L, cli: &Cli) -> Result<()> {
    let converter = ImageToBundleConverter::new(source, layout);
    converter.convert(&cli.input, &cli.output)
}
