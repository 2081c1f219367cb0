use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use pack_indexer::{IndexOutcome, IndexPackOptions, PackIndexer};
use pack_object::ObjectChecker;
use pack_odb::MemoryStore;
use pack_utils::progress::{NoProgress, ProgressMonitor, TextProgress};

#[derive(Parser)]
#[command(
    name = "pack-index",
    about = "Index a packfile stream into a pack/index pair",
    version
)]
struct Cli {
    /// Read the pack from stdin
    #[arg(long)]
    stdin: bool,

    /// Pack file to index
    pack_file: Option<PathBuf>,

    /// Destination directory for the published pack and index
    #[arg(short = 'd', long = "dir", default_value = ".")]
    dir: PathBuf,

    /// Index version to write (1 or 2; default picks the oldest that fits)
    #[arg(long = "index-version")]
    index_version: Option<u32>,

    /// Complete a thin pack from objects already in the store
    #[arg(long = "fix-thin")]
    fix_thin: bool,

    /// Hold the published pack with a .keep file containing MSG
    #[arg(long = "keep", value_name = "MSG")]
    keep: Option<String>,

    /// Validate object structure while indexing
    #[arg(long)]
    strict: bool,

    /// Show progress on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let opts = IndexPackOptions {
        fix_thin: cli.fix_thin,
        keep_empty: false,
        index_version: cli.index_version,
        check: cli.strict.then(ObjectChecker::new),
        lock_message: cli.keep.clone(),
    };

    let store = MemoryStore::new();
    let outcome = if cli.stdin {
        let stdin = io::stdin();
        index_stream(stdin.lock(), &cli, &store, opts)?
    } else if let Some(path) = &cli.pack_file {
        index_stream(File::open(path)?, &cli, &store, opts)?
    } else {
        bail!("need a pack file or --stdin");
    };

    match outcome {
        Some(out) => println!("pack\t{}", out.name.to_hex()),
        None => eprintln!("nothing to install"),
    }
    Ok(())
}

fn index_stream<R: Read>(
    stream: R,
    cli: &Cli,
    store: &MemoryStore,
    opts: IndexPackOptions,
) -> Result<Option<IndexOutcome>> {
    let indexer = PackIndexer::new(stream, &cli.dir, store, opts)?;
    let mut progress: Box<dyn ProgressMonitor> = if cli.verbose {
        Box::new(TextProgress::new())
    } else {
        Box::new(NoProgress)
    };
    Ok(indexer.index_pack(progress.as_mut())?)
}
