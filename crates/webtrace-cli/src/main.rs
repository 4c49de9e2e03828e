// SPDX-License-Identifier: Apache-2.0
//! webtrace developer CLI: build, detect, similarity.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::must_use_candidate,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::multiple_crate_versions,
    clippy::cast_precision_loss
)]

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{presets, Cell, CellAlignment, Table};
use tracing::info;
use tracing_subscriber::EnvFilter;
use webtrace_core::{
    build_database, define, detect, nest, read_implications, render_json, render_text,
    similarity_matrix, BipartiteGraph, Corpus, DefinerConfig, DetectorConfig, Implications,
    Observations, DEFAULT_COVERAGE_BOUND, DEFAULT_SUFFICIENT_CHECKSUMS,
};
use webtrace_store::FileStore;

#[derive(Parser)]
#[command(
    name = "webtrace",
    about = "Build fingerprint databases and detect installed web applications",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest scanner output, prune the graph and write the database.
    Build {
        /// Path of the database file to write.
        db: PathBuf,
        /// Scanner output: `app \t version \t hex_sha256 [\t path \t depth]`.
        hashes: PathBuf,
        /// Exclusive checksums required to define an app-version.
        #[arg(long, default_value_t = DEFAULT_SUFFICIENT_CHECKSUMS)]
        sufficient_checksums: usize,
        /// Optional implications sidecar (JSON).
        #[arg(long)]
        implies: Option<PathBuf>,
    },
    /// Match scanned observations against a database and print the report.
    Detect {
        /// Path of the database file to read.
        db: PathBuf,
        /// Observation lines: `hex_sha256 \t absolute_path`.
        observations: PathBuf,
        /// Minimum matched/total ratio for a detection.
        #[arg(long, default_value_t = DEFAULT_COVERAGE_BOUND)]
        coverage_bound: f64,
        /// Emit the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print the checksum-overlap matrix for an app's undefined versions.
    Similarity {
        /// Scanner output to analyse.
        hashes: PathBuf,
        /// App whose undefined versions should be compared.
        app: String,
        /// Exclusive checksums required to define an app-version.
        #[arg(long, default_value_t = DEFAULT_SUFFICIENT_CHECKSUMS)]
        sufficient_checksums: usize,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Build {
            db,
            hashes,
            sufficient_checksums,
            implies,
        } => build(&db, &hashes, sufficient_checksums, implies.as_deref()),
        Command::Detect {
            db,
            observations,
            coverage_bound,
            json,
        } => run_detect(&db, &observations, coverage_bound, json),
        Command::Similarity {
            hashes,
            app,
            sufficient_checksums,
        } => similarity(&hashes, &app, sufficient_checksums),
    }
}

fn open_buffered(path: &std::path::Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn build(
    db: &std::path::Path,
    hashes: &std::path::Path,
    sufficient_checksums: usize,
    implies: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let corpus = Corpus::parse(open_buffered(hashes)?)
        .with_context(|| format!("cannot read {}", hashes.display()))?;
    let implications = match implies {
        Some(path) => read_implications(open_buffered(path)?)
            .with_context(|| format!("cannot read implications {}", path.display()))?,
        None => Implications::new(),
    };

    let config = DefinerConfig {
        sufficient_checksums,
    };
    let mut store = FileStore::create(db);
    let summary = build_database(&corpus, &config, &implications, &mut store)?;
    store.persist()?;

    info!(
        groups = summary.groups,
        coalesced = summary.coalesced_groups,
        checksums = summary.checksum_records,
        undefined = summary.undefined,
        "database written"
    );
    println!(
        "{} app-version entries ({} coalesced), {} checksums, {} undefined",
        summary.groups, summary.coalesced_groups, summary.checksum_records, summary.undefined
    );
    Ok(())
}

fn run_detect(
    db: &std::path::Path,
    observations: &std::path::Path,
    coverage_bound: f64,
    json: bool,
) -> anyhow::Result<()> {
    let store = FileStore::open(db)?;
    let observations = Observations::parse(open_buffered(observations)?)
        .with_context(|| format!("cannot read {}", observations.display()))?;

    let config = DetectorConfig { coverage_bound };
    let detection = detect(&store, &observations, &config)?;
    let tree = nest(&detection.detected);
    if json {
        println!("{}", render_json(&detection, &tree)?);
    } else {
        print!("{}", render_text(&detection, &tree));
    }
    Ok(())
}

fn similarity(
    hashes: &std::path::Path,
    app: &str,
    sufficient_checksums: usize,
) -> anyhow::Result<()> {
    let corpus = Corpus::parse(open_buffered(hashes)?)
        .with_context(|| format!("cannot read {}", hashes.display()))?;
    let mut graph = BipartiteGraph::from_corpus(&corpus);
    let outcome = define(
        &mut graph,
        &DefinerConfig {
            sufficient_checksums,
        },
    );

    // Undefined versions of the requested app, with their surviving
    // checksum sets.
    let versions: Vec<(String, Vec<webtrace_core::ChecksumDigest>)> = graph
        .app_versions()
        .filter(|(av, node)| {
            av.app == app && !outcome.defined.contains(av) && !node.checksums().is_empty()
        })
        .map(|(av, node)| {
            (
                av.version.clone(),
                node.checksums().iter().copied().collect(),
            )
        })
        .collect();
    if versions.is_empty() {
        println!("no undefined versions of {app}");
        return Ok(());
    }

    let digest_sets: Vec<Vec<webtrace_core::ChecksumDigest>> =
        versions.iter().map(|(_, digests)| digests.clone()).collect();
    let matrix = similarity_matrix(&digest_sets);

    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    let mut header = vec![Cell::new(app)];
    for (version, digests) in &versions {
        header.push(Cell::new(format!("{version}:{}", digests.len())));
    }
    table.set_header(header);
    for (i, (version, digests)) in versions.iter().enumerate() {
        let mut row = vec![Cell::new(version)];
        let own = digests.len();
        for value in &matrix[i] {
            let rendered = if *value == 0 || own == 0 {
                "0".to_string()
            } else {
                format!("{:.3}", (*value as f64) / (own as f64))
            };
            row.push(Cell::new(rendered).set_alignment(CellAlignment::Right));
        }
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}
