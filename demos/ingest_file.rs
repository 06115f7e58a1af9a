//! Ingest a MARC file into a datastore
//!
//! Reads an ISO 2709 file (optionally gzip-compressed) and ingests every
//! record as a Record Group, printing the batch report.
//!
//! ```sh
//! RUST_LOG=rdacore=info cargo run --example ingest_file -- records.mrc [catalog.redb]
//! ```
//!
//! Without a database path the records go to an in-memory store and a
//! summary of its contents is printed instead.

use anyhow::{bail, Context};
use rdacore::store::Datastore;
use rdacore::{
    BatchConfig, BatchDriver, IngestConfig, MarcReader, MemoryStore, Orchestrator, Profiles,
    RedbStore,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        bail!("usage: ingest_file <records.mrc[.gz]> [database.redb]");
    };
    let database = args.next();

    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn Datastore> = match &database {
        Some(path) => Arc::new(
            RedbStore::open(path).with_context(|| format!("opening database {path}"))?,
        ),
        None => memory.clone(),
    };

    let profiles = Profiles::standard().context("loading bundled rule documents")?;
    let orchestrator = Orchestrator::new(store, profiles, IngestConfig::default());
    let reader = MarcReader::open(&input).with_context(|| format!("opening {input}"))?;

    let driver = BatchDriver::new(&orchestrator, BatchConfig::default().with_progress_interval(500));
    let report = driver.run(reader).context("batch failed")?;

    println!("\n=== Batch report ===");
    println!("Processed: {}", report.processed);
    println!("Failed:    {}", report.failed);
    println!("Skipped:   {}", report.skipped);
    println!("Requeued:  {}", report.requeued);

    if database.is_none() {
        println!("\n=== Store contents ===");
        for collection in ["rdaCore:Works", "rdaCore:Manifestations"] {
            println!("{collection}: {} members", memory.smembers(collection)?.len());
        }
        println!("Keys: {}", memory.keys()?.len());
    }
    Ok(())
}
