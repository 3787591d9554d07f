use roost_store::{
    ConsistencyManager, HierarchyWalker, RoostConfig, Store, StoreKind, SyncEngine, TraversalMode,
};
use std::path::{Path, PathBuf};

const USAGE: &str = "usage: roost-sync <sync|audit|rebuild> <aggregate-dir> [config.yaml]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(command), Some(root)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let root = PathBuf::from(root);

    // Load configuration (file if given and present, otherwise environment)
    let config = match args.next() {
        Some(path) if Path::new(&path).exists() => {
            tracing::info!("Loading configuration from: {}", path);
            RoostConfig::load_from_file(&path)?
        }
        Some(path) => {
            tracing::warn!("Config file {} not found, loading from environment variables", path);
            RoostConfig::load_from_env()?
        }
        None => RoostConfig::load_from_env()?,
    };

    match command.as_str() {
        "sync" => sync(&root, &config),
        "audit" => audit(&root, &config),
        "rebuild" => rebuild(&root, &config),
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

fn sync(root: &Path, config: &RoostConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut aggregate = Store::open(root, StoreKind::Aggregate, config)?;
    tracing::info!(outcome = ?aggregate.open_outcome(), "aggregate opened");

    let sources: Vec<PathBuf> = HierarchyWalker::discover(root, TraversalMode::SourceDiscovery)?
        .into_iter()
        .map(|s| s.path)
        .collect();
    tracing::info!("Discovered {} sources below {}", sources.len(), root.display());

    let summary = SyncEngine::new(config.sync.clone()).sync(&mut aggregate, &sources)?;
    for failure in &summary.errors {
        tracing::warn!(source = %failure.source.display(), "{}", failure.message);
    }
    tracing::info!(
        scanned = summary.sources_scanned,
        imported = summary.sources_imported,
        unchanged = summary.sources_skipped_unchanged,
        records = summary.records_imported,
        vectors_added = summary.vectors_added,
        vectors_deduplicated = summary.vectors_deduplicated,
        units = summary.units_imported,
        integrity_warnings = summary.integrity_warnings,
        failed = summary.errors.len(),
        "Sync complete"
    );

    if aggregate.index_state().is_ready() {
        aggregate.consolidate_index()?;
    }
    Ok(())
}

fn audit(root: &Path, config: &RoostConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open_read_only(root, StoreKind::Aggregate, config)?;
    let report = ConsistencyManager::new(store.meter(), false).audit(&store)?;

    tracing::info!(
        vectors = report.vector_count,
        records = report.record_count,
        index = ?report.index_len,
        "Audit finished"
    );
    if report.is_clean() {
        tracing::info!("Store is consistent");
        return Ok(());
    }
    tracing::warn!(?report, "Store has inconsistencies");
    std::process::exit(1);
}

fn rebuild(root: &Path, config: &RoostConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = Store::open(root, StoreKind::Aggregate, config)?;
    store.rebuild_index()?;
    tracing::info!(vectors = ?store.index_len(), "Index rebuilt");
    Ok(())
}
