use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};
use clap_verbosity_flag::InfoLevel;
use ffs_cfg::{Backend, FileSettings, SettingsError, Transform, apply_transform};
use ffs_core::Datastore;
use ffs_ds_redb::RedbDatastore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Applies a migration to every storage config persisted by a node.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// MongoDB URI
    #[arg(long = "mongouri", env = "FFSCFG_MONGOURI", value_name = "URI")]
    mongo_uri: Option<String>,

    /// MongoDB database name
    #[arg(long = "mongodb", env = "FFSCFG_MONGODB", value_name = "NAME")]
    mongo_db: Option<String>,

    /// MongoDB collection name
    #[arg(long = "mongocollection", env = "FFSCFG_MONGOCOLLECTION", value_name = "NAME")]
    mongo_collection: Option<String>,

    /// Directory of the local datastore
    #[arg(long = "badgerrepo", env = "FFSCFG_BADGERREPO", value_name = "PATH")]
    badger_repo: Option<PathBuf>,

    /// Avoid any write to the datastore
    #[arg(
        long,
        env = "FFSCFG_DRYRUN",
        action = ArgAction::SetTrue,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    dryrun: bool,

    /// Migration to apply [default: bump-add-timeout]
    #[arg(long, env = "FFSCFG_TRANSFORM", value_enum)]
    transform: Option<TransformKind>,

    /// Parameter of the migration: seconds for bump-add-timeout, attoFIL
    /// for clamp-unlimited-price [default: 480]
    #[arg(long, env = "FFSCFG_VALUE", value_name = "N")]
    value: Option<u64>,

    /// TOML file with defaults for any of the options above
    #[arg(short, long, env = "FFSCFG_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransformKind {
    /// Raise Hot.Ipfs.AddTimeout to at least the given value
    BumpAddTimeout,
    /// Set a zero Cold.Filecoin.MaxPrice to the given value
    ClampUnlimitedPrice,
}

const DEFAULT_VALUE: u64 = 480;

struct RunSettings {
    backend: Backend,
    dry_run: bool,
    kind: TransformKind,
    value: u64,
}

impl RunSettings {
    /// Flags and env (already merged by clap) win over the file.
    fn merge(cli: &Cli, file: FileSettings) -> anyhow::Result<Self> {
        let mongo_uri = cli.mongo_uri.clone().or(file.mongouri);
        let mongo_db = cli.mongo_db.clone().or(file.mongodb);
        let mongo_collection = cli.mongo_collection.clone().or(file.mongocollection);
        let badger_repo = cli.badger_repo.clone().or(file.badgerrepo);

        let backend = Backend::select(
            mongo_uri.as_deref(),
            mongo_db.as_deref(),
            mongo_collection.as_deref(),
            badger_repo.as_deref(),
        )?;

        let kind = match (cli.transform, file.transform) {
            (Some(kind), _) => kind,
            (None, Some(name)) => TransformKind::from_str(&name, true)
                .map_err(|err| anyhow::anyhow!("invalid transform {name:?} in config file: {err}"))?,
            (None, None) => TransformKind::BumpAddTimeout,
        };

        Ok(Self {
            backend,
            dry_run: cli.dryrun || file.dryrun.unwrap_or(false),
            kind,
            value: cli.value.or(file.value).unwrap_or(DEFAULT_VALUE),
        })
    }

    fn transform(&self) -> anyhow::Result<Transform> {
        Ok(match self.kind {
            TransformKind::BumpAddTimeout => {
                let seconds = i64::try_from(self.value).context("add timeout out of range")?;
                ffs_cfg::bump_add_timeout(seconds)
            }
            TransformKind::ClampUnlimitedPrice => ffs_cfg::clamp_unlimited_price(self.value),
        })
    }
}

fn open_datastore(backend: &Backend) -> anyhow::Result<Arc<dyn Datastore>> {
    match backend {
        Backend::Local { repo } => {
            info!(repo = %repo.display(), "opening local datastore");
            let ds = RedbDatastore::open(repo)
                .with_context(|| format!("opening local datastore at {}", repo.display()))?;
            Ok(Arc::new(ds))
        }
        Backend::Mongo { .. } => Err(SettingsError::Unsupported(backend.name()).into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting ffscfg");

    let file = match &cli.config {
        Some(path) => FileSettings::load(path)?,
        None => FileSettings::default(),
    };
    let settings = RunSettings::merge(&cli, file)?;
    let transform = settings.transform()?;
    let ds = open_datastore(&settings.backend).context("opening datastore")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, waiting for in-flight records");
                cancel.cancel();
            }
        }
    });

    info!(transform = ?settings.kind, value = settings.value, dry_run = settings.dry_run, "applying transformation");
    let result = apply_transform(ds.clone(), settings.dry_run, transform, cancel).await;

    if let Err(err) = ds.close().await {
        warn!("closing datastore: {err}");
    }

    let count = result.context("applying transformation")?;
    info!("transformation modified {count} storage configs");
    if settings.dry_run {
        warn!("dry run: no changes applied");
    }
    Ok(())
}
