use std::{
    process,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlcache::{
    cache::{CacheConfig, CachedRow, Query, QueryCache},
    config,
    infra::{error::InfraError, telemetry},
};
use tokio::task::JoinSet;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const PROBE_TABLE: &str = "probe_rows";
const PROBE_LOAD_DELAY: Duration = Duration::from_millis(25);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Config(config::ConfigArgs::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Config(_) => {
            println!("{settings:#?}");
            Ok(())
        }
        config::Command::Probe(args) => run_probe(settings, args).await,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProbeRow {
    id: u64,
    label: String,
}

impl CachedRow for ProbeRow {
    fn primary_key(&self) -> String {
        self.id.to_string()
    }
}

fn synthetic_rows(count: u64) -> Vec<ProbeRow> {
    (1..=count)
        .map(|id| ProbeRow {
            id,
            label: format!("row-{id}"),
        })
        .collect()
}

async fn run_probe(settings: config::Settings, args: config::ProbeArgs) -> Result<(), InfraError> {
    let cache = Arc::new(QueryCache::in_memory(CacheConfig::from(&settings.cache)).await?);
    let loads = Arc::new(AtomicUsize::new(0));
    let rows = args.rows;

    info!(
        instance_id = cache.instance_id(),
        concurrency = args.concurrency,
        rows,
        "Starting probe"
    );

    let list_sql = format!("SELECT * FROM {PROBE_TABLE} WHERE id <= ?");
    let mut readers = JoinSet::new();
    for _ in 0..args.concurrency.max(1) {
        let cache = Arc::clone(&cache);
        let loads = Arc::clone(&loads);
        let sql = list_sql.clone();
        readers.spawn(async move {
            let bound = [json!(rows)];
            let query = Query::new(PROBE_TABLE, &sql, &bound);
            cache
                .fetch_search(&query, || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(PROBE_LOAD_DELAY).await;
                    Ok::<_, std::convert::Infallible>(Some(synthetic_rows(rows)))
                })
                .await
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = readers.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                failed += 1;
                warn!(error = %err, "Probe read failed");
            }
            Err(err) => {
                failed += 1;
                warn!(error = %err, "Probe reader panicked");
            }
        }
    }

    let point_sql = format!("SELECT * FROM {PROBE_TABLE} WHERE id = ?");
    for id in 1..=rows {
        let pk = id.to_string();
        let bound = [json!(id)];
        let query = Query::new(PROBE_TABLE, &point_sql, &bound);
        for _ in 0..2 {
            cache
                .fetch_primary(&query, &pk, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(
                        synthetic_rows(rows).into_iter().find(|row| row.id == id),
                    )
                })
                .await?;
        }
    }

    let updated = ProbeRow {
        id: 1,
        label: "row-1-updated".to_string(),
    };
    cache.after_update(PROBE_TABLE, &[updated]).await?;
    let warm_after_write = cache
        .search_key_exists(PROBE_TABLE, &list_sql, &[json!(rows)])
        .await?;

    let stats = cache.stats().snapshot();
    info!(
        loads = loads.load(Ordering::SeqCst),
        failed,
        coalesced = stats.coalesced_hits,
        primary_hits = stats.primary_hits,
        search_hits = stats.search_hits,
        not_found_hits = stats.not_found_hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate(),
        search_warm_after_write = warm_after_write,
        "Probe finished"
    );

    Ok(())
}
