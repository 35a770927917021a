use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use health::HealthRegistry;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::consumer::EventConsumer;
use crate::dedup::DedupStore;
use crate::queue::EventQueue;
use crate::router;
use crate::service::IngestService;
use crate::sink::{DelaySink, EventSink, LogSink};
use crate::time::SystemTime;

/// Builds the whole pipeline and serves it on the listener until the
/// shutdown future resolves. A dedup store that cannot be opened or
/// initialized aborts startup.
pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let timesource = Arc::new(SystemTime {});

    let store = Arc::new(
        DedupStore::new(&config.database_path, timesource.clone())
            .await
            .expect("failed to open dedup database"),
    );
    store
        .initialize()
        .await
        .expect("failed to initialize dedup database");

    let queue = Arc::new(EventQueue::new(config.queue_capacity));

    let sink: Arc<dyn EventSink + Send + Sync> = if config.sink_delay_ms > 0 {
        Arc::new(DelaySink::new(Duration::from_millis(config.sink_delay_ms)))
    } else {
        Arc::new(LogSink {})
    };

    let liveness = HealthRegistry::new("liveness");
    let consumer_liveness = liveness
        .register("consumer".to_string(), time::Duration::seconds(30))
        .await;

    let consumer = Arc::new(EventConsumer::new(
        queue.clone(),
        store.clone(),
        sink,
        consumer_liveness,
    ));
    consumer.start().await;

    if config.cleanup_interval_secs > 0 {
        tokio::spawn(cleanup_loop(
            store.clone(),
            config.cleanup_interval_secs,
            config.cleanup_max_age_days,
        ));
    }

    let service = Arc::new(IngestService::new(
        store,
        queue,
        consumer.clone(),
        timesource,
    ));

    let app = router::router(service, liveness, config.export_prometheus);

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("failed to serve http");

    consumer.stop().await;
}

/// Periodically purges records older than the configured age.
async fn cleanup_loop(store: Arc<DedupStore>, interval_secs: u64, max_age_days: u32) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        if let Err(err) = store.cleanup_old_events(max_age_days).await {
            tracing::error!("cleanup of old events failed: {}", err);
        }
    }
}
