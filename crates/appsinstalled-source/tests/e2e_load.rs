//! End-to-end tests for loading installed-apps logs into sharded memcached.

mod common;

use appsinstalled_types::decode_user_apps;
use common::{write_gz, FakeCluster, GatedSink};
use memc_load_source::{
    load_file, sync_with, Config, EndpointRegistry, FileSource, LoadTicket, ResolvedSource,
    RetryPolicy, ShardRouter, ShardStats, ShardWriter, UnreadablePolicy, WriteRequest,
    WriterOptions,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_test::assert_err;
use tokio_util::sync::CancellationToken;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter("memc_load_source=debug")
        .try_init()
        .ok();
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        sources: vec![FileSource::parse(&format!(
            "{}/*.tsv.gz",
            dir.path().display()
        ))],
        workers: 2,
        buffer_size: 4,
        retry: RetryPolicy {
            retries: 3,
            base_delay: Duration::from_millis(1),
        },
        ..Config::default()
    }
}

#[tokio::test]
async fn test_load_file_routes_and_counts_unknown_type() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = write_gz(
        dir.path(),
        "20170929000000.tsv.gz",
        &[
            "idfa\te7e1a50c0ec2747ca56cd9e1558c0d7c\t67.7835424444\t-22.8044005471\t1,2,3",
            "unknown_type\tf5ae5fe6122bb20d08ff2c2ec43fb4c4\t-104.68583244\t-51.24448376\t4,5",
        ],
    );

    let cluster = FakeCluster::default();
    let (router, workers) = ShardRouter::spawn(
        &EndpointRegistry::default(),
        |addr| cluster.sink(addr),
        WriterOptions::default(),
    );
    let router = Arc::new(router);

    let stats = load_file(&ResolvedSource::new(path.clone()), LoadTicket(0), &router)
        .await
        .unwrap();

    assert_eq!(stats.path, path);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.errors, 1);

    let payload = cluster
        .get("127.0.0.1:33013", "idfa:e7e1a50c0ec2747ca56cd9e1558c0d7c")
        .expect("idfa record stored");
    let user_apps = decode_user_apps(&payload).unwrap();
    assert_eq!(user_apps.apps, vec![1, 2, 3]);
    assert_eq!(user_apps.lat, 67.7835424444);
    assert_eq!(user_apps.lon, -22.8044005471);
    assert_eq!(cluster.total_len(), 1);

    // The loader leaves writers running; they stop once the router is gone.
    drop(router);
    let totals = workers.join().await.unwrap();
    let idfa = totals.iter().find(|(name, _)| name == "idfa").unwrap();
    assert_eq!(idfa.1, ShardStats { processed: 1, errors: 0 });
}

#[tokio::test]
async fn test_load_file_skips_blank_and_counts_bad_lines() {
    let dir = TempDir::new().unwrap();
    let path = write_gz(
        dir.path(),
        "mixed.tsv.gz",
        &[
            "gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424",
            "",
            "   ",
            "gaid\tonly\tfour\tfields",
            "\tmissing-type\t1.0\t2.0\t1",
            "adid\tbadlat\tnorth\t2.0\t1",
            "dvid\tgarbage-apps\t1.0\t2.0\tx,y",
        ],
    );

    let cluster = FakeCluster::default();
    let (router, _workers) = ShardRouter::spawn(
        &EndpointRegistry::default(),
        |addr| cluster.sink(addr),
        WriterOptions::default(),
    );
    let router = Arc::new(router);

    let stats = load_file(&ResolvedSource::new(path), LoadTicket(7), &router)
        .await
        .unwrap();

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.errors, 3);

    let payload = cluster
        .get("127.0.0.1:33016", "dvid:garbage-apps")
        .expect("record with no valid apps is still stored");
    assert!(decode_user_apps(&payload).unwrap().apps.is_empty());
}

#[tokio::test]
async fn test_load_file_unreadable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.tsv.gz");
    std::fs::write(&path, b"idfa\tplain\t1\t2\t3\n").unwrap();

    let cluster = FakeCluster::default();
    let (router, _workers) = ShardRouter::spawn(
        &EndpointRegistry::default(),
        |addr| cluster.sink(addr),
        WriterOptions::default(),
    );
    let router = Arc::new(router);

    let result = load_file(&ResolvedSource::new(path), LoadTicket(0), &router).await;
    assert_err!(result);
    assert_eq!(cluster.calls(), 0);
}

#[tokio::test]
async fn test_full_queue_blocks_producer_without_loss() {
    let gate = Arc::new(Semaphore::new(0));
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = GatedSink {
        gate: gate.clone(),
        written: written.clone(),
    };
    let options = WriterOptions {
        buffer_size: 2,
        ..WriterOptions::default()
    };
    let (writer, _handle) = ShardWriter::spawn("idfa", sink, options);

    let request = |i: usize| WriteRequest {
        ticket: LoadTicket(1),
        key: format!("idfa:{i}"),
        value: vec![],
    };

    // The writer holds at most one item in flight plus `buffer_size` queued.
    let mut accepted = 0;
    for i in 0..10 {
        match tokio::time::timeout(Duration::from_millis(50), writer.enqueue(request(i))).await {
            Ok(result) => {
                result.unwrap();
                accepted += 1;
            }
            Err(_) => break,
        }
    }
    assert!(accepted >= 2 && accepted <= 3, "accepted {accepted}");
    assert!(written.lock().unwrap().is_empty());

    // Let the store drain, then queue the rest.
    gate.add_permits(10);
    for i in accepted..10 {
        writer.enqueue(request(i)).await.unwrap();
    }
    let stats = writer.drain(LoadTicket(1), 10).await.unwrap();

    assert_eq!(stats, ShardStats { processed: 10, errors: 0 });
    let written = written.lock().unwrap().clone();
    let expected: Vec<String> = (0..10).map(|i| format!("idfa:{i}")).collect();
    assert_eq!(written, expected);
}

#[tokio::test]
async fn test_sync_loads_and_renames_every_file() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut lines_a = Vec::new();
    let mut lines_b = Vec::new();
    for i in 0..200 {
        lines_a.push(format!("idfa\tdev-a-{i}\t1.0\t2.0\t{i},{}", i + 1));
        lines_b.push(format!("gaid\tdev-b-{i}\t3.0\t4.0\t{i}"));
    }
    let lines_a: Vec<&str> = lines_a.iter().map(String::as_str).collect();
    let mut lines_b: Vec<&str> = lines_b.iter().map(String::as_str).collect();
    // 10 bad lines out of 200 good ones: 5% error rate.
    lines_b.extend(std::iter::repeat("unknown_type\tx\t1\t2\t3").take(10));

    let a = write_gz(dir.path(), "a.tsv.gz", &lines_a);
    let b = write_gz(dir.path(), "b.tsv.gz", &lines_b);
    let c = write_gz(dir.path(), "c.tsv.gz", &["adid\tdev-c\t5.0\t6.0\t9"]);
    // Already processed, must be ignored.
    write_gz(dir.path(), ".d.tsv.gz", &["dvid\tdev-d\t5.0\t6.0\t9"]);

    let cluster = FakeCluster::default();
    let summary = sync_with(
        test_config(&dir),
        |addr| cluster.sink(addr),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.files_loaded, 3);
    assert_eq!(summary.files_high_error, 1);
    assert_eq!(summary.files_unreadable, 0);
    assert_eq!(summary.files_not_renamed, 0);
    assert_eq!(summary.processed, 401);
    assert_eq!(summary.errors, 10);

    for original in [&a, &b, &c] {
        assert!(!original.exists());
        let name = original.file_name().unwrap().to_str().unwrap();
        assert!(dir.path().join(format!(".{name}")).exists());
    }

    assert_eq!(cluster.len("127.0.0.1:33013"), 200);
    assert_eq!(cluster.len("127.0.0.1:33014"), 200);
    assert_eq!(cluster.len("127.0.0.1:33015"), 1);
    assert_eq!(cluster.len("127.0.0.1:33016"), 0);

    let shard_names: Vec<_> = summary.shards.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(shard_names, vec!["adid", "dvid", "gaid", "idfa"]);
}

#[tokio::test]
async fn test_sync_retries_transient_failures() {
    let dir = TempDir::new().unwrap();
    write_gz(dir.path(), "a.tsv.gz", &["idfa\tdev\t1.0\t2.0\t1"]);

    let cluster = FakeCluster::default();
    let summary = sync_with(
        test_config(&dir),
        |addr| cluster.flaky_sink(addr, 2),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.errors, 0);
    assert!(cluster.get("127.0.0.1:33013", "idfa:dev").is_some());
}

#[tokio::test]
async fn test_sync_counts_exhausted_retries_as_errors() {
    let dir = TempDir::new().unwrap();
    write_gz(
        dir.path(),
        "a.tsv.gz",
        &["idfa\tdev\t1.0\t2.0\t1", "gaid\tdev\t1.0\t2.0\t1"],
    );

    let cluster = FakeCluster::default();
    let summary = sync_with(
        test_config(&dir),
        |addr| {
            if addr == "127.0.0.1:33013" {
                cluster.flaky_sink(addr, u32::MAX)
            } else {
                cluster.sink(addr)
            }
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.errors, 1);
    // 4 attempts for idfa, 1 for gaid.
    assert_eq!(cluster.calls(), 5);
    // Write failures are advisory; the file is still marked as loaded.
    assert!(dir.path().join(".a.tsv.gz").exists());
}

#[tokio::test]
async fn test_sync_no_files_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut connected = 0;
    let cluster = FakeCluster::default();

    let summary = sync_with(
        test_config(&dir),
        |addr| {
            connected += 1;
            cluster.sink(addr)
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.files_loaded, 0);
    assert_eq!(connected, 0);
}

#[tokio::test]
async fn test_sync_unreadable_file_aborts() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a_broken.tsv.gz"), b"not gzip").unwrap();
    write_gz(dir.path(), "b.tsv.gz", &["idfa\tdev\t1.0\t2.0\t1"]);

    let cluster = FakeCluster::default();
    let mut config = test_config(&dir);
    config.workers = 1;

    let result = sync_with(config, |addr| cluster.sink(addr), CancellationToken::new()).await;

    assert_err!(result);
    assert!(dir.path().join("a_broken.tsv.gz").exists());
}

#[tokio::test]
async fn test_sync_unreadable_file_skipped() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a_broken.tsv.gz"), b"not gzip").unwrap();
    write_gz(dir.path(), "b.tsv.gz", &["idfa\tdev\t1.0\t2.0\t1"]);

    let cluster = FakeCluster::default();
    let mut config = test_config(&dir);
    config.on_unreadable = UnreadablePolicy::Skip;

    let summary = sync_with(config, |addr| cluster.sink(addr), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.files_unreadable, 1);
    assert_eq!(summary.files_loaded, 1);
    assert!(dir.path().join("a_broken.tsv.gz").exists());
    assert!(dir.path().join(".b.tsv.gz").exists());
}

#[tokio::test]
async fn test_sync_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    write_gz(
        dir.path(),
        "a.tsv.gz",
        &["idfa\tdev\t1.0\t2.0\t1", "gaid\tdev\t1.0\t2.0\t1"],
    );

    let cluster = FakeCluster::default();
    let mut config = test_config(&dir);
    config.dry_run = true;

    let summary = sync_with(config, |addr| cluster.sink(addr), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.errors, 0);
    assert_eq!(cluster.calls(), 0);
}

#[tokio::test]
async fn test_sync_after_shutdown_starts_nothing() {
    let dir = TempDir::new().unwrap();
    let path = write_gz(dir.path(), "a.tsv.gz", &["idfa\tdev\t1.0\t2.0\t1"]);

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let cluster = FakeCluster::default();
    let summary = sync_with(test_config(&dir), |addr| cluster.sink(addr), shutdown)
        .await
        .unwrap();

    assert_eq!(summary.files_loaded, 0);
    assert!(path.exists());
    assert_eq!(cluster.calls(), 0);
}

#[tokio::test]
async fn test_rename_happens_after_all_writes() {
    use memcache_sink::MemcacheSink;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct WatchingSink {
        watched: PathBuf,
        renamed_early: Arc<AtomicBool>,
        writes: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl MemcacheSink for WatchingSink {
        async fn set(&mut self, _key: &str, _value: &[u8]) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if !self.watched.exists() {
                self.renamed_early.store(true, Ordering::SeqCst);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn endpoint(&self) -> &str {
            "watching:0"
        }
    }

    let dir = TempDir::new().unwrap();
    let lines: Vec<String> = (0..50)
        .map(|i| format!("idfa\tdev-{i}\t1.0\t2.0\t1"))
        .collect();
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    let path = write_gz(dir.path(), "a.tsv.gz", &lines);

    let renamed_early = Arc::new(AtomicBool::new(false));
    let writes = Arc::new(AtomicU32::new(0));
    let summary = sync_with(
        test_config(&dir),
        |_addr| WatchingSink {
            watched: path.clone(),
            renamed_early: renamed_early.clone(),
            writes: writes.clone(),
        },
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.processed, 50);
    assert_eq!(writes.load(Ordering::SeqCst), 50);
    assert!(!renamed_early.load(Ordering::SeqCst));
    assert!(!path.exists());
    assert!(dir.path().join(".a.tsv.gz").exists());
}
