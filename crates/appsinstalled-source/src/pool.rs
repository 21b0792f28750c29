//! Fixed-size pool of file loaders.

use crate::loader::{load_file, FileStats};
use crate::router::ShardRouter;
use crate::writer::LoadTicket;
use memc_load_file::ResolvedSource;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of one file handed back by a pool worker.
pub struct FileOutcome {
    pub source: ResolvedSource,
    pub ticket: LoadTicket,
    pub result: anyhow::Result<FileStats>,
}

type Backlog = Arc<Mutex<VecDeque<(LoadTicket, ResolvedSource)>>>;

/// Workers pulling files from a shared backlog and loading them one at a time.
///
/// Each file is taken by exactly one worker and produces exactly one
/// [`FileOutcome`]. Cancelling `shutdown` stops workers before their next
/// file; a file already loading is finished.
pub struct FilePool {
    results: mpsc::Receiver<FileOutcome>,
    tasks: JoinSet<()>,
}

impl FilePool {
    pub fn spawn(
        files: Vec<ResolvedSource>,
        workers: usize,
        router: Arc<ShardRouter>,
        shutdown: CancellationToken,
    ) -> Self {
        let worker_count = workers.max(1).min(files.len());
        let backlog: Backlog = Arc::new(Mutex::new(
            files
                .into_iter()
                .enumerate()
                .map(|(i, source)| (LoadTicket(i as u64), source))
                .collect(),
        ));
        let (tx, results) = mpsc::channel(workers.max(1));

        let mut tasks = JoinSet::new();
        for id in 0..worker_count {
            tasks.spawn(run_worker(
                id,
                backlog.clone(),
                router.clone(),
                tx.clone(),
                shutdown.clone(),
            ));
        }

        Self { results, tasks }
    }

    /// Next finished file, or `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<FileOutcome> {
        self.results.recv().await
    }

    /// Wait for the workers to exit.
    pub async fn join(mut self) -> anyhow::Result<()> {
        self.results.close();
        while let Some(result) = self.tasks.join_next().await {
            result.map_err(|e| anyhow::anyhow!("File pool worker panicked: {e}"))?;
        }
        Ok(())
    }
}

async fn run_worker(
    id: usize,
    backlog: Backlog,
    router: Arc<ShardRouter>,
    results: mpsc::Sender<FileOutcome>,
    shutdown: CancellationToken,
) {
    debug!("[worker {id}] started");
    loop {
        if shutdown.is_cancelled() {
            info!("[worker {id}] Shutdown requested, not starting further files");
            break;
        }

        let Some((ticket, source)) = backlog.lock().await.pop_front() else {
            break;
        };

        let result = load_file(&source, ticket, &router).await;
        let outcome = FileOutcome {
            source,
            ticket,
            result,
        };
        if results.send(outcome).await.is_err() {
            break;
        }
    }
    debug!("[worker {id}] finished");
}
