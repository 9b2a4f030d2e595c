/// Split / decode / merge pipeline
///
/// `Pipeline::run` splits a capture into shards inside a private workspace,
/// decodes every shard on a bounded rayon pool, and concatenates the shard
/// outputs in file-name order. The workspace is removed on every exit path.

use crate::protocol::ProtocolVersion;
use crate::split::{CaptureSplitter, SplitError};
use crate::worker::{ShardJob, ShardSummary, ShardWorker, WorkerError, DEFAULT_PROGRESS_INTERVAL};
use rayon::prelude::*;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Base name handed to the splitter; shards become `split0000`, `split0001`, ...
const SHARD_PREFIX: &str = "split";

const WORKSPACE_PREFIX: &str = "tops-workspace-";

/// Failed shards, listed one per line
#[derive(Debug)]
pub struct WorkerFailures(pub Vec<WorkerError>);

impl fmt::Display for WorkerFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} shard(s) failed", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read input {}: {source}", .path.display())]
    Input { path: PathBuf, source: io::Error },

    #[error("cannot create workspace in {}: {source}", .root.display())]
    Workspace { root: PathBuf, source: io::Error },

    #[error("splitting failed: {0}")]
    Split(#[from] SplitError),

    #[error("cannot build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("{0}")]
    Workers(WorkerFailures),

    #[error("merge failed on {}: {source}", .path.display())]
    Merge { path: PathBuf, source: io::Error },

    #[error("cannot remove workspace {}: {source}", .path.display())]
    Cleanup { path: PathBuf, source: io::Error },
}

impl PipelineError {
    /// Shard errors when the failure came from the workers
    pub fn worker_errors(&self) -> &[WorkerError] {
        match self {
            PipelineError::Workers(failures) => &failures.0,
            _ => &[],
        }
    }
}

/// Shared slot holding the live workspace path, so an interrupt handler
/// can remove it.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceRegistry {
    active: Arc<Mutex<Option<PathBuf>>>,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, path: Option<PathBuf>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = path;
    }

    pub fn active(&self) -> Option<PathBuf> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove the live workspace, if any. Returns the removed path.
    /// The path stays registered when removal fails.
    pub fn remove_active(&self) -> io::Result<Option<PathBuf>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(path) = active.as_ref() else {
            return Ok(None);
        };
        fs::remove_dir_all(path)?;
        Ok(active.take())
    }
}

/// Uniquely named scratch directory owning all shard files
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create(root: &Path) -> io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(root)?;
        Ok(Workspace { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the workspace and report failures. Dropping it deletes it too.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }

    /// Run `f` inside a fresh workspace under `root`, deleting it afterwards
    /// whether `f` succeeds or not.
    pub fn scoped<T, F>(
        root: &Path,
        registry: Option<&WorkspaceRegistry>,
        f: F,
    ) -> Result<T, PipelineError>
    where
        F: FnOnce(&Workspace) -> Result<T, PipelineError>,
    {
        let workspace = Workspace::create(root).map_err(|source| PipelineError::Workspace {
            root: root.to_path_buf(),
            source,
        })?;
        let path = workspace.path().to_path_buf();
        info!(workspace = %path.display(), "workspace created");
        if let Some(registry) = registry {
            registry.set(Some(path.clone()));
        }

        let result = f(&workspace);
        let cleanup = workspace.close();

        if let Some(registry) = registry {
            registry.set(None);
        }
        info!(workspace = %path.display(), "workspace deleted");

        match (result, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(source)) => Err(PipelineError::Cleanup { path, source }),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(source)) => {
                warn!(workspace = %path.display(), error = %source, "workspace cleanup failed");
                Err(err)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub protocol: ProtocolVersion,
    /// Worker count; `None` uses the available parallelism
    pub workers: Option<usize>,
    /// Directory the workspace is created in; `None` uses the output's directory
    pub workspace_root: Option<PathBuf>,
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            protocol: ProtocolVersion::V2,
            workers: None,
            workspace_root: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Totals over all shards of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub shards: usize,
    pub frames: u64,
    pub messages: u64,
    pub gaps: u64,
}

impl PipelineSummary {
    fn from_shards(shards: &[ShardSummary]) -> Self {
        PipelineSummary {
            shards: shards.len(),
            frames: shards.iter().map(|s| s.frames).sum(),
            messages: shards.iter().map(|s| s.messages).sum(),
            gaps: shards.iter().map(|s| s.gaps).sum(),
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    splitter: Box<dyn CaptureSplitter>,
    registry: Option<WorkspaceRegistry>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, splitter: impl CaptureSplitter + 'static) -> Self {
        Pipeline {
            config,
            splitter: Box::new(splitter),
            registry: None,
        }
    }

    /// Publish the live workspace path to `registry` while running
    pub fn with_registry(mut self, registry: WorkspaceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn worker_count(&self) -> usize {
        self.config
            .workers
            .filter(|&n| n > 0)
            .or_else(|| thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
    }

    fn workspace_root(&self, output: &Path) -> PathBuf {
        if let Some(root) = &self.config.workspace_root {
            return root.clone();
        }
        match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn run(&self, input: &Path, output: &Path) -> Result<PipelineSummary, PipelineError> {
        let started = Instant::now();
        let input_size = fs::metadata(input)
            .map_err(|source| PipelineError::Input {
                path: input.to_path_buf(),
                source,
            })?
            .len();
        let workers = self.worker_count();
        let root = self.workspace_root(output);

        let summary = Workspace::scoped(&root, self.registry.as_ref(), |workspace| {
            self.run_in(workspace, input, input_size, output, workers)
        })?;

        info!(
            shards = summary.shards,
            frames = summary.frames,
            messages = summary.messages,
            elapsed_ms = started.elapsed().as_millis() as u64,
            output = %output.display(),
            "conversion complete"
        );
        Ok(summary)
    }

    fn run_in(
        &self,
        workspace: &Workspace,
        input: &Path,
        input_size: u64,
        output: &Path,
        workers: usize,
    ) -> Result<PipelineSummary, PipelineError> {
        let max_shard_bytes = input_size.div_ceil(workers as u64).max(1);
        info!(
            input = %input.display(),
            workers,
            max_shard_bytes,
            "splitting capture"
        );
        let prefix = workspace.path().join(SHARD_PREFIX);
        let mut shards = self.splitter.split(input, &prefix, max_shard_bytes)?;
        shards.sort();

        let jobs: Vec<ShardJob> = shards
            .into_iter()
            .enumerate()
            .map(|(index, shard)| ShardJob::new(index, shard))
            .collect();

        let summaries = self.run_jobs(&jobs, workers)?;

        info!(shards = jobs.len(), "decoding done, merging output");
        merge_outputs(&jobs, output)?;
        Ok(PipelineSummary::from_shards(&summaries))
    }

    /// Run every job on a pool of `workers` threads and wait for all of them
    fn run_jobs(
        &self,
        jobs: &[ShardJob],
        workers: usize,
    ) -> Result<Vec<ShardSummary>, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("shard-worker-{i}"))
            .build()?;
        let worker = ShardWorker::new(self.config.protocol)
            .with_progress_interval(self.config.progress_interval);

        info!(
            jobs = jobs.len(),
            workers,
            protocol = %self.config.protocol,
            "starting shard workers"
        );
        let results: Vec<Result<ShardSummary, WorkerError>> =
            pool.install(|| jobs.par_iter().map(|job| worker.run(job)).collect());

        let mut summaries = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    warn!(shard = %err.shard().display(), error = %err, "shard failed");
                    failures.push(err);
                }
            }
        }

        if failures.is_empty() {
            Ok(summaries)
        } else {
            Err(PipelineError::Workers(WorkerFailures(failures)))
        }
    }
}

/// Concatenate the jobs' outputs into `output`, ordered by output file name.
/// A failed merge leaves no `output` behind.
pub fn merge_outputs(jobs: &[ShardJob], output: &Path) -> Result<(), PipelineError> {
    let mut outputs: Vec<&Path> = jobs.iter().map(|job| job.output.as_path()).collect();
    outputs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let result = concat_files(&outputs, output);
    if result.is_err() {
        if let Err(e) = fs::remove_file(output) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(output = %output.display(), error = %e, "cannot remove partial output");
            }
        }
    }
    result
}

fn concat_files(inputs: &[&Path], output: &Path) -> Result<(), PipelineError> {
    let merge_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| PipelineError::Merge { path, source }
    };

    let file = File::create(output).map_err(merge_err(output))?;
    let mut merged = BufWriter::with_capacity(1 << 20, file);
    for &input in inputs {
        debug!(shard_output = %input.display(), "merging");
        let mut reader = BufReader::new(File::open(input).map_err(merge_err(input))?);
        io::copy(&mut reader, &mut merged).map_err(merge_err(output))?;
    }
    merged.flush().map_err(merge_err(output))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSplitter;

    impl CaptureSplitter for FailingSplitter {
        fn split(&self, _: &Path, _: &Path, _: u64) -> Result<Vec<PathBuf>, SplitError> {
            Err(SplitError::Io(io::Error::new(io::ErrorKind::Other, "boom")))
        }
    }

    #[test]
    fn test_workspace_removed_after_split_failure() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in.pcap");
        fs::write(&input, b"not a capture").unwrap();
        let ws_root = root.path().join("ws");
        fs::create_dir(&ws_root).unwrap();

        let config = PipelineConfig {
            workers: Some(2),
            workspace_root: Some(ws_root.clone()),
            ..PipelineConfig::default()
        };
        let registry = WorkspaceRegistry::new();
        let pipeline = Pipeline::new(config, FailingSplitter).with_registry(registry.clone());
        let err = pipeline.run(&input, &root.path().join("out.json")).unwrap_err();

        assert!(matches!(err, PipelineError::Split(_)));
        assert_eq!(fs::read_dir(&ws_root).unwrap().count(), 0);
        assert!(registry.active().is_none());
    }

    #[test]
    fn test_missing_input() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default(), FailingSplitter);
        let err = pipeline
            .run(&root.path().join("missing.pcap"), &root.path().join("out.json"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input { .. }));
    }

    #[test]
    fn test_worker_count_override() {
        let config = PipelineConfig {
            workers: Some(3),
            ..PipelineConfig::default()
        };
        assert_eq!(Pipeline::new(config, FailingSplitter).worker_count(), 3);

        let auto = Pipeline::new(PipelineConfig::default(), FailingSplitter);
        assert!(auto.worker_count() >= 1);
    }

    #[test]
    fn test_scoped_workspace_removed_on_panic() {
        let root = tempfile::tempdir().unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = Workspace::scoped(root.path(), None, |ws| -> Result<(), PipelineError> {
                fs::write(ws.path().join("split0000"), b"x").unwrap();
                panic!("worker blew up");
            });
        }));
        assert!(result.is_err());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_registry_remove_active() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("tops-workspace-x");
        fs::create_dir(&dir).unwrap();
        let registry = WorkspaceRegistry::new();
        registry.set(Some(dir.clone()));
        assert_eq!(registry.remove_active().unwrap(), Some(dir.clone()));
        assert!(!dir.exists());
        assert_eq!(registry.remove_active().unwrap(), None);
    }

    #[test]
    fn test_registry_keeps_path_when_removal_fails() {
        let root = tempfile::tempdir().unwrap();
        // a plain file cannot be removed as a directory
        let not_a_dir = root.path().join("tops-workspace-file");
        fs::write(&not_a_dir, b"x").unwrap();
        let registry = WorkspaceRegistry::new();
        registry.set(Some(not_a_dir.clone()));

        assert!(registry.remove_active().is_err());
        assert_eq!(registry.active(), Some(not_a_dir));
    }

    #[test]
    fn test_failed_merge_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let present = ShardJob::new(0, dir.path().join("split0000"));
        fs::write(&present.output, b"{\"shard\":0}\n").unwrap();
        let missing = ShardJob::new(1, dir.path().join("split0001"));

        let output = dir.path().join("out.json");
        let err = merge_outputs(&[present, missing], &output).unwrap_err();
        assert!(matches!(err, PipelineError::Merge { .. }));
        assert!(err.to_string().contains("split0001.json"));
        assert!(!output.exists());
    }
}
