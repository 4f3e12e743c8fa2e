//! One file's blame computation.

use super::executor::{read_to_string_lossy, GitCommand, ProcessHandle, RunningProcess};
use super::parser::IncrementalParser;
use super::GitError;
use blame_model::Blame;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, OnceCell};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Runs `git blame` for a single file at most once.
///
/// The result is either the full [`Blame`] or nothing: a process error, a
/// cancellation or a failure to resolve the path all end in `None`, never in a
/// partially filled blame.
pub struct BlamedFile {
    file_name: PathBuf,
    git: Arc<GitCommand>,
    store: OnceCell<Option<Arc<Blame>>>,
    killed: AtomicBool,
    cancel: Notify,
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
}

impl BlamedFile {
    pub fn new(file_name: impl Into<PathBuf>, git: Arc<GitCommand>) -> Self {
        Self {
            file_name: file_name.into(),
            git,
            store: OnceCell::new(),
            killed: AtomicBool::new(false),
            cancel: Notify::new(),
            process: Mutex::new(None),
        }
    }

    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Blame the file, or return the result of the earlier run.
    pub async fn get_blame(&self) -> Option<Arc<Blame>> {
        self.store
            .get_or_init(|| async {
                match self.blame().await {
                    Ok(blame) => Some(Arc::new(blame)),
                    Err(e) => {
                        if !e.is_quiet() {
                            tracing::error!("{}", e);
                        }
                        self.dispose();
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Kill the running process, if any. A pending [`get_blame`](Self::get_blame)
    /// settles to `None`.
    pub fn dispose(&self) {
        self.killed.store(true, Ordering::SeqCst);
        if let Some(mut handle) = self.process.lock().take() {
            handle.kill();
        }
        self.cancel.notify_one();
    }

    async fn blame(&self) -> Result<Blame, GitError> {
        if self.is_killed() {
            return Err(GitError::Killed);
        }

        let real_path = tokio::fs::canonicalize(&self.file_name).await?;
        let current_user = self.git.user_email(&real_path).await;
        let revs_file = self.git.revs_file(&real_path).await;

        let RunningProcess {
            mut stdout,
            mut stderr,
            handle,
        } = self.git.blame_process(&real_path, revs_file.as_deref())?;

        {
            let mut slot = self.process.lock();
            if self.is_killed() {
                let mut handle = handle;
                handle.kill();
                return Err(GitError::Killed);
            }
            *slot = Some(handle);
        }

        let mut parser = IncrementalParser::new(current_user);
        let mut blame = Blame::new();

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.notified() => None,
            outcome = async {
                tokio::join!(
                    async {
                        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
                        loop {
                            let read = stdout.read(&mut buffer).await?;
                            if read == 0 {
                                break;
                            }
                            blame.extend(parser.feed_cooperative(&buffer[..read]).await);
                        }
                        blame.extend(parser.finish());
                        Ok::<(), std::io::Error>(())
                    },
                    read_to_string_lossy(&mut stderr)
                )
            } => Some(outcome),
        };

        self.process.lock().take();

        let Some((stdout_result, stderr_result)) = outcome else {
            return Err(GitError::Killed);
        };

        let error_output = stderr_result?;
        if !error_output.trim().is_empty() {
            parser.abort();
            return Err(GitError::ProcessError(error_output.trim().to_string()));
        }
        stdout_result?;

        if self.is_killed() {
            return Err(GitError::Killed);
        }

        if real_path == self.file_name {
            tracing::info!("Blamed {}", real_path.display());
        } else {
            tracing::info!(
                "Blamed {} (resolved via symlink from {})",
                real_path.display(),
                self.file_name.display()
            );
        }

        Ok(blame)
    }
}

impl Drop for BlamedFile {
    fn drop(&mut self) {
        if let Some(mut handle) = self.process.get_mut().take() {
            handle.kill();
        }
    }
}
