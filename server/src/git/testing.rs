//! Scripted process runner for tests.

use super::executor::{ByteStream, ProcessHandle, ProcessRunner, RunningProcess, SpawnOptions};
use parking_lot::Mutex;
use std::io;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream, ReadBuf};

type Hook = Arc<dyn Fn() + Send + Sync>;

/// What a scripted `git blame` process does.
#[derive(Clone)]
pub(crate) enum FakeBlame {
    /// Write everything, then exit.
    Output { stdout: Vec<u8>, stderr: String },
    /// Write `partial` to stdout, then stay alive until killed.
    Hang { partial: Vec<u8> },
}

pub(crate) struct FakeRunner {
    git_dir: Option<String>,
    /// Work trees answering with their own git dir
    repositories: Vec<(PathBuf, String)>,
    email: String,
    blame: Mutex<FakeBlame>,
    stdout_end: Mutex<Option<Hook>>,
    spawned: Mutex<Vec<(String, Vec<String>, SpawnOptions)>>,
    kills: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub(crate) fn new(git_dir: &str) -> Self {
        Self {
            git_dir: Some(git_dir.to_string()),
            repositories: Vec::new(),
            email: String::new(),
            blame: Mutex::new(FakeBlame::Output {
                stdout: Vec::new(),
                stderr: String::new(),
            }),
            stdout_end: Mutex::new(None),
            spawned: Mutex::new(Vec::new()),
            kills: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn outside_repository() -> Self {
        Self {
            git_dir: None,
            ..Self::new("")
        }
    }

    /// Answer `rev-parse` with `git_dir` for directories under `work_tree`.
    pub(crate) fn with_repository(mut self, work_tree: &Path, git_dir: &str) -> Self {
        self.repositories
            .push((work_tree.to_path_buf(), git_dir.to_string()));
        self
    }

    pub(crate) fn with_email(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }

    pub(crate) fn with_blame(self, blame: FakeBlame) -> Self {
        *self.blame.lock() = blame;
        self
    }

    pub(crate) fn with_output(self, stdout: &str) -> Self {
        self.with_blame(FakeBlame::Output {
            stdout: stdout.as_bytes().to_vec(),
            stderr: String::new(),
        })
    }

    /// Run `hook` when a completing blame's stdout reaches end of file.
    pub(crate) fn on_stdout_end(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.stdout_end.lock() = Some(Arc::new(hook));
    }

    pub(crate) fn spawned(&self) -> Vec<(String, Vec<String>, SpawnOptions)> {
        self.spawned.lock().clone()
    }

    /// Number of spawns whose first argument is `subcommand`.
    pub(crate) fn spawn_count(&self, subcommand: &str) -> usize {
        self.spawned
            .lock()
            .iter()
            .filter(|(_, args, _)| args.first().map(String::as_str) == Some(subcommand))
            .count()
    }

    pub(crate) fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn git_dir_for(&self, cwd: &Path) -> Option<&String> {
        self.repositories
            .iter()
            .find(|(work_tree, _)| cwd.starts_with(work_tree))
            .map(|(_, git_dir)| git_dir)
            .or(self.git_dir.as_ref())
    }

    fn finished(&self, stdout: Vec<u8>, stderr: String) -> RunningProcess {
        RunningProcess {
            stdout: Box::new(Cursor::new(stdout)),
            stderr: Box::new(Cursor::new(stderr.into_bytes())),
            handle: Box::new(FakeHandle {
                kills: Arc::clone(&self.kills),
                writers: Vec::new(),
            }),
        }
    }
}

impl ProcessRunner for FakeRunner {
    fn spawn(
        &self,
        program: &str,
        args: &[String],
        options: &SpawnOptions,
    ) -> io::Result<RunningProcess> {
        self.spawned
            .lock()
            .push((program.to_string(), args.to_vec(), options.clone()));

        match args.first().map(String::as_str) {
            Some("rev-parse") => Ok(match self.git_dir_for(&options.cwd) {
                Some(dir) => self.finished(format!("{dir}\n").into_bytes(), String::new()),
                None => self.finished(
                    Vec::new(),
                    "fatal: not a git repository (or any of the parent directories): .git\n"
                        .to_string(),
                ),
            }),
            Some("config") => Ok(self.finished(self.email.clone().into_bytes(), String::new())),
            Some("blame") => match self.blame.lock().clone() {
                FakeBlame::Output { stdout, stderr } => {
                    let mut process = self.finished(Vec::new(), stderr);
                    process.stdout = Box::new(HookedStdout {
                        inner: Cursor::new(stdout),
                        on_end: self.stdout_end.lock().clone(),
                    });
                    Ok(process)
                }
                FakeBlame::Hang { partial } => {
                    let (stdout_writer, stdout_reader) = tokio::io::duplex(64);
                    let (stderr_writer, stderr_reader) = tokio::io::duplex(64);
                    let stdout: ByteStream = Box::new(Cursor::new(partial).chain(stdout_reader));
                    Ok(RunningProcess {
                        stdout,
                        stderr: Box::new(stderr_reader),
                        handle: Box::new(FakeHandle {
                            kills: Arc::clone(&self.kills),
                            writers: vec![stdout_writer, stderr_writer],
                        }),
                    })
                }
            },
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "unexpected command")),
        }
    }
}

/// Stdout that calls a hook once, on the read that hits end of file.
struct HookedStdout {
    inner: Cursor<Vec<u8>>,
    on_end: Option<Hook>,
}

impl AsyncRead for HookedStdout {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if buf.filled().len() == before && buf.remaining() > 0 {
            if let Some(hook) = this.on_end.take() {
                hook();
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// Killing closes the held pipes, like a real process exiting.
struct FakeHandle {
    kills: Arc<AtomicUsize>,
    writers: Vec<DuplexStream>,
}

impl ProcessHandle for FakeHandle {
    fn kill(&mut self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.writers.clear();
    }
}
