//! Git command execution.
//!
//! Every git invocation goes through a [`ProcessRunner`], so the rest of the
//! crate never touches `std::process` directly.

use super::GitError;
use crate::config::{BlameSettings, SharedSettings};
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Output stream of a spawned process.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Control over a spawned process.
pub trait ProcessHandle: Send {
    /// Terminate the process. Must not block.
    fn kill(&mut self);
}

impl ProcessHandle for tokio::process::Child {
    fn kill(&mut self) {
        if let Err(e) = self.start_kill() {
            tracing::debug!("Failed to kill git process: {}", e);
        }
    }
}

/// A spawned process with its output streams.
pub struct RunningProcess {
    pub stdout: ByteStream,
    pub stderr: ByteStream,
    pub handle: Box<dyn ProcessHandle>,
}

/// Working directory and environment for a spawned process.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Launches processes.
pub trait ProcessRunner: Send + Sync {
    fn spawn(
        &self,
        program: &str,
        args: &[String],
        options: &SpawnOptions,
    ) -> io::Result<RunningProcess>;
}

/// Runs real processes through tokio.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn spawn(
        &self,
        program: &str,
        args: &[String],
        options: &SpawnOptions,
    ) -> io::Result<RunningProcess> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&options.cwd)
            .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stderr not captured"))?;

        Ok(RunningProcess {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            handle: Box::new(child),
        })
    }
}

/// Read a stream to its end, replacing invalid UTF-8.
pub async fn read_to_string_lossy(stream: &mut ByteStream) -> io::Result<String> {
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Arguments for an incremental blame of `real_path`.
pub fn blame_args(settings: &BlameSettings, real_path: &Path, revs_file: Option<&Path>) -> Vec<String> {
    let mut args = vec!["blame".to_string()];

    if let Some(revs) = revs_file {
        args.push("-S".to_string());
        args.push(revs.to_string_lossy().into_owned());
    }

    if settings.ignore_whitespace {
        args.push("-w".to_string());
    }

    args.extend(
        ["-C", "--incremental", "--"]
            .iter()
            .map(|arg| arg.to_string()),
    );
    args.push(real_path.to_string_lossy().into_owned());
    args
}

/// Git commands needed for blaming, with per-repository caching.
pub struct GitCommand {
    runner: Arc<dyn ProcessRunner>,
    settings: SharedSettings,
    /// Directory -> absolute git dir
    git_dirs: DashMap<PathBuf, PathBuf>,
    /// Git dir -> `<user.email>`
    emails: DashMap<PathBuf, Option<String>>,
}

impl GitCommand {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: SharedSettings) -> Self {
        Self {
            runner,
            settings,
            git_dirs: DashMap::new(),
            emails: DashMap::new(),
        }
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> BlameSettings {
        self.settings.read().clone()
    }

    /// Run a short git command and return its trimmed stdout.
    ///
    /// Anything written to stderr counts as failure.
    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String, GitError> {
        let program = self.settings.read().git_command.clone();
        let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        let command = format!("{} {}", program, args.join(" "));
        tracing::info!("{}", command);

        let options = SpawnOptions {
            cwd: cwd.to_path_buf(),
            env: vec![("LC_ALL".to_string(), "C".to_string())],
        };
        let mut process = self.runner.spawn(&program, &args, &options)?;

        let (stdout, stderr) = tokio::join!(
            read_to_string_lossy(&mut process.stdout),
            read_to_string_lossy(&mut process.stderr)
        );
        let stderr = stderr?;

        if !stderr.trim().is_empty() {
            return Err(GitError::CommandFailed {
                command,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout?.trim().to_string())
    }

    /// Absolute git dir of the repository containing `file`.
    pub async fn repository_root(&self, file: &Path) -> Result<PathBuf, GitError> {
        let directory = file
            .parent()
            .ok_or_else(|| GitError::NotTrackable(file.to_path_buf()))?;

        if let Some(git_dir) = self.git_dirs.get(directory) {
            tracing::debug!("Using cached git dir for {:?}", directory);
            return Ok(git_dir.clone());
        }

        let git_dir = match self
            .run(directory, &["rev-parse", "--absolute-git-dir"])
            .await
        {
            Ok(output) if !output.is_empty() => PathBuf::from(output),
            Ok(_) => return Err(GitError::NotTrackable(file.to_path_buf())),
            Err(e) => {
                tracing::debug!("rev-parse failed for {:?}: {}", file, e);
                return Err(GitError::NotTrackable(file.to_path_buf()));
            }
        };

        self.git_dirs
            .insert(directory.to_path_buf(), git_dir.clone());
        Ok(git_dir)
    }

    /// The configured identity as git prints it (`<mail>`), if any.
    pub async fn user_email(&self, real_file: &Path) -> Option<String> {
        let git_dir = self.repository_root(real_file).await.ok()?;

        if let Some(email) = self.emails.get(&git_dir) {
            return email.clone();
        }

        let directory = real_file.parent()?;
        let email = match self.run(directory, &["config", "user.email"]).await {
            Ok(email) if !email.is_empty() => Some(format!("<{}>", email)),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("No user.email for {:?}: {}", git_dir, e);
                None
            }
        };

        self.emails.insert(git_dir, email.clone());
        email
    }

    /// First configured revisions file that exists in the working tree.
    pub async fn revs_file(&self, real_file: &Path) -> Option<PathBuf> {
        let candidates = self.settings.read().revs_file.clone();
        if candidates.is_empty() {
            return None;
        }

        let git_dir = self.repository_root(real_file).await.ok()?;
        let project_root = git_dir.parent()?;

        for candidate in candidates {
            let path = project_root.join(&candidate);
            if tokio::fs::metadata(&path).await.is_ok() {
                return Some(path);
            }
        }

        None
    }

    /// Launch `git blame --incremental` for `real_path`.
    pub fn blame_process(
        &self,
        real_path: &Path,
        revs_file: Option<&Path>,
    ) -> Result<RunningProcess, GitError> {
        let settings = self.settings();
        let args = blame_args(&settings, real_path, revs_file);
        tracing::info!("{} {}", settings.git_command, args.join(" "));

        let options = SpawnOptions {
            cwd: real_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            env: vec![
                ("LC_ALL".to_string(), "C".to_string()),
                ("GIT_PAGER".to_string(), "cat".to_string()),
            ],
        };

        Ok(self.runner.spawn(&settings.git_command, &args, &options)?)
    }

    /// Forget every cached command result.
    pub fn clear(&self) {
        self.git_dirs.clear();
        self.emails.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::FakeRunner;
    use parking_lot::RwLock;

    fn git_with(runner: Arc<FakeRunner>, settings: BlameSettings) -> GitCommand {
        GitCommand::new(runner, Arc::new(RwLock::new(settings)))
    }

    #[test]
    fn test_blame_args_default() {
        let args = blame_args(&BlameSettings::default(), Path::new("/repo/a.rs"), None);
        assert_eq!(args, vec!["blame", "-C", "--incremental", "--", "/repo/a.rs"]);
    }

    #[test]
    fn test_blame_args_with_whitespace_and_revs() {
        let settings = BlameSettings {
            ignore_whitespace: true,
            ..Default::default()
        };
        let args = blame_args(
            &settings,
            Path::new("/repo/a.rs"),
            Some(Path::new("/repo/.git-blame-ignore-revs")),
        );
        assert_eq!(
            args,
            vec![
                "blame",
                "-S",
                "/repo/.git-blame-ignore-revs",
                "-w",
                "-C",
                "--incremental",
                "--",
                "/repo/a.rs"
            ]
        );
    }

    #[tokio::test]
    async fn test_repository_root_is_cached_per_directory() {
        let runner = Arc::new(FakeRunner::new("/repo/.git"));
        let git = git_with(runner.clone(), BlameSettings::default());

        let first = git.repository_root(Path::new("/repo/src/a.rs")).await.unwrap();
        let second = git.repository_root(Path::new("/repo/src/b.rs")).await.unwrap();

        assert_eq!(first, PathBuf::from("/repo/.git"));
        assert_eq!(second, first);
        assert_eq!(runner.spawn_count("rev-parse"), 1);
    }

    #[tokio::test]
    async fn test_repository_root_outside_repository() {
        let runner = Arc::new(FakeRunner::outside_repository());
        let git = git_with(runner, BlameSettings::default());

        let result = git.repository_root(Path::new("/tmp/loose.txt")).await;
        assert!(matches!(result, Err(GitError::NotTrackable(_))));
    }

    #[tokio::test]
    async fn test_user_email_wraps_in_angle_brackets() {
        let runner = Arc::new(FakeRunner::new("/repo/.git").with_email("alice@example.com"));
        let git = git_with(runner.clone(), BlameSettings::default());

        let email = git.user_email(Path::new("/repo/a.rs")).await;
        assert_eq!(email.as_deref(), Some("<alice@example.com>"));

        git.user_email(Path::new("/repo/a.rs")).await;
        assert_eq!(runner.spawn_count("config"), 1);
    }

    #[tokio::test]
    async fn test_user_email_absent() {
        let runner = Arc::new(FakeRunner::new("/repo/.git"));
        let git = git_with(runner, BlameSettings::default());

        assert_eq!(git.user_email(Path::new("/repo/a.rs")).await, None);
    }

    #[tokio::test]
    async fn test_clear_forgets_cached_results() {
        let runner = Arc::new(FakeRunner::new("/repo/.git"));
        let git = git_with(runner.clone(), BlameSettings::default());

        git.repository_root(Path::new("/repo/a.rs")).await.unwrap();
        git.clear();
        git.repository_root(Path::new("/repo/a.rs")).await.unwrap();

        assert_eq!(runner.spawn_count("rev-parse"), 2);
    }

    #[tokio::test]
    async fn test_revs_file_picks_first_existing_candidate() {
        let repo = tempfile::tempdir().unwrap();
        let git_dir = repo.path().join(".git");
        std::fs::create_dir(&git_dir).unwrap();
        std::fs::write(repo.path().join(".second-revs"), "").unwrap();
        std::fs::write(repo.path().join(".third-revs"), "").unwrap();

        let runner = Arc::new(FakeRunner::new(git_dir.to_str().unwrap()));
        let settings = BlameSettings {
            revs_file: vec![
                ".missing-revs".to_string(),
                ".second-revs".to_string(),
                ".third-revs".to_string(),
            ],
            ..Default::default()
        };
        let git = git_with(runner, settings);

        let revs = git.revs_file(&repo.path().join("a.rs")).await;
        assert_eq!(revs, Some(repo.path().join(".second-revs")));
    }

    #[tokio::test]
    async fn test_revs_file_none_when_unconfigured() {
        let runner = Arc::new(FakeRunner::new("/repo/.git"));
        let git = git_with(runner.clone(), BlameSettings::default());

        assert_eq!(git.revs_file(Path::new("/repo/a.rs")).await, None);
        assert_eq!(runner.spawn_count("rev-parse"), 0);
    }

    #[tokio::test]
    async fn test_blame_process_uses_configured_git_and_environment() {
        let runner = Arc::new(FakeRunner::new("/repo/.git"));
        let settings = BlameSettings {
            git_command: "/opt/git/bin/git".to_string(),
            ..Default::default()
        };
        let git = git_with(runner.clone(), settings);

        git.blame_process(Path::new("/repo/src/a.rs"), None).unwrap();

        let spawned = runner.spawned();
        let (program, args, options) = spawned.last().unwrap();
        assert_eq!(program, "/opt/git/bin/git");
        assert_eq!(args.last().unwrap(), "/repo/src/a.rs");
        assert_eq!(options.cwd, PathBuf::from("/repo/src"));
        assert!(options
            .env
            .contains(&("GIT_PAGER".to_string(), "cat".to_string())));
    }
}
