//! Decompilation driver.
//!
//! The collaborator runs as a supervised child process, one invocation per
//! case, inside the case's scratch directory:
//!
//! ```text
//! <program> <args...> --input <sample> --arch <hint> --format <hint> [--option key=value]...
//! ```
//!
//! stdout is captured to `output.json` and stderr to `stderr.log`. The child
//! is polled until it exits, the timeout elapses, or the run is cancelled; in
//! the last two cases it is killed and reaped before returning.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use dmx_fs::{Filesystem, FsError};
use dmx_schema::{Architecture, Artifacts, DecompileOutput, ObjectFormat, TestCase};
use thiserror::Error;

use crate::cancel::Cancellation;
use crate::config::DecompilerCommand;
use crate::resolver::ResolvedSample;

pub const OUTPUT_FILE: &str = "output.json";
pub const STDERR_FILE: &str = "stderr.log";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Bytes of stderr kept as the failure diagnostic.
const DIAGNOSTIC_LIMIT: usize = 4096;

/// Infrastructure faults while invoking the collaborator. These make the
/// case errored rather than failed.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("decompiler not found: {0}")]
    CollaboratorMissing(PathBuf),

    #[error("failed to start decompiler {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for decompiler: {0}")]
    Wait(#[source] io::Error),

    #[error("scratch directory unavailable {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("interrupted")]
    Interrupted,
}

/// Result of one collaborator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecompilationResult {
    Success(Artifacts),
    Failure { error: String, diagnostic: String },
    Timeout { limit: Duration },
}

impl DecompilationResult {
    pub fn failure(error: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        DecompilationResult::Failure {
            error: error.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DecompilationResult::Success(_))
    }
}

/// Everything the collaborator needs for one case.
#[derive(Debug, Clone)]
pub struct DecompileRequest<'a> {
    pub case_name: &'a str,
    pub input: &'a Path,
    pub architecture: Architecture,
    pub format: ObjectFormat,
    pub options: &'a BTreeMap<String, String>,
    pub scratch_dir: &'a Path,
    pub timeout: Duration,
}

/// The decompiler seam.
pub trait Decompiler: Send + Sync {
    fn decompile(
        &self,
        request: &DecompileRequest<'_>,
        cancel: &dyn Cancellation,
    ) -> Result<DecompilationResult, DriverError>;
}

/// Runs an external decompiler executable.
#[derive(Debug, Clone)]
pub struct ProcessDecompiler {
    program: PathBuf,
    args: Vec<String>,
    poll_interval: Duration,
}

impl ProcessDecompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_command(command: &DecompilerCommand) -> Self {
        Self::new(command.program.clone()).with_args(command.args.clone())
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Find the executable: paths are checked directly, bare names are
    /// searched on `PATH`.
    pub fn locate(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 || self.program.is_absolute() {
            let path = absolutize(&self.program);
            return path.is_file().then_some(path);
        }
        let search = std::env::var_os("PATH")?;
        std::env::split_paths(&search)
            .map(|dir| dir.join(&self.program))
            .find(|candidate| candidate.is_file())
    }

    /// Arguments passed after the program name.
    pub fn invocation_args(&self, request: &DecompileRequest<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        args.push("--input".into());
        args.push(absolutize(request.input).into_os_string());
        args.push("--arch".into());
        args.push(request.architecture.hint().into());
        args.push("--format".into());
        args.push(request.format.hint().into());
        for (key, value) in request.options {
            args.push("--option".into());
            args.push(format!("{}={}", key, value).into());
        }
        args
    }

    fn spawn(&self, request: &DecompileRequest<'_>) -> Result<Child, DriverError> {
        let output_path = request.scratch_dir.join(OUTPUT_FILE);
        let stderr_path = request.scratch_dir.join(STDERR_FILE);
        let stdout_file = File::create(&output_path).map_err(|e| scratch_error(&output_path, e))?;
        let stderr_file = File::create(&stderr_path).map_err(|e| scratch_error(&stderr_path, e))?;

        let mut command = Command::new(absolutize(&self.program));
        command
            .args(self.invocation_args(request))
            .current_dir(request.scratch_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));
        // The collaborator leads its own process group, so a timeout or
        // Ctrl+C takes down every tool it started along with it.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        command.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                DriverError::CollaboratorMissing(self.program.clone())
            } else {
                DriverError::Spawn {
                    program: self.program.clone(),
                    source,
                }
            }
        })
    }
}

impl Decompiler for ProcessDecompiler {
    fn decompile(
        &self,
        request: &DecompileRequest<'_>,
        cancel: &dyn Cancellation,
    ) -> Result<DecompilationResult, DriverError> {
        let mut child = self.spawn(request)?;

        let exit = wait_for_child(&mut child, request.timeout, self.poll_interval, cancel)?;
        let status = match exit {
            ChildExit::Exited(status) => status,
            ChildExit::TimedOut => {
                return Ok(DecompilationResult::Timeout {
                    limit: request.timeout,
                })
            }
            ChildExit::Cancelled => return Err(DriverError::Interrupted),
        };

        let diagnostic = read_tail(&request.scratch_dir.join(STDERR_FILE));
        if !status.success() {
            return Ok(DecompilationResult::failure(describe_status(status), diagnostic));
        }

        let output_path = request.scratch_dir.join(OUTPUT_FILE);
        let stdout = fs::read(&output_path).map_err(|e| scratch_error(&output_path, e))?;
        Ok(classify_output(&String::from_utf8_lossy(&stdout), diagnostic))
    }
}

enum ChildExit {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

fn wait_for_child(
    child: &mut Child,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &dyn Cancellation,
) -> Result<ChildExit, DriverError> {
    let started_at = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(ChildExit::Exited(status)),
            Ok(None) => {
                let elapsed = started_at.elapsed();
                let verdict = if cancel.is_cancelled() {
                    Some(ChildExit::Cancelled)
                } else if elapsed >= timeout {
                    Some(ChildExit::TimedOut)
                } else {
                    None
                };
                if let Some(verdict) = verdict {
                    terminate_and_reap(child)?;
                    return Ok(verdict);
                }
                thread::sleep(poll_interval.min(timeout - elapsed));
            }
            Err(error) => {
                let _ = terminate_and_reap(child);
                return Err(DriverError::Wait(error));
            }
        }
    }
}

fn terminate_and_reap(child: &mut Child) -> Result<(), DriverError> {
    kill_process_group(child);
    // kill fails if the child already exited; wait still reaps it.
    let _ = child.kill();
    child.wait().map(|_| ()).map_err(DriverError::Wait)
}

/// SIGKILL the child's process group. The child is not reaped yet, so its
/// pid still names the group created at spawn.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(child.id()) {
        // ESRCH only means the group is already gone.
        let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

/// Interpret the stdout of a collaborator that exited with status 0.
pub fn classify_output(stdout: &str, stderr_tail: String) -> DecompilationResult {
    match DecompileOutput::from_json(stdout) {
        Err(error) => DecompilationResult::failure(
            "malformed collaborator output",
            join_diagnostics(&error.to_string(), &stderr_tail),
        ),
        Ok(output) if !output.success => DecompilationResult::failure(
            "collaborator reported failure",
            join_diagnostics(&output.diagnostics, &stderr_tail),
        ),
        Ok(output) => DecompilationResult::Success(output.artifacts),
    }
}

fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("collaborator exited with code {}", code),
        None => format!("collaborator terminated abnormally ({})", status),
    }
}

fn join_diagnostics(first: &str, second: &str) -> String {
    match (first.trim().is_empty(), second.trim().is_empty()) {
        (true, _) => second.to_string(),
        (false, true) => first.to_string(),
        (false, false) => format!("{}\n{}", first.trim_end(), second),
    }
}

/// Last `DIAGNOSTIC_LIMIT` bytes of a log file, lossily decoded.
fn read_tail(path: &Path) -> String {
    let data = fs::read(path).unwrap_or_default();
    let start = data.len().saturating_sub(DIAGNOSTIC_LIMIT);
    String::from_utf8_lossy(&data[start..]).into_owned()
}

fn scratch_error(path: &Path, error: io::Error) -> DriverError {
    DriverError::Scratch {
        path: path.to_path_buf(),
        source: FsError::Io(error),
    }
}

/// Child processes run in the scratch directory, so relative paths that
/// name files must be anchored to the harness working directory.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() || path.components().count() <= 1 {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Invokes the collaborator for test cases, owning scratch directory layout
/// and timeout selection.
pub struct Driver<'a, F: Filesystem> {
    fs: &'a F,
    decompiler: &'a dyn Decompiler,
    scratch_root: PathBuf,
    timeout_override: Option<Duration>,
}

impl<'a, F: Filesystem> Driver<'a, F> {
    pub fn new(
        fs: &'a F,
        decompiler: &'a dyn Decompiler,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fs,
            decompiler,
            scratch_root: scratch_root.into(),
            timeout_override: None,
        }
    }

    pub fn with_timeout_override(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_override = timeout;
        self
    }

    /// Per-case timeout, then the run-wide override, then the
    /// architecture default.
    pub fn timeout_for(&self, case: &TestCase) -> Duration {
        case.timeout_ms
            .map(Duration::from_millis)
            .or(self.timeout_override)
            .unwrap_or(case.architecture.profile().default_timeout)
    }

    pub fn scratch_dir(&self, case: &TestCase) -> PathBuf {
        self.scratch_root.join(&case.name)
    }

    /// Decompile one resolved sample. The scratch directory is reset first.
    pub fn run(
        &self,
        case: &TestCase,
        sample: &ResolvedSample,
        cancel: &dyn Cancellation,
    ) -> Result<DecompilationResult, DriverError> {
        let scratch = self.scratch_dir(case);
        self.reset_scratch(&scratch)?;

        let request = DecompileRequest {
            case_name: &case.name,
            input: &sample.path,
            architecture: case.architecture,
            format: case.format,
            options: &case.options,
            scratch_dir: &scratch,
            timeout: self.timeout_for(case),
        };
        self.decompiler.decompile(&request, cancel)
    }

    /// Remove the case's scratch directory unless it is retained.
    pub fn release_scratch(&self, case: &TestCase, retain: bool) -> Result<(), DriverError> {
        if retain {
            return Ok(());
        }
        let scratch = self.scratch_dir(case);
        self.fs
            .remove_dir_all(&scratch)
            .map_err(|source| DriverError::Scratch {
                path: scratch,
                source,
            })
    }

    fn reset_scratch(&self, scratch: &Path) -> Result<(), DriverError> {
        let scratch_error = |source| DriverError::Scratch {
            path: scratch.to_path_buf(),
            source,
        };
        self.fs.remove_dir_all(scratch).map_err(scratch_error)?;
        self.fs.create_dir_all(scratch).map_err(scratch_error)
    }
}
