// src/build/runner.rs

//! Subprocess execution for build stages
//!
//! Every command of a node's stage appends to that stage's log file; stdout
//! and stderr share the file so their lines stay in order. A nonzero exit
//! becomes `BuildFailed` carrying the last lines of the log. Commands run
//! in their own process group so a timeout or cancellation terminates the
//! whole tree: SIGTERM first, SIGKILL after a grace period.

use crate::error::{Error, Result};
use crate::lifecycle::cancel::CancelToken;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Poll interval while waiting on a child
const POLL: Duration = Duration::from_millis(100);

/// Time between SIGTERM and SIGKILL
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Default number of log lines attached to failures
pub const DEFAULT_LOG_TAIL: usize = 40;

/// Per-invocation options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Deadline of this command; falls back to the runner's default
    pub timeout: Option<Duration>,
    /// Extra variables, applied after the build environment
    pub env: BTreeMap<String, String>,
}

/// Runs the commands of one node stage
#[derive(Debug, Clone)]
pub struct CommandRunner {
    log_file: PathBuf,
    /// Evaluated build environment; `None` removes the variable
    env: BTreeMap<String, Option<String>>,
    default_timeout: Option<Duration>,
    log_tail: usize,
    grace: Duration,
    cancel: CancelToken,
}

enum Invocation<'a> {
    Shell(&'a str),
    Argv(&'a [String]),
}

impl Invocation<'_> {
    fn display(&self) -> String {
        match self {
            Self::Shell(cmd) => cmd.to_string(),
            Self::Argv(argv) => argv.join(" "),
        }
    }

    fn command(&self) -> Result<Command> {
        match self {
            Self::Shell(cmd) => {
                let mut command = if cfg!(windows) {
                    let mut c = Command::new("cmd");
                    c.arg("/C");
                    c
                } else {
                    let mut c = Command::new("sh");
                    c.arg("-c");
                    c
                };
                command.arg(cmd);
                Ok(command)
            }
            Self::Argv(argv) => {
                let (program, args) = argv
                    .split_first()
                    .ok_or_else(|| Error::Internal("empty command line".to_string()))?;
                let mut command = Command::new(program);
                command.args(args);
                Ok(command)
            }
        }
    }
}

impl CommandRunner {
    pub fn new(log_file: PathBuf, cancel: CancelToken) -> Self {
        Self {
            log_file,
            env: BTreeMap::new(),
            default_timeout: None,
            log_tail: DEFAULT_LOG_TAIL,
            grace: DEFAULT_GRACE,
            cancel,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, Option<String>>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_log_tail(mut self, lines: usize) -> Self {
        self.log_tail = lines;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Run a shell command line
    pub fn run(&self, command: &str, cwd: &Path, opts: &RunOptions) -> Result<()> {
        self.execute(Invocation::Shell(command), cwd, opts)
    }

    /// Run a shell command line with default options
    pub fn run_shell(&self, command: &str, cwd: &Path) -> Result<()> {
        self.run(command, cwd, &RunOptions::default())
    }

    /// Run a program with arguments, without a shell
    pub fn run_argv(&self, argv: &[String], cwd: &Path, opts: &RunOptions) -> Result<()> {
        self.execute(Invocation::Argv(argv), cwd, opts)
    }

    fn open_log(&self) -> Result<File> {
        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?)
    }

    fn execute(&self, invocation: Invocation<'_>, cwd: &Path, opts: &RunOptions) -> Result<()> {
        self.cancel.check()?;
        let shown = invocation.display();
        fs::create_dir_all(cwd)?;

        let mut log = self.open_log()?;
        writeln!(log, "$ {}", shown)?;
        writeln!(log, "# cwd: {}", cwd.display())?;

        let mut command = invocation.command()?;
        command
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log.try_clone()?));
        for (key, value) in &self.env {
            match value {
                Some(v) => command.env(key, v),
                None => command.env_remove(key),
            };
        }
        command.envs(&opts.env);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        info!("Running: {}", shown);
        let mut child = command.spawn().map_err(|e| Error::BuildFailed {
            message: format!("failed to start '{}': {}", shown, e),
            log_tail: String::new(),
        })?;

        let timeout = opts.timeout.or(self.default_timeout);
        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.wait_timeout(POLL)? {
                break status;
            }
            if self.cancel.is_cancelled() {
                warn!("Cancelling '{}'", shown);
                self.terminate(&mut child)?;
                writeln!(log, "# cancelled")?;
                return Err(Error::Cancelled);
            }
            if let Some(limit) = timeout
                && started.elapsed() >= limit
            {
                warn!("'{}' exceeded {:?}, terminating", shown, limit);
                self.terminate(&mut child)?;
                writeln!(log, "# timed out after {:?}", limit)?;
                return Err(Error::BuildTimeout {
                    command: shown,
                    timeout: limit,
                });
            }
        };

        writeln!(log, "# exit: {}", status)?;
        if status.success() {
            debug!("'{}' finished in {:?}", shown, started.elapsed());
            return Ok(());
        }
        Err(Error::BuildFailed {
            message: format!("'{}' failed with {}", shown, status),
            log_tail: self.tail()?,
        })
    }

    /// SIGTERM the process group, SIGKILL after the grace period
    fn terminate(&self, child: &mut Child) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;
            let group = Pid::from_raw(child.id() as i32);
            let _ = killpg(group, Signal::SIGTERM);
            if child.wait_timeout(self.grace)?.is_some() {
                return Ok(());
            }
            let _ = killpg(group, Signal::SIGKILL);
        }
        let _ = child.kill();
        child.wait()?;
        Ok(())
    }

    /// Last lines of the log file
    pub fn tail(&self) -> Result<String> {
        let file = match File::open(&self.log_file) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ring = VecDeque::with_capacity(self.log_tail);
        for line in BufReader::new(file).lines() {
            let line = line.unwrap_or_default();
            if ring.len() == self.log_tail {
                ring.pop_front();
            }
            ring.push_back(line);
        }
        Ok(ring.into_iter().collect::<Vec<_>>().join("\n"))
    }
}
