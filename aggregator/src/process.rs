//! External `hotspot-perfparser` process
//!
//! Raw `perf.data` recordings are converted by a separate parser binary that
//! writes the stream to its stdout. Its exit code tells why it gave up.

use crate::config::AnalysisConfig;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// File name of the parser binary
pub const PARSER_BINARY_NAME: &str = "hotspot-perfparser";

/// Environment variable overriding the parser binary
pub const PARSER_BINARY_ENV: &str = "HOTSPOT_PERFPARSER";

const DEBUGINFOD_URLS: &str = "DEBUGINFOD_URLS";

#[derive(Debug, Error)]
pub enum ParserProcessError {
    #[error("Failed to find hotspot-perfparser binary.")]
    BinaryNotFound,

    #[error("Failed to start the hotspot-perfparser process")]
    Start(#[source] std::io::Error),

    #[error("The hotspot-perfparser binary exited with code {0} (TCP socket error).")]
    TcpSocket(i32),

    #[error("The hotspot-perfparser binary exited with code {0} (file could not be opened).")]
    CannotOpen(i32),

    #[error("The hotspot-perfparser binary exited with code {0} (invalid perf data file).")]
    InvalidPerfData(i32),

    #[error("The hotspot-perfparser binary exited with code {0} (invalid option).")]
    InvalidOption(i32),

    #[error("The hotspot-perfparser binary exited with code {0}.")]
    Exited(i32),

    #[error("The hotspot-perfparser process was terminated by a signal.")]
    Killed,

    #[error("Failed to wait for the hotspot-perfparser process")]
    Wait(#[source] std::io::Error),
}

impl ParserProcessError {
    /// Failure reported by an exit code, `None` for success
    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(Self::TcpSocket(code)),
            2 => Some(Self::CannotOpen(code)),
            // bad magic, header error, data error, missing data
            3..=6 => Some(Self::InvalidPerfData(code)),
            7 => Some(Self::InvalidOption(code)),
            _ => Some(Self::Exited(code)),
        }
    }

    fn from_status(status: ExitStatus) -> Result<(), Self> {
        match status.code() {
            Some(code) => Self::from_exit_code(code).map_or(Ok(()), Err),
            None => Err(Self::Killed),
        }
    }
}

/// Locate the parser binary.
///
/// Tries the configured path, then `HOTSPOT_PERFPARSER`, then a binary
/// installed next to the running executable or in its `../libexec`, and
/// finally `PATH`.
pub fn find_parser_binary(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return find_executable(path);
    }

    if let Some(value) = std::env::var_os(PARSER_BINARY_ENV).filter(|v| !v.is_empty()) {
        return find_executable(Path::new(&value));
    }

    let installed = std::env::current_exe().ok().and_then(|exe| {
        let dir = exe.parent()?.to_path_buf();
        [
            dir.join(PARSER_BINARY_NAME),
            dir.join("../libexec").join(PARSER_BINARY_NAME),
        ]
        .into_iter()
        .find(|candidate| is_executable(candidate))
    });

    installed.or_else(|| find_executable(Path::new(PARSER_BINARY_NAME)))
}

/// Resolve `name` to an executable file. Bare names are searched in `PATH`.
pub fn find_executable(name: &Path) -> Option<PathBuf> {
    if name.components().count() > 1 || name.is_absolute() {
        return is_executable(name).then(|| name.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// `DEBUGINFOD_URLS` for the child: the configured servers first, then
/// whatever the environment already lists
pub fn debuginfod_urls(configured: &[String], inherited: Option<&str>) -> Option<String> {
    if configured.is_empty() {
        return None;
    }
    let mut urls = configured.join(" ");
    if let Some(inherited) = inherited.filter(|urls| !urls.is_empty()) {
        urls.push(' ');
        urls.push_str(inherited);
    }
    Some(urls)
}

/// A running parser writing its stream to a pipe
#[derive(Debug)]
pub struct ParserProcess {
    child: Child,
}

impl ParserProcess {
    /// Start `binary` on `input` with the arguments derived from `config`.
    ///
    /// The child's stderr is forwarded; it is killed when dropped.
    pub fn spawn(
        binary: &Path,
        config: &AnalysisConfig,
        input: &Path,
    ) -> Result<Self, ParserProcessError> {
        let args = config.parser_args(input);
        let mut command = Command::new(binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let inherited = std::env::var(DEBUGINFOD_URLS).ok();
        if let Some(urls) = debuginfod_urls(&config.debuginfod_urls, inherited.as_deref()) {
            debug!("Using {}={}", DEBUGINFOD_URLS, urls);
            command.env(DEBUGINFOD_URLS, urls);
        }

        let child = command.spawn().map_err(|e| {
            warn!("Failed to spawn {}: {}", binary.display(), e);
            ParserProcessError::Start(e)
        })?;
        info!("Started {} {}", binary.display(), args.join(" "));
        Ok(Self { child })
    }

    /// The pipe carrying the stream; `None` once taken
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Wait for the process to exit and interpret its exit code
    pub async fn wait(mut self) -> Result<(), ParserProcessError> {
        let status = self.child.wait().await.map_err(ParserProcessError::Wait)?;
        debug!("Parser process exited: {}", status);
        ParserProcessError::from_status(status)
    }

    /// Kill the process and reap it
    pub async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("Failed to kill parser process: {}", e);
        }
    }
}
