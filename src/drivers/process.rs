//! Subprocess plumbing shared by every backend: executable lookup, running a
//! named step, and turning exit status plus captured output into
//! `BackendError`s.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr then stdout, trimmed; what operators see on failure.
    pub fn combined(&self) -> String {
        let mut out = self.stderr.trim().to_string();
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(stdout);
        }
        out
    }
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) && !name.ends_with(".exe") { format!("{}.exe", name) } else { name.to_string() }
}

/// Resolve an executable: an explicitly configured path wins, then the
/// conventional install directories, then `PATH`. A configured bare name
/// (`pg_dump15`, say) is searched for like the default one.
pub fn locate_executable(configured: Option<&str>, name: &str, candidate_dirs: &[&str]) -> Option<PathBuf> {
    match configured {
        Some(path) if path.contains(['/', '\\']) => {
            let p = PathBuf::from(path);
            if p.is_file() { Some(p) } else {
                warn!(path = %path, "configured executable does not exist");
                None
            }
        }
        Some(bare) => {
            let found = search_dirs(bare, candidate_dirs);
            if found.is_none() {
                warn!(name = %bare, "configured executable not found on PATH");
            }
            found
        }
        None => search_dirs(name, candidate_dirs),
    }
}

fn search_dirs(name: &str, candidate_dirs: &[&str]) -> Option<PathBuf> {
    let file = exe_name(name);
    let from_candidates = candidate_dirs.iter().map(|d| Path::new(d).join(&file));
    let from_path = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).map(|d| d.join(&file)).collect::<Vec<_>>())
        .unwrap_or_default();
    from_candidates.chain(from_path).find(|p| p.is_file())
}

fn spawn_error(step: &str, program: &str, err: std::io::Error) -> BackendError {
    if err.kind() == std::io::ErrorKind::NotFound {
        BackendError::ToolNotInstalled { tool: program.to_string() }
    } else {
        BackendError::io(format!("{}: failed to start {}", step, program), err)
    }
}

fn finish(step: &str, output: std::process::Output) -> CommandOutput {
    let out = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(step = %step, exit_code = ?out.code, "command finished");
    out
}

/// Run a step and capture its output regardless of exit status. Stdio set on
/// `cmd` by the caller (a dump file as stdout, say) is left alone.
pub fn run(step: &str, cmd: &mut Command) -> BackendResult<CommandOutput> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(step = %step, program = %program, "running command");
    let output = cmd.output().map_err(|e| spawn_error(step, &program, e))?;
    Ok(finish(step, output))
}

/// Like `run`, but a non-zero exit becomes `CommandFailed` with the raw output.
pub fn run_checked(step: &str, cmd: &mut Command) -> BackendResult<CommandOutput> {
    let out = run(step, cmd)?;
    ensure_success(step, out)
}

/// Run a step feeding `input` through its standard input.
pub fn run_with_input(step: &str, cmd: &mut Command, input: &[u8]) -> BackendResult<CommandOutput> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(step = %step, program = %program, "running command with piped input");
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(step, &program, e))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).map_err(|e| BackendError::io(format!("{}: writing stdin", step), e))?;
    }
    let output = child.wait_with_output().map_err(|e| BackendError::io(format!("{}: waiting", step), e))?;
    ensure_success(step, finish(step, output))
}

pub fn ensure_success(step: &str, out: CommandOutput) -> BackendResult<CommandOutput> {
    if out.success() { Ok(out) } else { Err(command_failed(step, &out)) }
}

pub fn command_failed(step: &str, out: &CommandOutput) -> BackendError {
    BackendError::CommandFailed { step: step.to_string(), code: out.code, output: out.combined() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_output_puts_stderr_first() {
        let out = CommandOutput { code: Some(2), stdout: "partial\n".into(), stderr: "fatal: bad revision\n".into() };
        assert_eq!(out.combined(), "fatal: bad revision\npartial");
        assert!(!out.success());
    }

    #[test]
    fn failure_carries_step_and_output() {
        let out = CommandOutput { code: Some(128), stdout: String::new(), stderr: "fatal: not a git repository".into() };
        match ensure_success("git status", out) {
            Err(BackendError::CommandFailed { step, code, output }) => {
                assert_eq!(step, "git status");
                assert_eq!(code, Some(128));
                assert_eq!(output, "fatal: not a git repository");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_program_is_reported_as_not_installed() {
        let err = run("version check", &mut Command::new("definitely-not-a-real-tool-3f9a")).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn configured_path_must_exist() {
        assert!(locate_executable(Some("/nonexistent/bin/mysqldump"), "mysqldump", &[]).is_none());
        let dir = tempfile::TempDir::new().unwrap();
        let fake = dir.path().join("mysqldump");
        std::fs::write(&fake, "").unwrap();
        assert_eq!(locate_executable(Some(fake.to_str().unwrap()), "mysqldump", &[]), Some(fake));
    }

    #[test]
    fn candidate_directories_are_searched() {
        let dir = tempfile::TempDir::new().unwrap();
        let name = "savepoint-fake-tool";
        std::fs::write(dir.path().join(exe_name(name)), "").unwrap();
        let found = locate_executable(None, name, &[dir.path().to_str().unwrap()]);
        assert_eq!(found, Some(dir.path().join(exe_name(name))));
    }

    #[test]
    fn configured_bare_name_is_searched_for() {
        let dir = tempfile::TempDir::new().unwrap();
        let name = "savepoint-pg_dump15";
        std::fs::write(dir.path().join(exe_name(name)), "").unwrap();
        let found = locate_executable(Some(name), "pg_dump", &[dir.path().to_str().unwrap()]);
        assert_eq!(found, Some(dir.path().join(exe_name(name))));
        assert!(locate_executable(Some("savepoint-missing-tool-3f9a"), "pg_dump", &[dir.path().to_str().unwrap()]).is_none());
    }
}
