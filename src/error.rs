use thiserror::Error;

/// Failure reported by an external tool backend.
///
/// Backends never panic or retry on these; the orchestrator decides whether a
/// given failure is a warning or a hard error for the operation at hand.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{tool} is not installed or not executable")]
    ToolNotInstalled { tool: String },

    #[error("{path} is not a git repository")]
    NotARepository { path: String },

    #[error("{step} failed (exit code {}): {output}", exit_label(.code))]
    CommandFailed {
        step: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BackendError::Io { context: context.into(), source }
    }

    /// True when the capability is missing rather than broken.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::ToolNotInstalled { .. } | BackendError::NotARepository { .. })
    }
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".into())
}

pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_covers_missing_tool_and_repo() {
        assert!(BackendError::ToolNotInstalled { tool: "git".into() }.is_unavailable());
        assert!(BackendError::NotARepository { path: "/srv/app".into() }.is_unavailable());
        let failed = BackendError::CommandFailed { step: "git commit".into(), code: Some(1), output: "boom".into() };
        assert!(!failed.is_unavailable());
    }

    #[test]
    fn command_failure_keeps_raw_output() {
        let err = BackendError::CommandFailed {
            step: "mysql import".into(),
            code: Some(1),
            output: "ERROR 1049 (42000): Unknown database 'x'".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("mysql import failed (exit code 1)"));
        assert!(msg.contains("ERROR 1049 (42000): Unknown database 'x'"));

        let killed = BackendError::CommandFailed { step: "git push".into(), code: None, output: String::new() };
        assert!(killed.to_string().contains("exit code none"));
    }
}
