//! CommandRunner trait and ProcessRunner (sync subprocess wrapper).
//! Mock-injectable so backends are testable without a live multiplexer.

use std::io::ErrorKind;

use crate::error::MuxError;

/// Trait for executing multiplexer CLI commands.
pub trait CommandRunner: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<String, MuxError>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, args: &[&str]) -> Result<String, MuxError> {
        (**self).run(args)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for Box<T> {
    fn run(&self, args: &[&str]) -> Result<String, MuxError> {
        (**self).run(args)
    }
}

/// Runs a CLI binary located via `PATH` with fixed leading arguments.
pub struct ProcessRunner {
    backend: &'static str,
    bin: String,
    prefix: Vec<String>,
}

impl ProcessRunner {
    pub fn new(backend: &'static str, bin: impl Into<String>) -> Self {
        Self {
            backend,
            bin: bin.into(),
            prefix: Vec::new(),
        }
    }

    /// Arguments placed before every command (e.g. `cli` for wezterm,
    /// `-S <socket>` for tmux).
    #[must_use]
    pub fn with_prefix<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix.extend(args.into_iter().map(Into::into));
        self
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, args: &[&str]) -> Result<String, MuxError> {
        let output = std::process::Command::new(&self.bin)
            .args(&self.prefix)
            .args(args)
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    MuxError::Unavailable {
                        backend: self.backend,
                        detail: format!("{} not found in PATH", self.bin),
                    }
                } else {
                    MuxError::Io {
                        backend: self.backend,
                        source: e,
                    }
                }
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MuxError::CommandFailed {
                backend: self.backend,
                detail: format!(
                    "exit code {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_accumulated() {
        let runner = ProcessRunner::new("tmux", "tmux")
            .with_prefix(["-S", "/tmp/s.sock"])
            .with_prefix(["-v"]);
        assert_eq!(runner.prefix, vec!["-S", "/tmp/s.sock", "-v"]);
        assert_eq!(runner.bin, "tmux");
    }

    #[test]
    fn missing_binary_is_unavailable() {
        let runner = ProcessRunner::new("wezterm", "authmux-definitely-not-a-binary");
        let err = runner.run(&["list"]).expect_err("must fail");
        assert!(matches!(err, MuxError::Unavailable { backend: "wezterm", .. }));
    }

    #[test]
    fn blanket_ref_and_box_impls() {
        struct Mock;
        impl CommandRunner for Mock {
            fn run(&self, _args: &[&str]) -> Result<String, MuxError> {
                Ok("ok".to_string())
            }
        }
        let mock = Mock;
        let r: &Mock = &mock;
        assert_eq!(r.run(&[]).expect("ok"), "ok");
        let boxed: Box<dyn CommandRunner> = Box::new(Mock);
        assert_eq!(boxed.run(&[]).expect("ok"), "ok");
    }
}
