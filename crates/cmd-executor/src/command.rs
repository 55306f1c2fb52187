use diag_errors::ExecError;

/// Executable path plus a pre-escaped argument string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: args.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &str {
        &self.args
    }

    pub(crate) fn validate(&self) -> Result<(), ExecError> {
        if self.program.trim().is_empty() {
            return Err(ExecError::InvalidArgument("command is empty".to_string()));
        }
        self.argv().map(|_| ())
    }

    /// Splits the argument string with POSIX shell-word rules. No expansion
    /// or substitution takes place.
    pub(crate) fn argv(&self) -> Result<Vec<String>, ExecError> {
        shell_words::split(&self.args).map_err(|err| {
            ExecError::InvalidArgument(format!("cannot split arguments {:?}: {err}", self.args))
        })
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.args.trim().is_empty() {
            f.write_str(&self.program)
        } else {
            write!(f, "{} {}", self.program, self.args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_is_invalid() {
        let spec = CommandSpec::new("  ", "-a");
        assert!(matches!(
            spec.validate(),
            Err(ExecError::InvalidArgument(_))
        ));
    }

    #[test]
    fn argv_respects_quoting() {
        let spec = CommandSpec::new("/usr/sbin/smartctl", "-l selftest '/dev/disk by id/x'");
        assert_eq!(
            spec.argv().expect("argv"),
            vec!["-l", "selftest", "/dev/disk by id/x"]
        );
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let spec = CommandSpec::new("/bin/echo", "'unterminated");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn display_joins_program_and_args() {
        assert_eq!(CommandSpec::new("ls", "").to_string(), "ls");
        assert_eq!(CommandSpec::new("ls", "-l").to_string(), "ls -l");
    }
}
