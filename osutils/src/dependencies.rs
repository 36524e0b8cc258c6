use std::{
    ffi::{OsStr, OsString},
    io::{self, Write},
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::{Command as StdCommand, Output, Stdio},
};

use log::trace;
use strum_macros::IntoStaticStr;

#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("Failed to find dependency '{dependency}': {source}")]
    NotFound {
        dependency: Dependency,
        #[source]
        source: which::Error,
    },

    #[error("Dependency '{dependency}' is missing from '{root}'")]
    NotFoundInRoot {
        dependency: Dependency,
        root: PathBuf,
    },

    #[error("Failed to execute dependency '{dependency}': {inner}")]
    CouldNotExecute {
        dependency: Dependency,
        #[source]
        inner: io::Error,
    },

    #[error("Dependency '{dependency}' finished unsuccessfully: {explanation}\nCmdline: {rendered_command}\n{output}")]
    ExecutionFailed {
        dependency: Dependency,
        rendered_command: String,
        code: Option<i32>,
        signal: Option<i32>,
        explanation: String,
        output: String,
    },
}

/// Tools the installer runs, on the live system or inside the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Dependency {
    Chpasswd,
    Chroot,
    Cp,
    #[strum(serialize = "cracklib-check")]
    CracklibCheck,
    Dmesg,
    #[strum(serialize = "env-update")]
    EnvUpdate,
    Equo,
    Eselect,
    Getent,
    #[strum(serialize = "grub2-install")]
    Grub2Install,
    #[strum(serialize = "grub2-mkconfig")]
    Grub2Mkconfig,
    #[strum(serialize = "grub-mkconfig")]
    GrubMkconfig,
    #[strum(serialize = "keyboard-setup-2")]
    KeyboardSetup2,
    #[strum(serialize = "language-setup")]
    LanguageSetup,
    Ldconfig,
    #[strum(serialize = "locale-gen")]
    LocaleGen,
    #[strum(serialize = "make-secureboot.sh")]
    MakeSecureboot,
    Nmcli,
    Systemctl,
    #[strum(serialize = "systemd-detect-virt")]
    SystemdDetectVirt,
    Useradd,
    Userdel,
    // Test dependencies
    #[cfg(test)]
    DoesNotExist,
    #[cfg(test)]
    Cat,
    #[cfg(test)]
    Echo,
    #[cfg(test)]
    False,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.into())
    }
}

/// Directories searched when looking for a dependency inside a system root.
const ROOT_SEARCH_PATH: &[&str] = &["usr/sbin", "usr/bin", "sbin", "bin"];

impl Dependency {
    /// Gets the path for a dependency not in $PATH
    fn path_override(&self) -> Option<&'static Path> {
        Some(Path::new(match self {
            Self::LanguageSetup => "/sbin/language-setup",
            Self::MakeSecureboot => "/usr/lib/quickinst/make-secureboot.sh",
            _ => return None,
        }))
    }

    /// Gets the name of the dependency
    ///
    /// For example, Dependency::LocaleGen => "locale-gen"
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Checks if the dependency is present in the running system
    pub fn exists(&self) -> bool {
        self.path().is_ok()
    }

    /// Gets the path of the dependency in the running system
    pub fn path(&self) -> Result<PathBuf, Box<DependencyError>> {
        which::which(match self.path_override() {
            Some(path) => path.to_owned(),
            None => self.name().into(),
        })
        .map_err(|source| {
            Box::new(DependencyError::NotFound {
                dependency: *self,
                source,
            })
        })
    }

    /// Gets the path of the dependency as seen from inside `root`.
    pub fn path_in(&self, root: impl AsRef<Path>) -> Result<PathBuf, Box<DependencyError>> {
        let candidates = match self.path_override() {
            Some(path) => vec![path.to_owned()],
            None => ROOT_SEARCH_PATH
                .iter()
                .map(|dir| Path::new("/").join(dir).join(self.name()))
                .collect(),
        };

        candidates
            .into_iter()
            .find(|candidate| crate::path::join_relative(root.as_ref(), candidate).exists())
            .ok_or_else(|| {
                Box::new(DependencyError::NotFoundInRoot {
                    dependency: *self,
                    root: root.as_ref().to_owned(),
                })
            })
    }

    /// Checks if the dependency is present inside `root`
    pub fn exists_in(&self, root: impl AsRef<Path>) -> bool {
        self.path_in(root).is_ok()
    }

    /// Converts the dependency to a new Command instance
    /// (Note this does not create a std::process::Command instance)
    pub fn cmd(&self) -> Command {
        Command {
            dependency: *self,
            args: vec![],
            envs: vec![],
            root: None,
            input: None,
        }
    }
}

pub struct Command {
    dependency: Dependency,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    root: Option<PathBuf>,
    input: Option<Vec<u8>>,
}

impl Command {
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn with_arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args(args);
        self
    }

    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.envs
            .push((key.as_ref().to_os_string(), val.as_ref().to_os_string()));
        self
    }

    /// Run the dependency inside `root` through chroot(1). The dependency is
    /// looked up in `root` instead of the running system.
    pub fn in_root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = Some(root.as_ref().to_owned());
        self
    }

    /// Feed `input` to the standard input of the process.
    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn run_and_check(&self) -> Result<(), Box<DependencyError>> {
        self.output()?.check()
    }

    pub fn output_and_check(&self) -> Result<String, Box<DependencyError>> {
        self.output()?.check_output()
    }

    pub fn render_command(&self) -> String {
        let mut rendered = match self.root {
            Some(ref root) => format!("chroot {} {}", root.display(), self.dependency),
            None => self.dependency.to_string(),
        };

        for arg in self.args.iter().map(|arg| arg.to_string_lossy()) {
            rendered.push(' ');
            if arg.contains(' ') {
                rendered += &format!("'{arg}'");
            } else {
                rendered += &arg;
            }
        }
        rendered
    }

    fn build(&self) -> Result<StdCommand, Box<DependencyError>> {
        let mut cmd = match self.root {
            Some(ref root) => {
                let mut cmd = StdCommand::new(Dependency::Chroot.path()?);
                cmd.arg(root).arg(self.dependency.path_in(root)?);
                cmd
            }
            None => StdCommand::new(self.dependency.path()?),
        };
        cmd.args(&self.args);
        cmd.envs(self.envs.clone());
        Ok(cmd)
    }

    fn spawn_with_input(&self, mut cmd: StdCommand, input: &[u8]) -> io::Result<Output> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input)?;
        }
        child.wait_with_output()
    }

    pub fn output(&self) -> Result<CommandOutput, Box<DependencyError>> {
        let cmd = self.build()?;
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");

        let output = match self.input {
            Some(ref input) => self.spawn_with_input(cmd, input),
            None => {
                let mut cmd = cmd;
                cmd.output()
            }
        }
        .map_err(|inner| DependencyError::CouldNotExecute {
            dependency: self.dependency,
            inner,
        })?;

        let output = CommandOutput {
            rendered_command: rendered_command.clone(),
            dependency: self.dependency,
            inner: output,
        };
        trace!(
            "Executed '{rendered_command}': {}. Report:\n{}",
            output.explain_exit(),
            output.output_report(),
        );
        Ok(output)
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    rendered_command: String,
    dependency: Dependency,
    inner: Output,
}

impl CommandOutput {
    /// Checks if the process exited successfully
    pub fn success(&self) -> bool {
        self.inner.status.success()
    }

    /// Gets the exit code of the process, if it exited normally
    pub fn code(&self) -> Option<i32> {
        self.inner.status.code()
    }

    fn signal(&self) -> Option<i32> {
        self.inner.status.signal()
    }

    /// Gets stderr
    pub fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stderr).into()
    }

    /// Gets stdout
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.inner.stdout).into()
    }

    /// Gets all available output, useful for reporting or debugging
    pub fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();

        let mut res = String::with_capacity(stdout.len() + stderr.len() + 20);

        if !stdout.is_empty() {
            res += &format!("stdout:\n{stdout}\n");
        }

        if !stderr.is_empty() {
            if !res.is_empty() {
                res += "\n";
            }
            res += &format!("stderr:\n{stderr}\n");
        }

        res
    }

    /// Checks if the process exited successfully, otherwise produces an error
    pub fn check(&self) -> Result<(), Box<DependencyError>> {
        if self.success() {
            return Ok(());
        }

        Err(Box::new(DependencyError::ExecutionFailed {
            dependency: self.dependency,
            rendered_command: self.rendered_command.clone(),
            code: self.code(),
            signal: self.signal(),
            explanation: self.explain_exit(),
            output: match self.output_report() {
                s if !s.is_empty() => s,
                _ => "(no output collected)".into(),
            },
        }))
    }

    /// Checks if the process exited successfully and returns the output,
    /// otherwise produces an error with the output
    pub fn check_output(&self) -> Result<String, Box<DependencyError>> {
        self.check()?;
        Ok(self.output())
    }

    /// Produces a string explaining the exit status of the process
    pub fn explain_exit(&self) -> String {
        if let Some(code) = self.code() {
            format!("exited with status: {code}")
        } else if let Some(signal) = self.signal() {
            format!("terminated by signal: {signal}")
        } else {
            "exited with unknown status".into()
        }
    }
}
