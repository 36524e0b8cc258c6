use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::config::InvalidInstallConfigError;

/// The installer failed to initialize.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InitializationError {
    #[error("Live image root '{path}' does not exist")]
    MissingLiveRoot { path: String },
    #[error("Target root '{path}' does not exist")]
    MissingTargetRoot { path: String },
    #[error("Failed to open the live Entropy repository at '{path}'")]
    OpenLiveRepository { path: String },
    #[error("Failed to read the kernel command line")]
    ReadKernelCmdline,
    #[error("Failed to start the background workers")]
    StartWorkers,
}

/// The installer failed to run because the execution environment was
/// misconfigured.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionEnvironmentMisconfigurationError {
    #[error("Installing requires root privileges")]
    MissingRequiredPermissions,
}

/// User provided input was invalid.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidInputError {
    #[error("Failed to load install configuration file from '{path}'")]
    LoadInstallConfiguration { path: String },
    #[error("Failed to parse install configuration")]
    ParseInstallConfiguration,
    #[error("Invalid install configuration: {0}")]
    InvalidInstallConfiguration(#[from] InvalidInstallConfigError),
    #[error("Unknown install class '{id}'")]
    UnknownInstallClass { id: String },
    #[error("User name '{username}' is already in use on the target")]
    UsernameTaken { username: String },
}

/// A step of the installation failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ServicingError {
    #[error("Failed to mount special directory '{dir}' in the target")]
    ChrootMountSpecialDir { dir: String },
    #[error("Failed to unmount special directory from the target")]
    ChrootUnmountSpecialDir,
    #[error("Failed to run '{command}' inside the target")]
    ChrootCommand { command: String },
    #[error("Failed to build the content index of excluded files")]
    BuildContentIndex,
    #[error("Failed to copy the live image into the target")]
    CopyLiveImage,
    #[error("Failed to remove unwanted packages")]
    RemovePackages,
    #[error("Failed to prune directories of removed packages")]
    PruneDirectories,
    #[error("Failed to write the '{name}' package set")]
    WritePackageSet { name: String },
    #[error("Failed to set up users")]
    SetUpUsers,
    #[error("Failed to set up the language")]
    SetUpLanguage,
    #[error("Failed to set up the keyboard")]
    SetUpKeyboard,
    #[error("Failed to set up the timezone")]
    SetUpTimezone,
    #[error("Failed to write the network configuration")]
    WriteNetworkConfiguration,
    #[error("Failed to configure system services")]
    ConfigureServices,
    #[error("Failed to finalize the system configuration")]
    FinalizeSystem,
    #[error("Failed to write crypttab")]
    WriteCrypttab,
    #[error("Failed to write the bootloader configuration")]
    WriteBootloaderConfig,
    #[error("Failed to install the bootloader")]
    InstallBootloader,
    #[error("Failed to generate the bootloader menu")]
    GenerateBootloaderMenu,
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Installer panicked: {0}")]
    Panic(String),
    #[error("Failed to acquire the subsystem lock")]
    SubsystemLock,
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
/// The categories tell apart problems with the input, the environment and the
/// installer itself.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The installer failed to initialize.
    #[error(transparent)]
    Initialization(#[from] InitializationError),

    /// The installer failed because the execution environment was
    /// misconfigured.
    #[error(transparent)]
    ExecutionEnvironmentMisconfiguration(#[from] ExecutionEnvironmentMisconfigurationError),

    /// The installer was provided invalid user input.
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),

    /// A step of the installation failed. The target system is likely
    /// incomplete.
    #[error(transparent)]
    Servicing(#[from] ServicingError),

    /// A bug was encountered.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct InstallerErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct InstallerError(Box<InstallerErrorInner>);
impl InstallerError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        InstallerError(Box::new(InstallerErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn internal(message: &'static str) -> Self {
        Self::new(InternalError::Internal(message))
    }

    #[track_caller]
    pub fn secondary_error_context(mut self, secondary: InstallerError) -> Self {
        self.0.context.push((format!(
            "While handling the error, an additional error was caught: \n\n{secondary:?}\n\nThe earlier error:"
        ).into(), Location::caller()));
        self
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured InstallerError.
    fn structured(self, kind: K) -> Result<T, InstallerError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, InstallerError> {
        match self {
            Some(t) => Ok(t),
            None => Err(InstallerError(Box::new(InstallerErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, InstallerError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(InstallerError(Box::new(InstallerErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait InstallerResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, InstallerError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}
impl<T> InstallerResultExt<T> for Result<T, InstallerError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, InstallerError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for InstallerError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("installer-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Initialization(ref e) => state.serialize_field("error", e)?,
            ErrorKind::ExecutionEnvironmentMisconfiguration(ref e) => {
                state.serialize_field("error", e)?
            }
            ErrorKind::InvalidInput(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Servicing(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for InstallerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
