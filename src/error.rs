#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid settings: {0}")]
    Settings(#[from] crate::config::SettingsError),
    #[error("manifest error: {0}")]
    Manifest(#[from] crate::config::manifest::ManifestError),
    #[error("validation error: {0}")]
    Validation(#[from] crate::pipeline::ValidationError),
    #[error("component registry error: {0}")]
    Registry(#[from] crate::collector::RegistryError),
    #[error("synthesis error: {0}")]
    Synthesis(#[from] crate::synthesis::SynthesisError),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("workload error: {0}")]
    Workload(#[from] crate::workload::WorkloadError),
    #[error("health probe error: {0}")]
    Probe(#[from] crate::health::ProbeError),
    #[error("reconcile error: {0}")]
    Reconcile(#[from] crate::reconcile::ReconcileError),
    #[error("duration parse error: {0}")]
    Duration(#[from] humantime::DurationError),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        Error: From<E>,
    {
        error.into()
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    pub fn with_context<M>(context: M, source: Error) -> Self
    where
        M: Into<String>,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Innermost error below any context layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Error::Store(err) => err.is_retryable(),
            Error::Workload(err) => err.is_retryable(),
            Error::Reconcile(err) => err.is_retryable(),
            Error::Io(_) | Error::Probe(_) => true,
            _ => false,
        }
    }
}

pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(context.into(), err.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(f().into(), err.into()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
    ($err:expr) => {{
        $crate::error::Error::new($err)
    }};
}

#[macro_export]
macro_rules! bail_err {
    ($($arg:tt)*) => {{
        return Err($crate::err!($($arg)*));
    }};
}

#[macro_export]
macro_rules! ensure_err {
    ($cond:expr $(,)?) => {
        if !$cond {
            return Err($crate::err!(concat!("condition failed: ", stringify!($cond))));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::bail_err!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn context_wraps_and_root_unwraps() {
        let result: std::result::Result<(), StoreError> =
            Err(StoreError::Unavailable("down".to_string()));
        let err = result.context("listing pipelines").expect_err("error");
        assert_eq!(err.to_string(), "listing pipelines");
        assert!(matches!(err.root(), Error::Store(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn ensure_err_reports_message() {
        fn check(value: u32) -> Result<()> {
            ensure_err!(value > 1, "value {value} too small");
            Ok(())
        }
        assert_eq!(
            check(1).expect_err("error").to_string(),
            "value 1 too small"
        );
        assert!(check(2).is_ok());
    }
}
