use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type IngestorResult<T> = Result<T, IngestorError>;

/// Captured backtrace, rendered with [`fmt::Display`] in debug output.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the ingestor service.
#[derive(Debug)]
pub enum IngestorError {
    /// Invalid or unreadable configuration, or telemetry that could not be initialized.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// Failure while running the service.
    Run(anyhow::Error),
    Io(std::io::Error, CapturedBacktrace),
}

impl IngestorError {
    pub fn category(&self) -> &'static str {
        match self {
            IngestorError::Config(_, _) => "configuration error",
            IngestorError::Run(_) => "ingestor error",
            IngestorError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            IngestorError::Config(_, captured) | IngestorError::Io(_, captured) => {
                Some(&captured.0)
            }
            IngestorError::Run(err) => Some(err.backtrace()),
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        IngestorError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Renders the error, its causes and optionally the backtrace for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("ingestor failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = Error::source(self);
        let mut idx = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {idx}: {err}\n"));
            source = err.source();
            idx += 1;
        }

        if should_render_backtrace() {
            if let Some(backtrace) = self.backtrace() {
                out.push_str("backtrace:\n");
                out.push_str(&backtrace.to_string());
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
        }

        out
    }
}

impl fmt::Display for IngestorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestorError::Config(source, _) => write!(f, "configuration error: {source}"),
            IngestorError::Run(err) => write!(f, "{err}"),
            IngestorError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for IngestorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IngestorError::Config(source, _) => Some(source.as_ref() as &(dyn Error + 'static)),
            IngestorError::Run(err) => err.source(),
            IngestorError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for IngestorError {
    fn from(err: std::io::Error) -> Self {
        IngestorError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<anyhow::Error> for IngestorError {
    fn from(err: anyhow::Error) -> Self {
        IngestorError::Run(err)
    }
}
