use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" | "trace" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Installs the global subscriber on stderr. `RUST_LOG` wins over `LOG_LEVEL`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL")
            .map(|raw| LogLevel::parse(&raw))
            .unwrap_or(LogLevel::Info);
        EnvFilter::new(level.as_filter())
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Context-scoped façade over `tracing`.
#[derive(Debug, Clone)]
pub struct Logger {
    context: String,
}

impl Logger {
    pub fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
        }
    }

    pub fn child(&self, suffix: &str) -> Self {
        let context = if suffix.is_empty() {
            self.context.clone()
        } else {
            format!("{}:{}", self.context, suffix)
        };
        Self { context }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    fn meta_field(meta: Option<&Value>) -> String {
        meta.filter(|m| !m.is_null())
            .map(|m| m.to_string())
            .unwrap_or_default()
    }

    pub fn error(&self, message: &str, meta: Option<&Value>) {
        tracing::error!(context = %self.context, meta = %Self::meta_field(meta), "{}", message);
    }

    pub fn warn(&self, message: &str, meta: Option<&Value>) {
        tracing::warn!(context = %self.context, meta = %Self::meta_field(meta), "{}", message);
    }

    pub fn info(&self, message: &str, meta: Option<&Value>) {
        tracing::info!(context = %self.context, meta = %Self::meta_field(meta), "{}", message);
    }

    pub fn debug(&self, message: &str, meta: Option<&Value>) {
        tracing::debug!(context = %self.context, meta = %Self::meta_field(meta), "{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_extends_context() {
        let logger = Logger::new("bridge").child("directory").child("users");
        assert_eq!(logger.context(), "bridge:directory:users");
        assert_eq!(Logger::new("bridge").child("").context(), "bridge");
    }

    #[test]
    fn level_parsing_defaults_to_info() {
        assert_eq!(LogLevel::parse("WARN"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("verbose"), LogLevel::Info);
    }
}
