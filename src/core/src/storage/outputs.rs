use log::debug;

use super::console::ConsoleWriter;
use super::file_storage::FileWriter;
use super::storage_trait::OutputWriter;
use super::syslog::{self, SyslogWriter};
use super::webhook::WebhookWriter;
use crate::error_handling::types::{ConfigError, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Console,
    Webhook(String),
    Syslog { host: String, port: u16 },
    File(String),
}

impl OutputTarget {
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let target = target.trim();
        if target == "-" {
            return Ok(OutputTarget::Console);
        }
        if let Some(rest) = target
            .strip_prefix("http://")
            .or_else(|| target.strip_prefix("https://"))
        {
            if rest.is_empty() {
                return Err(ConfigError::BadOutput(target.to_string()));
            }
            return Ok(OutputTarget::Webhook(target.to_string()));
        }
        if let Some(rest) = target.strip_prefix("syslog://") {
            let (host, port) = syslog::parse_target(rest)?;
            return Ok(OutputTarget::Syslog { host, port });
        }
        if target.is_empty() {
            return Err(ConfigError::BadOutput("empty output target".to_string()));
        }
        Ok(OutputTarget::File(target.to_string()))
    }
}

/// Parses every target, adding the console once at the end when `-` was not listed.
pub fn parse_outputs(targets: &[String]) -> Result<Vec<OutputTarget>, ConfigError> {
    let mut parsed: Vec<OutputTarget> = Vec::new();
    for target in targets {
        let target = OutputTarget::parse(target)?;
        if target == OutputTarget::Console && parsed.contains(&OutputTarget::Console) {
            continue;
        }
        parsed.push(target);
    }
    if !parsed.contains(&OutputTarget::Console) {
        parsed.push(OutputTarget::Console);
    }
    Ok(parsed)
}

/// Opens a writer for every target, in order.
pub async fn build_writers(
    targets: &[OutputTarget],
) -> Result<Vec<Box<dyn OutputWriter>>, StorageError> {
    let mut writers: Vec<Box<dyn OutputWriter>> = Vec::with_capacity(targets.len());
    for target in targets {
        let writer: Box<dyn OutputWriter> = match target {
            OutputTarget::Console => Box::new(ConsoleWriter::stdout()),
            OutputTarget::Webhook(url) => Box::new(WebhookWriter::new(url)?),
            OutputTarget::Syslog { host, port } => Box::new(SyslogWriter::connect(host, *port).await?),
            OutputTarget::File(path) => Box::new(FileWriter::open(path).await?),
        };
        debug!("Registered output {}", writer.name());
        writers.push(writer);
    }
    Ok(writers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_console_is_always_present_once() {
        assert_eq!(parse_outputs(&[]).unwrap(), vec![OutputTarget::Console]);

        let parsed = parse_outputs(&targets(&["-", "/tmp/a.json", "-"])).unwrap();
        assert_eq!(
            parsed,
            vec![
                OutputTarget::Console,
                OutputTarget::File("/tmp/a.json".to_string())
            ]
        );

        let parsed = parse_outputs(&targets(&["https://hooks.example/x"])).unwrap();
        assert_eq!(
            parsed,
            vec![
                OutputTarget::Webhook("https://hooks.example/x".to_string()),
                OutputTarget::Console
            ]
        );
    }

    #[test]
    fn test_syslog_and_errors() {
        assert_eq!(
            OutputTarget::parse("syslog://collector:1514").unwrap(),
            OutputTarget::Syslog {
                host: "collector".to_string(),
                port: 1514
            }
        );
        assert!(OutputTarget::parse("syslog://").is_err());
        assert!(OutputTarget::parse("http://").is_err());
        assert!(OutputTarget::parse("  ").is_err());
    }

    #[tokio::test]
    async fn test_build_writers_opens_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.json").display().to_string();

        let parsed = parse_outputs(&[path.clone()]).unwrap();
        let writers = build_writers(&parsed).await.unwrap();
        assert_eq!(writers.len(), 2);
        assert_eq!(writers[0].name(), format!("file:{}", path));
        assert_eq!(writers[1].name(), "console");
        assert!(std::path::Path::new(&path).exists());
    }
}
