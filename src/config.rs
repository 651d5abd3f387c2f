//! Runtime settings.
//!
//! Settings live in a TOML file. Every field has a default, so a partial
//! file is valid, and [`Settings::load`] writes the defaults out when the
//! file does not exist yet.
//!
//! ```toml
//! period_ms = 60000
//! backoff_ms = 30000
//! pdu_size = 480
//! connection_type = "basic"
//! controllers_csv = "controllers.csv"
//! tags_csv = "tags.csv"
//! archive_dir = "archive"
//! log_level = "info"
//! log_format = "text"
//!
//! [int_archive]
//! name = "int_archive"
//! id_column = "TrendId"
//! date_column = "DateSet"
//! value_column = "TagValue"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::area::ConnectionType;
use crate::client::SessionConfig;
use crate::error::Result;
use crate::reader::ReaderConfig;
use crate::transport::Timeouts;

/// Destination table of one storage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveTable {
    /// Table name.
    pub name: String,
    /// Column receiving the tag id.
    pub id_column: String,
    /// Column receiving the timestamp.
    pub date_column: String,
    /// Column receiving the value.
    pub value_column: String,
}

impl ArchiveTable {
    /// A table with the default column names.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

impl Default for ArchiveTable {
    fn default() -> Self {
        Self {
            name: "int_archive".to_string(),
            id_column: "TrendId".to_string(),
            date_column: "DateSet".to_string(),
            value_column: "TagValue".to_string(),
        }
    }
}

/// Output form of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
    /// Abbreviated single lines.
    Compact,
}

/// All runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sampling period in milliseconds.
    pub period_ms: u64,
    /// Wait after a failed connect, in milliseconds.
    pub backoff_ms: u64,
    /// Requested PDU size.
    pub pdu_size: u16,
    /// Probe and connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Socket read timeout in milliseconds.
    pub read_timeout_ms: u64,
    /// Socket write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Connection type requested from every controller.
    pub connection_type: ConnectionType,
    /// Controller sheet.
    pub controllers_csv: PathBuf,
    /// Tag sheet.
    pub tags_csv: PathBuf,
    /// Directory of the CSV archive.
    pub archive_dir: PathBuf,
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Log output form.
    pub log_format: LogFormat,
    /// Table for the signed-integer bucket.
    pub int_archive: ArchiveTable,
    /// Table for the unsigned 64-bit bucket.
    pub ulong_archive: ArchiveTable,
    /// Table for the floating bucket.
    pub double_archive: ArchiveTable,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            period_ms: 60_000,
            backoff_ms: 30_000,
            pdu_size: 480,
            connect_timeout_ms: 1000,
            read_timeout_ms: 2000,
            write_timeout_ms: 2000,
            connection_type: ConnectionType::Basic,
            controllers_csv: PathBuf::from("controllers.csv"),
            tags_csv: PathBuf::from("tags.csv"),
            archive_dir: PathBuf::from("archive"),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            int_archive: ArchiveTable::named("int_archive"),
            ulong_archive: ArchiveTable::named("ulong_archive"),
            double_archive: ArchiveTable::named("double_archive"),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, writing and returning the defaults when
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// [`S7Error::Io`](crate::S7Error::Io) on file errors,
    /// [`S7Error::Config`](crate::S7Error::Config) when the file does not
    /// parse. An unparsable file is left untouched.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let settings = Self::default();
            settings.save(path)?;
            info!(path = %path.display(), "wrote default settings");
            return Ok(settings);
        }
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Writes the settings to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// [`S7Error::Io`](crate::S7Error::Io) or
    /// [`S7Error::ConfigWrite`](crate::S7Error::ConfigWrite).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Socket timeouts.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
            write: Duration::from_millis(self.write_timeout_ms),
        }
    }

    /// Sampling loop timing.
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            period: Duration::from_millis(self.period_ms),
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    /// Session configuration for one controller.
    pub fn session_config(&self, host: &str, port: u16, rack: u8, slot: u8) -> SessionConfig {
        SessionConfig::new(host)
            .with_port(port)
            .with_rack_slot(rack, slot)
            .with_connection_type(self.connection_type)
            .with_pdu_size(self.pdu_size)
            .with_timeouts(self.timeouts())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.reader_config().period, Duration::from_secs(60));
        assert_eq!(settings.reader_config().backoff, Duration::from_secs(30));
        assert_eq!(settings.timeouts(), Timeouts::default());
        assert_eq!(settings.ulong_archive.name, "ulong_archive");
        assert_eq!(settings.double_archive.id_column, "TrendId");
    }

    #[test]
    fn test_load_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("settings.toml");
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(path.exists());
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "period_ms = 5000\nconnection_type = \"pg\"\nlog_format = \"json\"\n\n[double_archive]\nname = \"reals\"\n",
        )
        .unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.period_ms, 5000);
        assert_eq!(settings.connection_type, ConnectionType::Pg);
        assert_eq!(settings.log_format, LogFormat::Json);
        assert_eq!(settings.double_archive.name, "reals");
        assert_eq!(settings.double_archive.value_column, "TagValue");
        assert_eq!(settings.backoff_ms, 30_000);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "period_ms = \"soon\"").unwrap();
        assert!(Settings::load(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "period_ms = \"soon\"");
    }

    #[test]
    fn test_session_config() {
        let settings = Settings {
            pdu_size: 2000,
            ..Settings::default()
        };
        let config = settings.session_config("10.0.0.5", 102, 0, 2);
        assert_eq!(config.pdu_size, 960);
        assert_eq!(config.remote_tsap(), 0x0302);
    }
}
