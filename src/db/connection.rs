use std::path::{Path, PathBuf};
use std::time::Duration;

use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::error::{AdapterError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
    /// Skip certificate and hostname checks in `prefer`/`require` modes.
    pub accept_invalid_certs: bool,
    /// PEM file with extra root certificates.
    pub ca_cert_path: Option<PathBuf>,
    pub application_name: String,
}

/// SSL/TLS connection modes, matching the libpq `sslmode` parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 26257,
            database: String::from("defaultdb"),
            user: String::from("root"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
            application_name: String::from("crdb-adapter"),
        }
    }
}

impl ConnectionConfig {
    /// Reject configurations missing a required parameter.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("host", &self.host),
            ("database", &self.database),
            ("user", &self.user),
        ] {
            if value.trim().is_empty() {
                return Err(AdapterError::Configuration(format!(
                    "missing required connection parameter: {}",
                    field
                )));
            }
        }
        Ok(())
    }

    pub fn connection_string(&self) -> String {
        let mut conn = format!(
            "host={} port={} dbname={} user={} sslmode={} connect_timeout=10",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.user),
            // verify-* modes are enforced by the TLS connector, not libpq parsing
            match self.ssl_mode {
                SslMode::VerifyCa | SslMode::VerifyFull => "require",
                other => other.as_str(),
            }
        );
        if !self.password.is_empty() {
            conn.push_str(&format!(" password={}", quote_conn_value(&self.password)));
        }
        if !self.application_name.is_empty() {
            conn.push_str(&format!(
                " application_name={}",
                quote_conn_value(&self.application_name)
            ));
        }
        conn
    }

    pub fn display_string(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

/// Everything read from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdapterConfig {
    pub dialect: String,
    pub connection: ConnectionConfig,
    /// Overrides applied on top of the dialect's capability table.
    pub capabilities: toml::Table,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            dialect: String::from("cockroachdb"),
            connection: ConnectionConfig::default(),
            capabilities: toml::Table::new(),
        }
    }
}

impl AdapterConfig {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crdb-adapter")
            .join("config.toml")
    }

    /// Load from the default location; a missing file yields the defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AdapterConfig = toml::from_str(content)?;
        config.connection.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AdapterError::Configuration(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Open a client connection and spawn its connection task.
pub async fn create_client(config: &ConnectionConfig) -> Result<Client> {
    config.validate()?;
    let conn_string = config.connection_string();

    let client = match config.ssl_mode {
        SslMode::Disable => {
            let (client, connection) =
                tokio::time::timeout(CONNECT_TIMEOUT, tokio_postgres::connect(&conn_string, NoTls))
                    .await
                    .map_err(|_| timed_out())??;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("connection error: {}", e);
                }
            });
            client
        }
        mode => {
            let strict = matches!(mode, SslMode::VerifyCa | SslMode::VerifyFull);
            let tls = build_tls_connector(config, strict)?;
            let (client, connection) =
                tokio::time::timeout(CONNECT_TIMEOUT, tokio_postgres::connect(&conn_string, tls))
                    .await
                    .map_err(|_| timed_out())??;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("connection error: {}", e);
                }
            });
            client
        }
    };

    info!("connected to {}", config.display_string());
    Ok(client)
}

fn timed_out() -> AdapterError {
    AdapterError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("connection timed out after {}s", CONNECT_TIMEOUT.as_secs()),
    ))
}

fn build_tls_connector(config: &ConnectionConfig, strict_verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !strict_verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else {
        if config.ssl_mode == SslMode::VerifyCa {
            builder.danger_accept_invalid_hostnames(true);
        }
        if let Some(ca_path) = &config.ca_cert_path {
            let pem = std::fs::read(ca_path)?;
            let cert = native_tls::Certificate::from_pem(&pem).map_err(|e| {
                AdapterError::Configuration(format!(
                    "invalid CA certificate {}: {}",
                    ca_path.display(),
                    e
                ))
            })?;
            builder.add_root_certificate(cert);
        }
    }

    let connector = builder
        .build()
        .map_err(|e| AdapterError::Configuration(format!("failed to build TLS connector: {}", e)))?;
    Ok(MakeTlsConnector::new(connector))
}

/// Quote a value for a libpq key=value connection string.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_target_local_node() {
        let config = AdapterConfig::default();
        assert_eq!(config.dialect, "cockroachdb");
        assert_eq!(config.connection.port, 26257);
        assert_eq!(config.connection.database, "defaultdb");
        assert_eq!(config.connection.user, "root");
        assert!(config.capabilities.is_empty());
    }

    #[test]
    fn test_from_toml_with_capabilities() {
        let config = AdapterConfig::from_toml(
            r#"
            dialect = "crdb"

            [connection]
            host = "db.internal"
            ssl_mode = "verify-full"
            ca_cert_path = "/etc/certs/ca.crt"

            [capabilities]
            supports_comments = false
            "#,
        )
        .unwrap();
        assert_eq!(config.dialect, "crdb");
        assert_eq!(config.connection.host, "db.internal");
        assert_eq!(config.connection.port, 26257);
        assert_eq!(config.connection.ssl_mode, SslMode::VerifyFull);
        assert_eq!(
            config.capabilities.get("supports_comments"),
            Some(&toml::Value::Boolean(false))
        );
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = AdapterConfig::from_toml("[connection]\nuser = \"\"\n").unwrap_err();
        assert!(matches!(err, AdapterError::Configuration(msg) if msg.contains("user")));
    }

    #[test]
    fn test_malformed_toml_is_error() {
        assert!(matches!(
            AdapterConfig::from_toml("dialect = ["),
            Err(AdapterError::Toml(_))
        ));
    }

    #[test]
    fn test_connection_string_quotes_values() {
        let config = ConnectionConfig {
            password: "it's".into(),
            ..ConnectionConfig::default()
        };
        let conn = config.connection_string();
        assert!(conn.contains("port=26257"));
        assert!(conn.contains("password='it\\'s'"));
        assert!(conn.contains("application_name='crdb-adapter'"));
        assert!(conn.contains("sslmode=prefer"));
    }

    #[test]
    fn test_password_is_not_serialized() {
        let config = AdapterConfig {
            connection: ConnectionConfig {
                password: "secret".into(),
                ..ConnectionConfig::default()
            },
            ..AdapterConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AdapterConfig::load_from(Path::new("/nonexistent/crdb-adapter.toml")).unwrap();
        assert_eq!(config, AdapterConfig::default());
    }
}
