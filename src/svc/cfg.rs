//! # Configuration module
//!
//! This module provide utilities and helpers to interact with the configuration

use std::{convert::TryFrom, net::SocketAddr, path::PathBuf, time::Duration};

use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Constants

pub const TERRAFORM_VERSION: &str = "1.5.5";
pub const TERRAFORM_PROVIDER_SOURCE: &str = "conradludgate/spotify";
pub const TERRAFORM_PROVIDER_VERSION: &str = "0.2.7";
pub const OPERATOR_LISTEN: &str = "0.0.0.0:8000";
pub const OPERATOR_POLL_INTERVAL: u64 = 60;

// -----------------------------------------------------------------------------
// Terraform structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Terraform {
    #[serde(rename = "version")]
    pub version: String,
    #[serde(rename = "provider_source")]
    pub provider_source: String,
    #[serde(rename = "provider_version")]
    pub provider_version: String,
    #[serde(rename = "workspace")]
    pub workspace: PathBuf,
}

// -----------------------------------------------------------------------------
// Operator structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Operator {
    #[serde(rename = "listen")]
    pub listen: SocketAddr,
    /// interval in seconds between two reconciliations of a healthy resource
    #[serde(rename = "poll_interval")]
    pub poll_interval: u64,
}

impl Operator {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

// -----------------------------------------------------------------------------
// Sentry structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Sentry {
    #[serde(rename = "dsn")]
    pub dsn: String,
}

// -----------------------------------------------------------------------------
// Jaeger structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Jaeger {
    #[serde(rename = "endpoint")]
    pub endpoint: String,
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to build configuration, {0}")]
    Build(ConfigError),
    #[error("failed to cast configuration, {0}")]
    Cast(ConfigError),
    #[error("failed to set default for key '{0}', {1}")]
    Default(String, ConfigError),
}

// -----------------------------------------------------------------------------
// Configuration structures

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Configuration {
    #[serde(rename = "terraform")]
    pub terraform: Terraform,
    #[serde(rename = "operator")]
    pub operator: Operator,
    #[serde(rename = "sentry", default, skip_serializing_if = "Option::is_none")]
    pub sentry: Option<Sentry>,
    #[serde(rename = "jaeger", default, skip_serializing_if = "Option::is_none")]
    pub jaeger: Option<Jaeger>,
}

impl TryFrom<PathBuf> for Configuration {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        defaults()?
            .add_source(environment())
            .add_source(File::from(path).required(true))
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Cast)
    }
}

impl Configuration {
    pub fn try_default() -> Result<Self, Error> {
        let mut builder = defaults()?.add_source(environment());

        let mut paths = vec![
            PathBuf::from(format!("/usr/share/{}/config", env!("CARGO_PKG_NAME"))),
            PathBuf::from(format!("/etc/{}/config", env!("CARGO_PKG_NAME"))),
        ];

        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(format!(
                "{}/.config/{}/config",
                home,
                env!("CARGO_PKG_NAME")
            )));
        }

        paths.push(PathBuf::from("config"));

        for path in paths {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder
            .build()
            .map_err(Error::Build)?
            .try_deserialize()
            .map_err(Error::Cast)
    }
}

// -----------------------------------------------------------------------------
// helpers

fn defaults() -> Result<ConfigBuilder<DefaultState>, Error> {
    let workspace = std::env::temp_dir().join(env!("CARGO_PKG_NAME"));

    Config::builder()
        .set_default("terraform.version", TERRAFORM_VERSION)
        .map_err(|err| Error::Default("terraform.version".into(), err))?
        .set_default("terraform.provider_source", TERRAFORM_PROVIDER_SOURCE)
        .map_err(|err| Error::Default("terraform.provider_source".into(), err))?
        .set_default("terraform.provider_version", TERRAFORM_PROVIDER_VERSION)
        .map_err(|err| Error::Default("terraform.provider_version".into(), err))?
        .set_default(
            "terraform.workspace",
            workspace.to_string_lossy().to_string(),
        )
        .map_err(|err| Error::Default("terraform.workspace".into(), err))?
        .set_default("operator.listen", OPERATOR_LISTEN)
        .map_err(|err| Error::Default("operator.listen".into(), err))?
        .set_default("operator.poll_interval", OPERATOR_POLL_INTERVAL as i64)
        .map_err(|err| Error::Default("operator.poll_interval".into(), err))
}

fn environment() -> Environment {
    Environment::with_prefix(&env!("CARGO_PKG_NAME").replace('-', "_"))
        .separator("__")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_used_when_the_file_is_sparse() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temporary file to be created");

        writeln!(file, "[operator]\nlisten = \"127.0.0.1:9000\"").expect("file to be written");

        let config = Configuration::try_from(file.path().to_path_buf())
            .expect("configuration to be loaded");

        assert_eq!(config.terraform.version, TERRAFORM_VERSION);
        assert_eq!(config.terraform.provider_source, TERRAFORM_PROVIDER_SOURCE);
        assert_eq!(config.terraform.provider_version, TERRAFORM_PROVIDER_VERSION);
        assert_eq!(config.operator.listen.to_string(), "127.0.0.1:9000");
        assert_eq!(
            config.operator.poll_interval(),
            Duration::from_secs(OPERATOR_POLL_INTERVAL)
        );
        assert!(config.sentry.is_none());
        assert!(config.jaeger.is_none());
    }

    #[test]
    fn optional_sections_are_read() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temporary file to be created");

        writeln!(
            file,
            "[terraform]\nprovider_version = \"0.3.0\"\n\n[sentry]\ndsn = \"https://key@sentry.example/1\"\n\n[jaeger]\nendpoint = \"http://jaeger:14268/api/traces\""
        )
        .expect("file to be written");

        let config = Configuration::try_from(file.path().to_path_buf())
            .expect("configuration to be loaded");

        assert_eq!(config.terraform.provider_version, "0.3.0");
        assert_eq!(
            config.sentry.map(|sentry| sentry.dsn),
            Some("https://key@sentry.example/1".to_string())
        );
        assert_eq!(
            config.jaeger.map(|jaeger| jaeger.endpoint),
            Some("http://jaeger:14268/api/traces".to_string())
        );
    }

    #[test]
    fn environment_overrides_every_key() {
        let variables = [
            ("PROVIDER_SPOTIFY__OPERATOR__LISTEN", "127.0.0.1:9999"),
            ("PROVIDER_SPOTIFY__OPERATOR__POLL_INTERVAL", "5"),
            ("PROVIDER_SPOTIFY__TERRAFORM__VERSION", "1.6.0"),
            ("PROVIDER_SPOTIFY__TERRAFORM__PROVIDER_SOURCE", "example/spotify"),
            ("PROVIDER_SPOTIFY__TERRAFORM__PROVIDER_VERSION", "9.9.9"),
            ("PROVIDER_SPOTIFY__TERRAFORM__WORKSPACE", "/var/lib/provider-spotify"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config: Configuration = defaults()
            .expect("defaults to be set")
            .add_source(environment().source(Some(variables)))
            .build()
            .expect("configuration to be built")
            .try_deserialize()
            .expect("configuration to be deserialized");

        assert_eq!(config.operator.listen.to_string(), "127.0.0.1:9999");
        assert_eq!(config.operator.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.terraform.version, "1.6.0");
        assert_eq!(config.terraform.provider_source, "example/spotify");
        assert_eq!(config.terraform.provider_version, "9.9.9");
        assert_eq!(
            config.terraform.workspace,
            PathBuf::from("/var/lib/provider-spotify")
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = Configuration::try_from(PathBuf::from("/does/not/exist.toml"));

        assert!(matches!(result, Err(Error::Build(_))));
    }
}
