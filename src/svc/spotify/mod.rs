//! # Spotify module
//!
//! This module turns the credentials referenced by a managed resource into
//! the setup of the embedded terraform provider.

use std::fmt::{self, Debug, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::svc::{
    credentials::{self, Extractor},
    crd::{provider_config, provider_config::ProviderConfigClient, Managed},
    terraform::{ProviderConfiguration, ProviderRequirement, Setup},
};

// -----------------------------------------------------------------------------
// Constants

pub const KEY_API_KEY: &str = "api_key";
pub const KEY_AUTH_SERVER: &str = "auth_server";
pub const KEY_TOKEN_ID: &str = "token_id";
pub const KEY_USERNAME: &str = "username";

// -----------------------------------------------------------------------------
// Credentials structure

/// credentials of the spotify terraform provider as stored in the credential
/// source, unknown fields are ignored
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct Credentials {
    #[serde(rename = "api_key", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "auth_server", default, skip_serializing_if = "Option::is_none")]
    pub auth_server: Option<String>,
    #[serde(rename = "token_id", default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(rename = "username", default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let redact = |field: &Option<String>| field.as_ref().map(|_| "<redacted>");

        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("auth_server", &self.auth_server)
            .field("token_id", &redact(&self.token_id))
            .field("username", &self.username)
            .finish()
    }
}

/// returns the terraform provider configuration holding the credentials
/// fields which are present and not empty
pub fn provider_configuration(creds: &Credentials) -> ProviderConfiguration {
    [
        (KEY_API_KEY, &creds.api_key),
        (KEY_AUTH_SERVER, &creds.auth_server),
        (KEY_TOKEN_ID, &creds.token_id),
        (KEY_USERNAME, &creds.username),
    ]
    .into_iter()
    .filter_map(|(key, value)| match value {
        Some(value) if !value.is_empty() => Some((key.to_string(), value.to_owned())),
        _ => None,
    })
    .collect()
}

/// parses credentials from bytes which must hold a json object
pub fn parse_credentials(data: &[u8]) -> Result<Credentials, serde_json::Error> {
    let object: Map<String, Value> = serde_json::from_slice(data)?;

    serde_json::from_value(Value::Object(object))
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no providerConfigRef provided")]
    NoProviderConfig,
    #[error("cannot get referenced ProviderConfig, {0}")]
    GetProviderConfig(kube::Error),
    #[error("cannot track ProviderConfig usage, {0}")]
    TrackUsage(kube::Error),
    #[error("cannot extract credentials, {0}")]
    ExtractCredentials(credentials::Error),
    #[error("cannot unmarshal spotify credentials as JSON, {0}")]
    UnmarshalCredentials(serde_json::Error),
}

// -----------------------------------------------------------------------------
// SetupBuilder structure

/// builds the terraform setup of managed resources, bound to a terraform
/// version and a provider requirement
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SetupBuilder {
    version: String,
    provider_source: String,
    provider_version: String,
}

/// returns a [`SetupBuilder`] bound to the given versions and source
pub fn terraform_setup_builder(
    version: &str,
    provider_source: &str,
    provider_version: &str,
) -> SetupBuilder {
    SetupBuilder {
        version: version.to_string(),
        provider_source: provider_source.to_string(),
        provider_version: provider_version.to_string(),
    }
}

impl SetupBuilder {
    /// returns the setup without provider configuration
    pub fn base(&self) -> Setup {
        Setup {
            version: self.version.to_owned(),
            requirement: ProviderRequirement {
                source: self.provider_source.to_owned(),
                version: self.provider_version.to_owned(),
            },
            configuration: ProviderConfiguration::new(),
        }
    }

    /// resolves the credentials of the provider configuration referenced by
    /// the managed resource and returns the setup holding them
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn setup<C, X, M>(&self, client: &C, extractor: &X, mg: &M) -> Result<Setup, Error>
    where
        C: ProviderConfigClient + ?Sized,
        X: Extractor + ?Sized,
        M: Managed,
    {
        let mut setup = self.base();

        let reference = mg
            .provider_config_reference()
            .ok_or(Error::NoProviderConfig)?;

        debug!(
            kind = M::kind(&()).to_string(),
            name = mg.name_any(),
            provider_config = &reference.name,
            "Retrieve provider configuration of managed resource"
        );

        let pc = client
            .get_provider_config(&reference.name)
            .await
            .map_err(Error::GetProviderConfig)?;

        client
            .track_usage(&provider_config::usage(mg, &reference.name))
            .await
            .map_err(Error::TrackUsage)?;

        let data = extractor
            .extract(&pc.spec.credentials.source, &pc.spec.credentials.selectors)
            .await
            .map_err(Error::ExtractCredentials)?;

        let creds = parse_credentials(&data).map_err(Error::UnmarshalCredentials)?;

        trace!(credentials = ?creds, "Build terraform provider configuration");
        setup.configuration = provider_configuration(&creds);

        Ok(setup)
    }
}

#[cfg(test)]
mod tests {
    use crate::svc::{
        credentials::{MockExtractor, Selectors, Source},
        crd::{
            playlist::{Parameters, Playlist, Spec},
            provider_config::{
                MockProviderConfigClient, ProviderConfig, ProviderConfigSpec, ProviderCredentials,
            },
            Reference,
        },
    };

    use super::*;

    fn builder() -> SetupBuilder {
        terraform_setup_builder("1.5.5", "conradludgate/spotify", "0.2.7")
    }

    fn playlist(reference: Option<&str>) -> Playlist {
        let mut playlist = Playlist::new(
            "road-trip",
            Spec {
                for_provider: Parameters {
                    name: "Road trip".into(),
                    description: None,
                    public: Some(false),
                    tracks: vec![],
                },
                provider_config_ref: reference.map(Reference::from),
            },
        );

        playlist.metadata.uid = Some("5e1c".into());
        playlist
    }

    fn provider_config() -> ProviderConfig {
        ProviderConfig::new(
            "default",
            ProviderConfigSpec {
                credentials: ProviderCredentials {
                    source: Source::Environment,
                    selectors: Selectors::default(),
                },
            },
        )
    }

    fn not_found() -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "providerconfigs.spotify.crossplane.io \"default\" not found".into(),
            reason: "NotFound".into(),
            code: 404,
        })
    }

    fn client() -> MockProviderConfigClient {
        let mut client = MockProviderConfigClient::new();
        client
            .expect_get_provider_config()
            .withf(|name| name == "default")
            .returning(|_| Ok(provider_config()));
        client.expect_track_usage().returning(|_| Ok(()));
        client
    }

    fn extractor(data: &'static [u8]) -> MockExtractor {
        let mut extractor = MockExtractor::new();
        extractor
            .expect_extract()
            .withf(|source, _| *source == Source::Environment)
            .returning(move |_, _| Ok(data.to_vec()));
        extractor
    }

    fn creds(
        api_key: Option<&str>,
        auth_server: Option<&str>,
        token_id: Option<&str>,
        username: Option<&str>,
    ) -> Credentials {
        Credentials {
            api_key: api_key.map(ToOwned::to_owned),
            auth_server: auth_server.map(ToOwned::to_owned),
            token_id: token_id.map(ToOwned::to_owned),
            username: username.map(ToOwned::to_owned),
        }
    }

    #[test]
    fn configuration_contains_exactly_the_present_fields() {
        let values = [Some("abc"), None];
        for api_key in values {
            for auth_server in values {
                for token_id in values {
                    for username in values {
                        let cnf = provider_configuration(&creds(
                            api_key,
                            auth_server,
                            token_id,
                            username,
                        ));

                        let expected: Vec<&str> = [
                            (KEY_API_KEY, api_key),
                            (KEY_AUTH_SERVER, auth_server),
                            (KEY_TOKEN_ID, token_id),
                            (KEY_USERNAME, username),
                        ]
                        .into_iter()
                        .filter_map(|(key, value)| value.map(|_| key))
                        .collect();

                        let mut keys: Vec<&str> = cnf.keys().map(String::as_str).collect();
                        keys.sort_unstable();
                        let mut expected = expected;
                        expected.sort_unstable();

                        assert_eq!(keys, expected);
                        assert!(cnf.values().all(|v| v == "abc"));
                    }
                }
            }
        }
    }

    #[test]
    fn empty_fields_are_omitted() {
        let cnf = provider_configuration(&creds(Some(""), None, Some("tok"), Some("")));

        assert_eq!(
            cnf,
            ProviderConfiguration::from([(KEY_TOKEN_ID.to_string(), "tok".to_string())])
        );
    }

    #[test]
    fn debug_does_not_leak_secrets() {
        let output = format!(
            "{:?}",
            creds(Some("s3cr3t-key"), None, Some("s3cr3t-token"), Some("bob"))
        );

        assert!(!output.contains("s3cr3t-key"));
        assert!(!output.contains("s3cr3t-token"));
        assert!(output.contains("<redacted>"));
        assert!(output.contains("bob"));
    }

    #[tokio::test]
    async fn setup_with_api_key_and_username() {
        let setup = builder()
            .setup(
                &client(),
                &extractor(br#"{"api_key": "abc", "username": "bob"}"#),
                &playlist(Some("default")),
            )
            .await
            .expect("setup to be built");

        assert_eq!(setup.version, "1.5.5");
        assert_eq!(setup.requirement.source, "conradludgate/spotify");
        assert_eq!(setup.requirement.version, "0.2.7");
        assert_eq!(
            setup.configuration,
            ProviderConfiguration::from([
                ("api_key".to_string(), "abc".to_string()),
                ("username".to_string(), "bob".to_string()),
            ])
        );
    }

    #[tokio::test]
    async fn unknown_credential_fields_are_ignored() {
        let setup = builder()
            .setup(
                &client(),
                &extractor(br#"{"token_id": "tok", "refresh_token": "ignored"}"#),
                &playlist(Some("default")),
            )
            .await
            .expect("setup to be built");

        assert_eq!(
            setup.configuration,
            ProviderConfiguration::from([("token_id".to_string(), "tok".to_string())])
        );
    }

    #[tokio::test]
    async fn missing_reference() {
        let mut client = MockProviderConfigClient::new();
        client.expect_get_provider_config().never();
        client.expect_track_usage().never();

        let mut extractor = MockExtractor::new();
        extractor.expect_extract().never();

        let result = builder()
            .setup(&client, &extractor, &playlist(None))
            .await;

        assert!(matches!(result, Err(Error::NoProviderConfig)));

        let base = builder().base();
        assert_eq!(base.version, "1.5.5");
        assert_eq!(base.requirement.source, "conradludgate/spotify");
        assert_eq!(base.requirement.version, "0.2.7");
        assert!(base.configuration.is_empty());
    }

    #[tokio::test]
    async fn lookup_failure_wraps_the_client_error() {
        let mut client = MockProviderConfigClient::new();
        client
            .expect_get_provider_config()
            .returning(|_| Err(not_found()));
        client.expect_track_usage().never();

        let mut extractor = MockExtractor::new();
        extractor.expect_extract().never();

        let result = builder()
            .setup(&client, &extractor, &playlist(Some("default")))
            .await;

        match result {
            Err(err @ Error::GetProviderConfig(kube::Error::Api(_))) => {
                let message = err.to_string();
                assert!(message.starts_with("cannot get referenced ProviderConfig"));
                assert!(message.contains("not found"));
            }
            other => panic!("expected lookup failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tracking_failure() {
        let mut client = MockProviderConfigClient::new();
        client
            .expect_get_provider_config()
            .returning(|_| Ok(provider_config()));
        client
            .expect_track_usage()
            .withf(|usage| usage.spec.provider_config_ref.name == "default")
            .returning(|_| Err(not_found()));

        let mut extractor = MockExtractor::new();
        extractor.expect_extract().never();

        let result = builder()
            .setup(&client, &extractor, &playlist(Some("default")))
            .await;

        assert!(matches!(result, Err(Error::TrackUsage(_))));
    }

    #[tokio::test]
    async fn extraction_failure() {
        let mut extractor = MockExtractor::new();
        extractor.expect_extract().returning(|source, _| {
            Err(credentials::Error::MissingSelector(*source, "env"))
        });

        let result = builder()
            .setup(&client(), &extractor, &playlist(Some("default")))
            .await;

        assert!(matches!(
            result,
            Err(Error::ExtractCredentials(credentials::Error::MissingSelector(
                Source::Environment,
                "env"
            )))
        ));
    }

    #[tokio::test]
    async fn malformed_credentials() {
        let result = builder()
            .setup(
                &client(),
                &extractor(b"api_key=abc"),
                &playlist(Some("default")),
            )
            .await;

        assert!(matches!(result, Err(Error::UnmarshalCredentials(_))));
    }

    #[test]
    fn credentials_must_be_a_json_object() {
        assert!(parse_credentials(br#"["abc", null, null, "bob"]"#).is_err());
        assert!(parse_credentials(br#""abc""#).is_err());
        assert!(parse_credentials(b"null").is_err());

        assert_eq!(
            parse_credentials(br#"{"api_key": "abc", "username": "bob"}"#)
                .expect("object to be parsed"),
            creds(Some("abc"), None, None, Some("bob"))
        );
    }

    #[tokio::test]
    async fn array_credentials_are_rejected() {
        let result = builder()
            .setup(
                &client(),
                &extractor(br#"["abc", null, null, "bob"]"#),
                &playlist(Some("default")),
            )
            .await;

        assert!(matches!(result, Err(Error::UnmarshalCredentials(_))));
    }
}
