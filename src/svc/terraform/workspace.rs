//! # Workspace module
//!
//! This module renders the terraform configuration of a managed resource and
//! writes it in a per-resource directory. Terraform itself is not executed.

use std::{fs::Permissions, os::unix::fs::PermissionsExt, path::PathBuf};

use serde_json::{json, Value};
use tokio::{
    fs::{DirBuilder, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::debug;

use crate::svc::terraform::Setup;

// -----------------------------------------------------------------------------
// Constants

pub const MAIN_FILE: &str = "main.tf.json";

/// the configuration embeds credentials, only the owner may read it
pub const DIR_MODE: u32 = 0o700;
pub const FILE_MODE: u32 = 0o600;

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create workspace directory '{0}', {1}")]
    CreateDir(PathBuf, std::io::Error),
    #[error("failed to serialize terraform configuration, {0}")]
    Serialize(serde_json::Error),
    #[error("failed to write terraform configuration '{0}', {1}")]
    Write(PathBuf, std::io::Error),
    #[error("failed to remove workspace directory '{0}', {1}")]
    Remove(PathBuf, std::io::Error),
}

// -----------------------------------------------------------------------------
// helpers

/// returns the terraform json configuration declaring the provider
/// requirement, the provider configuration and the given resource block
pub fn document(setup: &Setup, resource_type: &str, name: &str, parameters: Value) -> Value {
    let provider = setup.requirement.name();

    json!({
        "terraform": {
            "required_providers": {
                provider: {
                    "source": setup.requirement.source,
                    "version": setup.requirement.version,
                }
            }
        },
        "provider": {
            provider: setup.configuration,
        },
        "resource": {
            resource_type: {
                name: parameters,
            }
        }
    })
}

// -----------------------------------------------------------------------------
// Workspace structure

/// root directory holding one sub directory per managed resource
#[derive(Clone, Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl From<PathBuf> for Workspace {
    fn from(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Workspace {
    pub fn path(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// write the document in the workspace of the given identifier and
    /// returns the path of the written file
    pub async fn write(&self, id: &str, document: &Value) -> Result<PathBuf, Error> {
        let dir = self.path(id);
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&dir)
            .await
            .map_err(|err| Error::CreateDir(dir.to_owned(), err))?;

        // an existing directory keeps its mode on creation
        tokio::fs::set_permissions(&dir, Permissions::from_mode(DIR_MODE))
            .await
            .map_err(|err| Error::CreateDir(dir.to_owned(), err))?;

        let path = dir.join(MAIN_FILE);
        let buf = serde_json::to_vec_pretty(document).map_err(Error::Serialize)?;

        debug!(path = ?path, "Write terraform configuration");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&path)
            .await
            .map_err(|err| Error::Write(path.to_owned(), err))?;

        file.set_permissions(Permissions::from_mode(FILE_MODE))
            .await
            .map_err(|err| Error::Write(path.to_owned(), err))?;
        file.write_all(&buf)
            .await
            .map_err(|err| Error::Write(path.to_owned(), err))?;
        file.flush()
            .await
            .map_err(|err| Error::Write(path.to_owned(), err))?;

        Ok(path)
    }

    /// remove the workspace of the given identifier, a missing workspace is
    /// not an error
    pub async fn remove(&self, id: &str) -> Result<(), Error> {
        let dir = self.path(id);

        debug!(path = ?dir, "Remove terraform workspace");
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Remove(dir, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::svc::terraform::{ProviderConfiguration, ProviderRequirement};

    use super::*;

    fn setup() -> Setup {
        Setup {
            version: "1.5.5".into(),
            requirement: ProviderRequirement {
                source: "conradludgate/spotify".into(),
                version: "0.2.7".into(),
            },
            configuration: ProviderConfiguration::from([("api_key".to_string(), "abc".to_string())]),
        }
    }

    #[test]
    fn document_declares_provider_and_resource() {
        let doc = document(
            &setup(),
            "spotify_playlist",
            "road-trip",
            json!({"name": "Road trip", "tracks": ["4uLU6hMCjMI75M1A2tKUQC"]}),
        );

        assert_eq!(
            doc["terraform"]["required_providers"]["spotify"],
            json!({"source": "conradludgate/spotify", "version": "0.2.7"})
        );
        assert_eq!(doc["provider"]["spotify"], json!({"api_key": "abc"}));
        assert_eq!(
            doc["resource"]["spotify_playlist"]["road-trip"]["name"],
            json!("Road trip")
        );
    }

    #[tokio::test]
    async fn write_then_remove() {
        let root = tempfile::tempdir().expect("temporary directory to be created");
        let workspace = Workspace::from(root.path().to_path_buf());
        let doc = document(&setup(), "spotify_playlist", "road-trip", json!({}));

        let path = workspace
            .write("0b9c2f", &doc)
            .await
            .expect("document to be written");

        assert_eq!(path, root.path().join("0b9c2f").join(MAIN_FILE));

        let content = tokio::fs::read(&path).await.expect("document to be read");
        let written: Value = serde_json::from_slice(&content).expect("document to be json");
        assert_eq!(written, doc);

        workspace.remove("0b9c2f").await.expect("workspace to be removed");
        assert!(!workspace.path("0b9c2f").exists());

        workspace
            .remove("0b9c2f")
            .await
            .expect("removing a missing workspace to succeed");
    }

    fn mode(path: &std::path::Path) -> u32 {
        std::fs::metadata(path)
            .expect("metadata to be read")
            .permissions()
            .mode()
            & 0o777
    }

    #[tokio::test]
    async fn only_the_owner_can_read_the_configuration() {
        let root = tempfile::tempdir().expect("temporary directory to be created");
        let workspace = Workspace::from(root.path().join("workspaces"));
        let doc = document(&setup(), "spotify_playlist", "road-trip", json!({}));

        let path = workspace
            .write("0b9c2f", &doc)
            .await
            .expect("document to be written");

        assert_eq!(mode(&path), FILE_MODE);
        assert_eq!(mode(&workspace.path("0b9c2f")), DIR_MODE);
        assert_eq!(mode(&root.path().join("workspaces")), DIR_MODE);
    }

    #[tokio::test]
    async fn rewriting_restricts_existing_files() {
        let root = tempfile::tempdir().expect("temporary directory to be created");
        let workspace = Workspace::from(root.path().to_path_buf());
        let dir = workspace.path("0b9c2f");

        std::fs::create_dir_all(&dir).expect("directory to be created");
        std::fs::write(dir.join(MAIN_FILE), b"{}").expect("file to be written");
        std::fs::set_permissions(&dir, Permissions::from_mode(0o755)).expect("mode to be set");
        std::fs::set_permissions(dir.join(MAIN_FILE), Permissions::from_mode(0o644))
            .expect("mode to be set");

        let doc = document(&setup(), "spotify_playlist", "road-trip", json!({}));
        let path = workspace
            .write("0b9c2f", &doc)
            .await
            .expect("document to be written");

        assert_eq!(mode(&path), FILE_MODE);
        assert_eq!(mode(&dir), DIR_MODE);

        let content = std::fs::read(&path).expect("document to be read");
        let written: Value = serde_json::from_slice(&content).expect("document to be json");
        assert_eq!(written, doc);
    }
}
