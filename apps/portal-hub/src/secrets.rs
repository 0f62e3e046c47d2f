use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Per-robot credentials loaded from `<dir>/<robot-id>.key` files. Secrets
/// are immutable after load and rotated out-of-band; they are never logged.
#[derive(Debug, Default)]
pub struct CredentialStore {
    secrets: HashMap<String, String>,
}

impl CredentialStore {
    /// Load every `*.key` file in the directory. A missing directory means
    /// no robot can authenticate and is reported as a warning; a path that
    /// exists but is not a directory is a startup error.
    pub fn load(dir: &Path) -> std::io::Result<Self> {
        if !dir.exists() {
            warn!(
                "robot secrets directory not found: {}; no robots will be able to authenticate",
                dir.display()
            );
            return Ok(Self::default());
        }
        if !dir.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} exists but is not a directory", dir.display()),
            ));
        }

        let mut secrets = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("key") {
                continue;
            }
            let Some(robot_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !valid_robot_id(robot_id) {
                warn!("skipping secret file with invalid robot id: {}", path.display());
                continue;
            }
            let secret = std::fs::read_to_string(&path)?.trim().to_string();
            if secret.is_empty() {
                warn!("skipping empty secret file: {}", path.display());
                continue;
            }
            info!("loaded secret key for robot: {}", robot_id);
            secrets.insert(robot_id.to_string(), secret);
        }

        info!("loaded {} robot secret keys", secrets.len());
        Ok(Self { secrets })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            secrets: pairs
                .into_iter()
                .map(|(id, secret)| (id.into(), secret.into()))
                .collect(),
        }
    }

    /// Compare a presented secret against the stored credential. Both sides
    /// are hashed first so the comparison never short-circuits on the raw
    /// secret bytes.
    pub fn validate(&self, robot_id: &str, secret: &str) -> bool {
        match self.secrets.get(robot_id) {
            Some(stored) => digest(stored) == digest(secret),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }
}

fn digest(secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

fn valid_robot_id(robot_id: &str) -> bool {
    !robot_id.is_empty()
        && robot_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("portal-hub-secrets-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_key_files_and_validates() {
        let dir = scratch_dir();
        std::fs::write(dir.join("r1.key"), "tops3cret\n").unwrap();
        std::fs::write(dir.join("bad id.key"), "whatever").unwrap();
        std::fs::write(dir.join("empty.key"), "  \n").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let store = CredentialStore::load(&dir).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.validate("r1", "tops3cret"));
        assert!(!store.validate("r1", "wrong"));
        assert!(!store.validate("bad id", "whatever"));
        assert!(!store.validate("empty", ""));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_yields_empty_store() {
        let dir = std::env::temp_dir().join(format!("portal-hub-missing-{}", Uuid::new_v4()));
        let store = CredentialStore::load(&dir).unwrap();
        assert_eq!(store.len(), 0);
        assert!(!store.validate("r1", "anything"));
    }

    #[test]
    fn unknown_robot_never_validates() {
        let store = CredentialStore::from_pairs([("r1", "abc")]);
        assert!(!store.validate("r2", "abc"));
    }
}
