//! Node identity: an Ed25519 keypair under `<home>/keys/`.
//!
//! The inference path never uses it; the daemon guarantees the files
//! exist because the on-disk layout names them and peers may expect them.

use std::path::Path;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

/// File name of the hex-encoded secret key.
pub const KEY_FILE: &str = "node.key";

/// File name of the hex-encoded public key.
pub const PUB_FILE: &str = "node.pub";

/// The daemon's identity, as loaded or generated.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Hex-encoded public key.
    pub public_hex: String,
}

/// Load the keypair from `keys_dir`, generating and persisting one on
/// first start.
pub fn ensure_node_identity(keys_dir: &Path) -> std::io::Result<NodeIdentity> {
    let key_path = keys_dir.join(KEY_FILE);
    let pub_path = keys_dir.join(PUB_FILE);

    if key_path.is_file() {
        let key_hex = std::fs::read_to_string(&key_path)?;
        let bytes: [u8; 32] = hex::decode(key_hex.trim())
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{} is not a 32-byte hex key", key_path.display()),
                )
            })?;
        let signing = SigningKey::from_bytes(&bytes);
        let public_hex = hex::encode(signing.verifying_key().to_bytes());
        // Heal a missing public file; the secret is authoritative.
        if !pub_path.is_file() {
            std::fs::write(&pub_path, &public_hex)?;
        }
        return Ok(NodeIdentity { public_hex });
    }

    std::fs::create_dir_all(keys_dir)?;
    let signing = SigningKey::generate(&mut OsRng);
    let public_hex = hex::encode(signing.verifying_key().to_bytes());

    std::fs::write(&key_path, hex::encode(signing.to_bytes()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::write(&pub_path, &public_hex)?;

    tracing::info!(public = %public_hex, "generated node identity");
    Ok(NodeIdentity { public_hex })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_start_generates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let identity = ensure_node_identity(dir.path()).unwrap();

        assert_eq!(identity.public_hex.len(), 64);
        assert!(dir.path().join(KEY_FILE).is_file());
        assert!(dir.path().join(PUB_FILE).is_file());
    }

    #[test]
    fn restart_loads_the_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let first = ensure_node_identity(dir.path()).unwrap();
        let second = ensure_node_identity(dir.path()).unwrap();
        assert_eq!(first.public_hex, second.public_hex);
    }

    #[test]
    fn missing_public_file_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let first = ensure_node_identity(dir.path()).unwrap();
        std::fs::remove_file(dir.path().join(PUB_FILE)).unwrap();

        let second = ensure_node_identity(dir.path()).unwrap();
        assert_eq!(first.public_hex, second.public_hex);
        assert!(dir.path().join(PUB_FILE).is_file());
    }

    #[test]
    fn corrupt_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join(KEY_FILE), "not hex at all").unwrap();
        assert!(ensure_node_identity(dir.path()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn secret_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        ensure_node_identity(dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join(KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
