//! Content addressing and storage key utilities.

use gantry_core::artifact::ArtifactRef;
use gantry_core::{Error, Result};
use sha2::{Digest, Sha256};

/// Hex sha-256 of a blob.
pub fn digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check a blob against the digest carried by its reference.
pub fn verify_digest(reference: &ArtifactRef, data: &[u8]) -> Result<()> {
    let actual = digest(data);
    if actual != reference.digest {
        return Err(Error::ArtifactIntegrity {
            name: reference.to_string(),
            expected: reference.digest.clone(),
            actual,
        });
    }
    Ok(())
}

/// Sanitize a key for use as a single path segment.
///
/// Keys that are already safe pass through unchanged. Any other key gets a
/// short digest of the original appended, so `a/b` and `a_b` never share a
/// segment.
pub fn sanitize_key(key: &str) -> String {
    let mut sanitized: String = key
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();
    if matches!(sanitized.as_str(), "" | "." | "..") {
        sanitized.insert(0, '_');
    }
    if sanitized == key {
        return sanitized;
    }
    format!("{}-{}", sanitized, &digest(key.as_bytes())[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{JobId, RunId};

    #[test]
    fn test_digest_is_sha256_hex() {
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_digest_detects_tampering() {
        let reference = ArtifactRef {
            run_id: RunId::new(),
            producer: JobId::new("build"),
            name: "dist".into(),
            digest: digest(b"bundle"),
            size_bytes: 6,
        };
        assert!(verify_digest(&reference, b"bundle").is_ok());
        assert!(matches!(
            verify_digest(&reference, b"bundle!"),
            Err(Error::ArtifactIntegrity { .. })
        ));
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("dist"), "dist");
        assert_eq!(sanitize_key("my_cache_key"), "my_cache_key");

        let slashed = sanitize_key("my/cache/key");
        assert!(slashed.starts_with("my_cache_key-"));
        assert_eq!(slashed.len(), "my_cache_key-".len() + 8);
        assert_ne!(slashed, sanitize_key("my:cache:key"));
        assert!(sanitize_key("..").starts_with("_..-"));
        assert!(!sanitize_key("a\\b").contains('\\'));
    }
}
