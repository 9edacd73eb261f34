//! Image reference rewriting in deployment descriptors.

use gantry_core::{Error, Result};
use regex::Regex;
use tracing::debug;

/// Result of applying a new image to a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// The descriptor text after the update.
    pub descriptor: String,
    /// False when every matched reference already equals the new image.
    pub changed: bool,
    /// Number of `image:` lines that matched the repository.
    pub matched: usize,
}

/// Rewrites `image:` lines that point at one repository.
#[derive(Debug, Clone)]
pub struct DeploymentUpdater {
    repository: String,
    pattern: Regex,
}

impl DeploymentUpdater {
    /// `repository` is the `<registry>/<repository>` prefix, without a tag.
    pub fn new(repository: impl Into<String>) -> Result<Self> {
        let repository = repository.into();
        if repository.is_empty() || repository.contains(char::is_whitespace) {
            return Err(Error::DescriptorMismatch(format!(
                "invalid image repository '{}'",
                repository
            )));
        }
        let pattern = Regex::new(&format!(
            r#"(?m)^[ \t]*(?:-[ \t]+)?image:[ \t]*["']?(?P<reference>{}:[^\s"'#]+)"#,
            regex::escape(&repository)
        ))
        .map_err(|e| Error::Internal(format!("Invalid image pattern: {}", e)))?;
        Ok(Self {
            repository,
            pattern,
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Replace every reference to the repository with `new_image`. Only the
    /// reference itself changes; indentation, quoting, comments and line
    /// endings are kept byte for byte.
    pub fn apply(&self, descriptor: &str, new_image: &str) -> Result<UpdateOutcome> {
        self.check_image(new_image)?;

        let mut updated = String::with_capacity(descriptor.len() + new_image.len());
        let mut last = 0;
        let mut matched = 0;
        let mut changed = false;

        for caps in self.pattern.captures_iter(descriptor) {
            let Some(reference) = caps.name("reference") else {
                continue;
            };
            matched += 1;
            if reference.as_str() != new_image {
                changed = true;
            }
            updated.push_str(&descriptor[last..reference.start()]);
            updated.push_str(new_image);
            last = reference.end();
        }
        updated.push_str(&descriptor[last..]);

        if matched == 0 {
            return Err(Error::DescriptorMismatch(format!(
                "no image line references '{}'",
                self.repository
            )));
        }

        debug!(matched, changed, image = new_image, "Applied image to descriptor");
        Ok(UpdateOutcome {
            descriptor: if changed { updated } else { descriptor.to_string() },
            changed,
            matched,
        })
    }

    fn check_image(&self, image: &str) -> Result<()> {
        let tag = image
            .strip_prefix(self.repository.as_str())
            .and_then(|rest| rest.strip_prefix(':'));
        match tag {
            Some(tag)
                if !tag.is_empty()
                    && !tag.contains(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '#')) =>
            {
                Ok(())
            }
            _ => Err(Error::DescriptorMismatch(format!(
                "image '{}' is not a tag of '{}'",
                image, self.repository
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DEPLOYMENT: &str = "apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
        - name: web
          image: ghcr.io/org/repo:sha-000000 # pinned by ci
          ports:
            - containerPort: 8080
        - name: proxy
          image: docker.io/envoyproxy/envoy:v1.30
";

    fn updater() -> DeploymentUpdater {
        DeploymentUpdater::new("ghcr.io/org/repo").unwrap()
    }

    #[test]
    fn test_only_reference_changes() {
        let outcome = updater()
            .apply(DEPLOYMENT, "ghcr.io/org/repo:sha-abc123")
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.matched, 1);
        assert_eq!(
            outcome.descriptor,
            DEPLOYMENT.replace("sha-000000", "sha-abc123")
        );
    }

    #[test]
    fn test_apply_is_idempotent() {
        let first = updater()
            .apply(DEPLOYMENT, "ghcr.io/org/repo:sha-abc123")
            .unwrap();
        let second = updater()
            .apply(&first.descriptor, "ghcr.io/org/repo:sha-abc123")
            .unwrap();
        assert!(!second.changed);
        assert_eq!(second.descriptor, first.descriptor);
    }

    #[test]
    fn test_list_item_quotes_and_crlf_are_preserved() {
        let descriptor = "containers:\r\n  - image: \"ghcr.io/org/repo:v1\"\r\n    name: web\r\n";
        let outcome = updater().apply(descriptor, "ghcr.io/org/repo:v2").unwrap();
        assert_eq!(
            outcome.descriptor,
            "containers:\r\n  - image: \"ghcr.io/org/repo:v2\"\r\n    name: web\r\n"
        );
    }

    #[test]
    fn test_similar_repository_is_not_touched() {
        let descriptor = "image: ghcr.io/org/repo-worker:v1\nimage: ghcr.io/org/repo:v1\n";
        let outcome = updater().apply(descriptor, "ghcr.io/org/repo:v2").unwrap();
        assert_eq!(
            outcome.descriptor,
            "image: ghcr.io/org/repo-worker:v1\nimage: ghcr.io/org/repo:v2\n"
        );
    }

    #[test]
    fn test_missing_line_is_mismatch() {
        let err = updater()
            .apply("image: docker.io/library/nginx:1.27\n", "ghcr.io/org/repo:v2")
            .unwrap_err();
        assert!(matches!(err, Error::DescriptorMismatch(_)));
    }

    #[test]
    fn test_image_with_other_prefix_is_rejected() {
        let err = updater()
            .apply(DEPLOYMENT, "ghcr.io/evil/repo:latest")
            .unwrap_err();
        assert!(matches!(err, Error::DescriptorMismatch(_)));
        assert!(updater().apply(DEPLOYMENT, "ghcr.io/org/repo:").is_err());
    }
}
