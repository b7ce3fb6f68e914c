use std::fmt;

use crate::error::{Error, Result};

/// Scheme prefix accepted in front of artifact references.
pub const OCI_SCHEME: &str = "oci://";

/// Registry used when a reference names no host.
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

const DEFAULT_TAG: &str = "latest";

// ---------------------------------------------------------------------------
// ArtifactRef
// ---------------------------------------------------------------------------

/// A parsed OCI artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    /// Registry hostname, with optional port (e.g. "ghcr.io", "localhost:5000").
    pub registry: String,
    /// Repository path (e.g. "org/manifests").
    pub repository: String,
    /// Tag or digest reference (e.g. "v1" or "sha256:abc123").
    pub reference: String,
}

impl ArtifactRef {
    /// Parse a raw artifact reference, with or without the `oci://` scheme.
    ///
    /// Supported formats:
    /// - `ghcr.io/org/repo:v1`
    /// - `oci://localhost:5000/repo`
    /// - `my.registry.io/org/repo@sha256:<hex>`
    /// - `org/repo:tag` (Docker Hub)
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix(OCI_SCHEME).unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(Error::invalid_reference(raw, "empty reference"));
        }
        if trimmed.contains("://") {
            return Err(Error::invalid_reference(raw, "unsupported URL scheme"));
        }

        // Split off the reference (tag or digest).
        let (name_part, reference) = if let Some(at_pos) = trimmed.find('@') {
            let digest = &trimmed[at_pos + 1..];
            validate_digest(raw, digest)?;
            (&trimmed[..at_pos], digest.to_string())
        } else if let Some(colon_pos) = trimmed.rfind(':') {
            // A tag colon always comes after the last '/', otherwise it is a
            // registry port ("localhost:5000/repo").
            let after_last_slash = trimmed.rfind('/').map(|p| p + 1).unwrap_or(0);
            if colon_pos > after_last_slash {
                let tag = &trimmed[colon_pos + 1..];
                validate_tag(raw, tag)?;
                (&trimmed[..colon_pos], tag.to_string())
            } else {
                (trimmed, DEFAULT_TAG.to_string())
            }
        } else {
            (trimmed, DEFAULT_TAG.to_string())
        };

        // A first component containing a dot or a colon, or "localhost", is
        // a registry hostname.
        let (registry, repository) = match name_part.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name_part.to_string()),
        };
        validate_registry(raw, &registry)?;

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };
        validate_repository(raw, &repository)?;

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }

    /// `true` when the reference pins a digest rather than a tag.
    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }

    /// `registry/repository` without tag or digest.
    pub fn context(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Canonical `registry/repository@digest` form for a resolved digest.
    pub fn with_digest(&self, digest: &str) -> String {
        format!("{}@{}", self.context(), digest)
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.is_digest() { '@' } else { ':' };
        write!(f, "{}{}{}", self.context(), sep, self.reference)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// `host[:port]` where host is a dot-separated list of alphanumeric labels
/// (inner hyphens allowed) and port is decimal.
fn validate_registry(raw: &str, registry: &str) -> Result<()> {
    let (host, port) = match registry.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    let host_ok = !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        });
    let port_ok = port.map_or(true, |p| p.parse::<u16>().is_ok_and(|n| n > 0));
    if host_ok && port_ok {
        Ok(())
    } else {
        Err(Error::invalid_reference(
            raw,
            format!("invalid registry {:?}", registry),
        ))
    }
}

fn validate_repository(raw: &str, repository: &str) -> Result<()> {
    if repository.is_empty() {
        return Err(Error::invalid_reference(raw, "missing repository"));
    }
    for component in repository.split('/') {
        let valid = !component.is_empty()
            && component
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
            && component.starts_with(|c: char| c.is_ascii_alphanumeric())
            && component.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !valid {
            return Err(Error::invalid_reference(
                raw,
                format!("invalid repository component {:?}", component),
            ));
        }
    }
    Ok(())
}

fn validate_tag(raw: &str, tag: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && tag.starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c));
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_reference(raw, format!("invalid tag {:?}", tag)))
    }
}

fn validate_digest(raw: &str, digest: &str) -> Result<()> {
    let Some((algorithm, hex)) = digest.split_once(':') else {
        return Err(Error::invalid_reference(raw, "digest must be <algorithm>:<hex>"));
    };
    let hex_ok = match algorithm {
        "sha256" => hex.len() == 64,
        "sha512" => hex.len() == 128,
        _ => false,
    } && hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
    if hex_ok {
        Ok(())
    } else {
        Err(Error::invalid_reference(
            raw,
            format!("invalid digest {:?}", digest),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
