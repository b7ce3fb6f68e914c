use std::fmt;
use std::str::FromStr;

use crate::error::TarError;

/// How a layer blob is materialized on pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    /// A gzip-compressed tar of a directory tree, extracted into a directory.
    Tarball,
    /// A single opaque file, copied verbatim.
    Static,
}

impl LayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Tarball => "tarball",
            LayerType::Static => "static",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = TarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tarball" => Ok(LayerType::Tarball),
            "static" => Ok(LayerType::Static),
            other => Err(TarError::UnsupportedLayerType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_types() {
        assert_eq!("tarball".parse::<LayerType>().unwrap(), LayerType::Tarball);
        assert_eq!("static".parse::<LayerType>().unwrap(), LayerType::Static);
        assert_eq!(LayerType::Static.to_string(), "static");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = "zip".parse::<LayerType>().unwrap_err();
        assert!(matches!(err, TarError::UnsupportedLayerType(ref t) if t == "zip"));
    }
}
