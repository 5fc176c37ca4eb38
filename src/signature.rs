use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SignatureError;
use crate::region::RegionMap;
use crate::types::{Map, Str};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignatureArg {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Calling convention and prototype of a known function.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Signature {
    #[serde(skip_deserializing)]
    pub name: String,
    #[serde(rename = "cc")]
    pub calling_convention: String,
    pub ret: String,
    pub args: Vec<SignatureArg>,
}

/// Signatures by name plus the address ranges they were applied to.
#[derive(Clone, Debug, Default)]
pub struct SignatureRegistry {
    signatures: Map<Str, Signature>,
    bindings: RegionMap<(), Str>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every signature of a JSON document shaped as
    /// `{"name": {"cc": .., "ret": .., "args": [{"name": .., "type": ..}]}}`.
    pub fn load_str(&mut self, json: &str) -> Result<usize, SignatureError> {
        let parsed: BTreeMap<String, Signature> = serde_json::from_str(json)?;
        if let Some(name) =
            parsed.keys().find(|name| self.contains(name.as_str()))
        {
            return Err(SignatureError::Duplicated(name.clone()));
        }
        let count = parsed.len();
        for (name, mut signature) in parsed {
            debug!(
                name = name.as_str(),
                cc = signature.calling_convention.as_str(),
                "signature added"
            );
            signature.name = name.clone();
            self.signatures.insert(Str::from(name), signature);
        }
        Ok(count)
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).with_context(|| {
            format!("unable to read signature file {}", path.display())
        })?;
        let count = self.load_str(&json).with_context(|| {
            format!("invalid signature file {}", path.display())
        })?;
        info!(path = %path.display(), count, "signatures loaded");
        Ok(count)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.signatures.contains_key(name.as_bytes())
    }

    pub fn find(&self, name: &str) -> Option<&Signature> {
        self.signatures.get(name.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Signature> {
        self.signatures.values()
    }

    /// Apply the signature `name` to `[start, end)`.
    pub fn bind(
        &mut self,
        start: u64,
        end: u64,
        name: &str,
    ) -> Result<(), SignatureError> {
        if !self.contains(name) {
            return Err(SignatureError::Unknown(name.to_owned()));
        }
        self.bindings.insert((), start, end, Str::create(name))?;
        Ok(())
    }

    pub fn signature_at(&self, address: u64) -> Option<&Signature> {
        let binding = self.bindings.find(&(), address)?;
        self.signatures.get(&binding.value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const LIBC: &str = r#"{
        "strlen": {
            "cc": "cdecl",
            "ret": "size_t",
            "args": [{"name": "s", "type": "const char*"}]
        },
        "exit": {"cc": "cdecl", "ret": "void", "args": [{"name": "status", "type": "int"}]}
    }"#;

    #[test]
    fn load_and_find() {
        let mut registry = SignatureRegistry::new();
        assert_eq!(registry.load_str(LIBC).unwrap(), 2);
        let strlen = registry.find("strlen").unwrap();
        assert_eq!(strlen.name, "strlen");
        assert_eq!(strlen.calling_convention, "cdecl");
        assert_eq!(
            strlen.args,
            [SignatureArg {
                name: "s".into(),
                ty: "const char*".into()
            }]
        );
        assert!(registry.find("printf").is_none());
    }

    #[test]
    fn duplicated_and_malformed() {
        let mut registry = SignatureRegistry::new();
        registry.load_str(LIBC).unwrap();
        assert!(matches!(
            registry.load_str(LIBC),
            Err(SignatureError::Duplicated(name)) if name == "exit"
        ));
        assert!(matches!(
            registry.load_str(r#"{"f": {"cc": "cdecl"}}"#),
            Err(SignatureError::Parse(_))
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn bindings() {
        let mut registry = SignatureRegistry::new();
        registry.load_str(LIBC).unwrap();
        registry.bind(0x401000, 0x401020, "strlen").unwrap();
        assert!(matches!(
            registry.bind(0x402000, 0x402010, "printf"),
            Err(SignatureError::Unknown(_))
        ));
        assert_eq!(
            registry.signature_at(0x401010).map(|s| s.name.as_str()),
            Some("strlen")
        );
        assert!(registry.signature_at(0x401020).is_none());
    }
}
