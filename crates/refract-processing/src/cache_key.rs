use crate::format::ImageFormat;
use crate::options::OptionSet;
use sha2::{Digest, Sha256};

/// Options that never change the produced bytes.
const KEY_EXCLUDED: &[&str] = &["refresh"];

/// Derive the artifact key for a source and its full option set.
///
/// Entries are hashed sorted by name so the key does not depend on the
/// order options were written in the URL. The key is
/// `<sha256 hex>.<output extension>`.
pub fn derive_cache_key(source: &str, options: &OptionSet, output: ImageFormat) -> String {
    let mut entries: Vec<(&str, &str)> = options
        .entries()
        .filter(|(name, _)| !KEY_EXCLUDED.contains(name))
        .collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    hasher.update(b"source\0");
    hasher.update(source.trim().as_bytes());
    for (name, value) in entries {
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }

    format!("{}.{}", hex::encode(hasher.finalize()), output.extension())
}
