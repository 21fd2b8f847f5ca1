//! Transformation options
//!
//! Options arrive in the URL as `key_value` tokens separated by commas, for
//! example `w_200,h_100,c_1,o_webp`. Parsing resolves short keys to long
//! names and merges the request values over the catalog defaults.
//!
//! `OptionSet` is immutable once parsed. Pipeline stages that consume an
//! option do so through an `OptionClaims` borrowed from the set; whatever
//! is left unclaimed is emitted verbatim as ImageMagick flags.

use crate::error::TransformError;
use std::collections::HashSet;

/// A recognized option: long name, URL key and default value
#[derive(Debug, Clone, Copy)]
pub struct OptionDef {
    pub name: &'static str,
    pub short: &'static str,
    pub default: &'static str,
}

const fn def(name: &'static str, short: &'static str, default: &'static str) -> OptionDef {
    OptionDef {
        name,
        short,
        default,
    }
}

/// Every option the service understands, in emission order.
pub const CATALOG: &[OptionDef] = &[
    def("mozjpeg", "mozjpeg", "1"),
    def("quality", "q", "90"),
    def("output", "o", "auto"),
    def("unsharp", "unsh", ""),
    def("sharpen", "sh", ""),
    def("blur", "blr", ""),
    def("face-crop", "fc", "0"),
    def("face-crop-position", "fcp", "0"),
    def("face-blur", "fb", "0"),
    def("width", "w", ""),
    def("height", "h", ""),
    def("crop", "c", ""),
    def("background", "bg", ""),
    def("strip", "st", "1"),
    def("resize", "rz", ""),
    def("gravity", "g", "Center"),
    def("filter", "f", "Lanczos"),
    def("rotate", "r", ""),
    def("scale", "sc", ""),
    def("sampling-factor", "sf", "1x1"),
    def("refresh", "rf", ""),
    def("preserve-aspect-ratio", "par", "1"),
    def("preserve-natural-size", "pns", "1"),
    def("webp-lossless", "webpl", "0"),
    def("gif-frame", "gf", "0"),
    def("thread", "t", "1"),
];

/// Options that must parse as unsigned integers when non-empty.
const NUMERIC: &[&str] = &[
    "width",
    "height",
    "quality",
    "face-crop-position",
    "gif-frame",
    "thread",
];

/// Accepted values of the `output` option.
pub const OUTPUT_VALUES: &[&str] = &["auto", "input", "jpg", "jpeg", "png", "webp", "gif", "avif"];

fn lookup_def(key: &str) -> Option<&'static OptionDef> {
    CATALOG.iter().find(|s| s.short == key || s.name == key)
}

/// A flag is truthy when non-empty and neither `0` nor `false`.
pub fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Ordered mapping from option name to value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSet {
    entries: Vec<(&'static str, String)>,
}

impl Default for OptionSet {
    fn default() -> Self {
        Self {
            entries: CATALOG
                .iter()
                .map(|s| (s.name, s.default.to_string()))
                .collect(),
        }
    }
}

impl OptionSet {
    /// Parse the compact URL form. `-` and the empty string mean defaults only.
    pub fn parse(input: &str) -> Result<Self, TransformError> {
        let mut set = Self::default();
        let input = input.trim();
        if input.is_empty() || input == "-" {
            return Ok(set);
        }

        for token in input.split(',').filter(|t| !t.is_empty()) {
            let (key, value) = token.split_once('_').ok_or_else(|| {
                TransformError::InvalidOptions(format!("option '{}' has no value", token))
            })?;
            let def = lookup_def(key).ok_or_else(|| {
                TransformError::InvalidOptions(format!("unknown option '{}'", key))
            })?;
            set.set(def.name, value.to_string());
        }

        set.validate()?;
        Ok(set)
    }

    fn set(&mut self, name: &'static str, value: String) {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        }
    }

    fn validate(&self) -> Result<(), TransformError> {
        for name in NUMERIC {
            let value = self.get(name);
            if value.is_empty() {
                continue;
            }
            let parsed: u32 = value.parse().map_err(|_| {
                TransformError::InvalidOptions(format!(
                    "option '{}' must be a non-negative integer, got '{}'",
                    name, value
                ))
            })?;
            match *name {
                "width" | "height" if parsed == 0 => {
                    return Err(TransformError::InvalidOptions(format!(
                        "option '{}' must be greater than zero",
                        name
                    )));
                }
                "quality" if !(1..=100).contains(&parsed) => {
                    return Err(TransformError::InvalidOptions(format!(
                        "quality must be between 1 and 100, got {}",
                        parsed
                    )));
                }
                _ => {}
            }
        }

        let output = self.get("output").to_lowercase();
        if !OUTPUT_VALUES.contains(&output.as_str()) {
            return Err(TransformError::InvalidOptions(format!(
                "unsupported output format '{}'",
                self.get("output")
            )));
        }

        Ok(())
    }

    /// Value of an option, empty when unknown or unset.
    pub fn get(&self, name: &str) -> &str {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    pub fn is_truthy(&self, name: &str) -> bool {
        is_truthy(self.get(name))
    }

    /// All entries in catalog order, including empty ones.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (*n, v.as_str()))
    }

    /// Start tracking claims against this set.
    pub fn claims(&self) -> OptionClaims<'_> {
        OptionClaims {
            options: self,
            claimed: HashSet::new(),
        }
    }
}

/// Claim tracker over an `OptionSet`
///
/// Each option is handed out at most once; a second claim yields the empty
/// string. `remaining` lists what nobody claimed.
#[derive(Debug)]
pub struct OptionClaims<'a> {
    options: &'a OptionSet,
    claimed: HashSet<&'a str>,
}

impl<'a> OptionClaims<'a> {
    pub fn claim(&mut self, name: &str) -> &'a str {
        let options: &'a OptionSet = self.options;
        match options.entries.iter().find(|(n, _)| *n == name) {
            Some((n, value)) if self.claimed.insert(*n) => value.as_str(),
            _ => "",
        }
    }

    pub fn claim_truthy(&mut self, name: &str) -> bool {
        is_truthy(self.claim(name))
    }

    /// Unclaimed, non-empty entries in insertion order.
    pub fn remaining(&self) -> Vec<(&'a str, &'a str)> {
        let options: &'a OptionSet = self.options;
        options
            .entries
            .iter()
            .filter(|(n, v)| !v.is_empty() && !self.claimed.contains(*n))
            .map(|(n, v)| (*n, v.as_str()))
            .collect()
    }
}
