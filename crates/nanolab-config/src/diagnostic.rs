// SPDX-FileCopyrightText: 2026 Nanolab Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment extraction failures into miette diagnostics.
//!
//! Unknown keys get a "did you mean" hint (Jaro-Winkler over the keys the
//! section accepts) and, when the key came from a file we can read, a
//! labelled source span.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Jaro-Winkler score a candidate must beat to be offered as a correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// A configuration problem, ready for graphical rendering.
///
/// Variants carry what miette needs to point at the offending key and say
/// how to fix it.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key no section accepts.
    #[error("unknown configuration key `{key}`")]
    #[diagnostic(
        code(nanolab::config::unknown_key),
        help("{}", unknown_key_help(suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        /// The unrecognized key.
        key: String,
        /// Closest accepted key, when one is similar enough.
        suggestion: Option<String>,
        /// Comma-separated keys the section accepts.
        valid_keys: String,
        /// Location of the key in its file, when it came from one.
        #[label("not a recognized key")]
        span: Option<SourceSpan>,
        /// The file the key came from.
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value of the wrong type.
    #[error("invalid type for `{key}`: {detail}")]
    #[diagnostic(code(nanolab::config::invalid_type), help("expected {expected}"))]
    InvalidType {
        /// Dotted path of the key.
        key: String,
        /// What was found and what was expected.
        detail: String,
        /// The expected type alone, for the help line.
        expected: String,
    },

    /// A key without a default was not set anywhere.
    #[error("missing required key `{key}`")]
    #[diagnostic(
        code(nanolab::config::missing_key),
        help("set `{key}` in nanolab.toml or through the environment")
    )]
    MissingKey {
        /// Dotted path of the key.
        key: String,
    },

    /// A value parsed fine but breaks a semantic rule.
    #[error("validation error: {message}")]
    #[diagnostic(code(nanolab::config::validation))]
    Validation {
        /// Which rule was broken, naming the key.
        message: String,
    },

    /// Any other extraction failure, rendered as figment reports it.
    #[error("configuration error: {0}")]
    #[diagnostic(code(nanolab::config::other))]
    Other(String),
}

impl ConfigError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

fn unknown_key_help(suggestion: Option<&str>, valid_keys: &str) -> String {
    if let Some(s) = suggestion {
        format!("did you mean `{s}`? Valid keys: {valid_keys}")
    } else {
        format!("valid keys: {valid_keys}")
    }
}

/// Convert every error carried by a `figment::Error` into a `ConfigError`.
///
/// `sources` pairs file paths with their contents and is only used to
/// attach spans to unknown-key errors.
pub fn figment_to_config_errors(
    err: figment::Error,
    sources: &[(String, String)],
) -> Vec<ConfigError> {
    use figment::error::Kind;

    err.into_iter()
        .map(|error| match &error.kind {
            Kind::UnknownField(field, expected) => {
                let (span, src) = locate(&error, field, sources);
                ConfigError::UnknownKey {
                    key: field.clone(),
                    suggestion: suggest_key(field, expected),
                    valid_keys: expected.join(", "),
                    span,
                    src,
                }
            }
            Kind::MissingField(field) => ConfigError::MissingKey {
                key: dotted(&error.path, field),
            },
            Kind::InvalidType(actual, expected) => ConfigError::InvalidType {
                key: error.path.join("."),
                detail: format!("found {actual}, expected {expected}"),
                expected: expected.clone(),
            },
            _ => ConfigError::Other(error.to_string()),
        })
        .collect()
}

fn dotted(path: &[String], field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{field}", path.join("."))
    }
}

fn locate(
    error: &figment::error::Error,
    field: &str,
    sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let Some(figment::Source::File(file)) = error.metadata.as_ref().and_then(|m| m.source.as_ref())
    else {
        return (None, None);
    };
    let file = file.display().to_string();

    let Some((name, content)) = sources.iter().find(|(p, _)| *p == file) else {
        return (None, None);
    };

    match find_key_offset(content, &error.path, field) {
        Some(offset) => (
            Some(SourceSpan::new(offset.into(), field.len())),
            Some(NamedSource::new(name, content.clone())),
        ),
        None => (None, None),
    }
}

/// Byte offset of `field` as a key inside the TOML table named by `path`.
///
/// `path = ["quota", "modes", "chat"]` looks for `[quota.modes.chat]` first;
/// an empty path searches from the top of the document.
pub fn find_key_offset(content: &str, path: &[String], field: &str) -> Option<usize> {
    let start = if path.is_empty() {
        0
    } else {
        let header = format!("[{}]", path.join("."));
        content.find(&header)? + header.len()
    };

    let mut offset = start;
    for line in content[start..].split_inclusive('\n') {
        let body = line.trim_start();
        // Stop at the next table header.
        if !path.is_empty() && body.starts_with('[') {
            return None;
        }
        if let Some(after) = body.strip_prefix(field) {
            if after.trim_start().starts_with('=') {
                return Some(offset + (line.len() - body.len()));
            }
        }
        offset += line.len();
    }
    None
}

/// Closest valid key by Jaro-Winkler similarity, if close enough.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|k| (strsim::jaro_winkler(unknown, k), *k))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, k)| k.to_string())
}

/// Print each error to stderr through miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    let handler = miette::GraphicalReportHandler::new();
    for error in errors {
        let mut out = String::new();
        match handler.render_report(&mut out, error as &dyn Diagnostic) {
            Ok(()) => eprint!("{out}"),
            Err(_) => eprintln!("Error: {error}"),
        }
    }
}
