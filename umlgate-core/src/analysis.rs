//! Analysis requests, results, and their validation.
//!
//! Results come back from the analysis service as loosely typed JSON. They
//! are checked structurally here before anything caches or returns them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::archive::ArchiveUpload;
use crate::cache::{derive_key, CacheKey};
use crate::error::ValidationError;

/// Collections under `schema` that must be arrays when present.
pub const SCHEMA_COLLECTIONS: &[&str] = &["relations", "endpoints", "patterns", "layers"];

/// Language buckets under `schema` that hold class arrays.
pub const LANGUAGE_KEYS: &[&str] = &[
    "python",
    "java",
    "csharp",
    "javascript",
    "typescript",
    "cpp",
    "c",
];

/// Counters under `meta` that must be non-negative integers when present.
pub const META_COUNTERS: &[&str] = &["files_scanned", "classes_found"];

static SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("static segment pattern is valid")
});

const GITHUB_PREFIX: &str = "https://github.com/";

// ============================================================================
// REPOSITORY REFERENCE
// ============================================================================

/// A validated GitHub repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    owner: String,
    repo: String,
}

impl RepositoryRef {
    /// Parse `owner/repo` or `https://github.com/owner/repo[.git][/]`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidValue {
            field: "repositoryReference".to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "repositoryReference".to_string(),
            });
        }

        let path = if let Some(rest) = trimmed.strip_prefix(GITHUB_PREFIX) {
            rest.strip_suffix('/').unwrap_or(rest)
        } else if trimmed.contains("://") || trimmed.starts_with("git@") {
            return Err(invalid(
                "only HTTPS GitHub URLs are allowed (https://github.com/owner/repository)",
            ));
        } else {
            trimmed
        };

        let mut parts = path.split('/');
        let (Some(owner), Some(repo), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("expected owner/repository"));
        };
        let repo = repo.strip_suffix(".git").unwrap_or(repo);

        for segment in [owner, repo] {
            if segment.is_empty() || !SEGMENT.is_match(segment) {
                return Err(invalid("owner and repository may only contain letters, digits, '_', '.', '-'"));
            }
            if segment.contains("..") {
                return Err(invalid("owner and repository may not contain '..'"));
            }
            if segment.starts_with('.') {
                return Err(invalid("owner and repository cannot start with '.'"));
            }
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Stable resource identifier: lowercase `owner/repo`.
    pub fn resource_id(&self) -> String {
        format!("{}/{}", self.owner, self.repo).to_lowercase()
    }

    /// URL handed to the analysis service.
    pub fn clone_url(&self) -> String {
        format!("{}{}/{}", GITHUB_PREFIX, self.owner, self.repo)
    }

    pub fn alias_key(&self) -> CacheKey {
        derive_key(&self.resource_id(), None)
    }

    pub fn snapshot_key(&self, commit: &str) -> CacheKey {
        derive_key(&self.resource_id(), Some(commit))
    }
}

// ============================================================================
// REQUEST
// ============================================================================

/// One analysis request: a repository reference or an uploaded archive.
#[derive(Debug, Clone)]
pub enum AnalysisRequest {
    Reference {
        reference: RepositoryRef,
        /// Skip cache reads and always ask the analysis service.
        refresh: bool,
    },
    Archive(ArchiveUpload),
}

impl AnalysisRequest {
    /// Build a request from optional parts, requiring exactly one source.
    pub fn from_parts(
        reference: Option<&str>,
        archive: Option<ArchiveUpload>,
        refresh: bool,
    ) -> Result<Self, ValidationError> {
        match (reference, archive) {
            (Some(_), Some(_)) => Err(ValidationError::AmbiguousRequest {
                reason: "provide either repositoryReference or an archive, not both".to_string(),
            }),
            (Some(reference), None) => Ok(AnalysisRequest::Reference {
                reference: RepositoryRef::parse(reference)?,
                refresh,
            }),
            (None, Some(archive)) => Ok(AnalysisRequest::Archive(archive)),
            (None, None) => Err(ValidationError::RequiredFieldMissing {
                field: "repositoryReference or repoZip".to_string(),
            }),
        }
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Metadata extracted from a validated analysis result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisMeta {
    pub commit: Option<String>,
    pub files_scanned: Option<u64>,
    pub classes_found: Option<u64>,
    pub languages: Vec<String>,
    pub system: Option<String>,
}

/// What the cache tiers store for one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    /// Status the analysis service answered with.
    pub status: u16,
    /// The `{schema, meta}` body, as received.
    pub body: Value,
    /// Commit the analysis was taken at, when reported.
    pub commit: Option<String>,
}

impl CachedAnalysis {
    pub fn new(status: u16, body: Value, meta: &AnalysisMeta) -> Self {
        Self {
            status,
            body,
            commit: meta.commit.clone(),
        }
    }
}

fn shape_error(path: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidShape {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn require_object<'a>(
    parent: &'a Map<String, Value>,
    field: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ValidationError> {
    match parent.get(field) {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(shape_error(path, "expected an object")),
        None => Err(shape_error(path, "required field is missing")),
    }
}

/// Check the structure of an analysis body and extract its metadata.
pub fn validate_analysis_payload(body: &Value) -> Result<AnalysisMeta, ValidationError> {
    let root = body
        .as_object()
        .ok_or_else(|| shape_error("$", "expected an object"))?;

    let schema = require_object(root, "schema", "schema")?;
    let meta = require_object(root, "meta", "meta")?;

    for field in SCHEMA_COLLECTIONS.iter().chain(LANGUAGE_KEYS) {
        if let Some(value) = schema.get(*field) {
            if !value.is_array() {
                return Err(shape_error(&format!("schema.{}", field), "expected an array"));
            }
        }
    }

    let mut counters = [None, None];
    for (slot, field) in counters.iter_mut().zip(META_COUNTERS) {
        match meta.get(*field) {
            None | Some(Value::Null) => {}
            Some(value) => {
                let count = value.as_u64().ok_or_else(|| {
                    shape_error(&format!("meta.{}", field), "expected a non-negative integer")
                })?;
                *slot = Some(count);
            }
        }
    }

    let languages = match meta.get("languages") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| shape_error("meta.languages", "expected an array of strings"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(shape_error("meta.languages", "expected an array")),
    };

    let commit = match meta.get("commit") {
        None | Some(Value::Null) => None,
        Some(Value::String(commit)) if commit.trim().is_empty() => None,
        Some(Value::String(commit)) => Some(commit.trim().to_string()),
        Some(_) => return Err(shape_error("meta.commit", "expected a string")),
    };

    let system = meta
        .get("system")
        .and_then(Value::as_str)
        .map(str::to_string);

    let [files_scanned, classes_found] = counters;
    Ok(AnalysisMeta {
        commit,
        files_scanned,
        classes_found,
        languages,
        system,
    })
}
