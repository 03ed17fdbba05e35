//! Entity registry.
//!
//! Every kind of record that can travel in an archive is declared here with
//! its natural key, its allowed top-level fields, the subset of fields
//! withheld from redacted exports, and the export scope it falls under. The registry is closed: an archive naming
//! anything else is rejected as a whole.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::exchange::types::{ExchangeError, ExchangeResult, Record};

/// Kinds of records carried by an exchange bundle.
///
/// Declaration order is the registry order: bundles are traversed, encoded,
/// and exported in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A tag, keyed by name.
    Tag,
    /// A saved link, keyed by URL.
    Link,
    /// A curation session, keyed by its ISO date.
    CurationSession,
    /// An AI provider credential, keyed by `provider:name`.
    ProviderCredential,
    /// A model configuration, keyed by name.
    ModelConfig,
    /// An instruction template, keyed by its fixed type.
    InstructionTemplate,
}

/// Which part of the data an export covers.
///
/// Every kind is either technical (credentials, model setup, prompts) or
/// functional (the curated content itself).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportScope {
    /// Every kind.
    #[default]
    All,
    /// Provider credentials, model configurations, instruction templates.
    Technical,
    /// Tags, links, curation sessions.
    Functional,
}

impl ExportScope {
    /// Whether records of `kind` belong in an export of this scope.
    #[must_use]
    pub fn includes(self, kind: EntityKind) -> bool {
        self == Self::All || kind.scope() == self
    }
}

impl std::fmt::Display for ExportScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Technical => write!(f, "technical"),
            Self::Functional => write!(f, "functional"),
        }
    }
}

impl std::str::FromStr for ExportScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "technical" => Ok(Self::Technical),
            "functional" => Ok(Self::Functional),
            _ => Err(format!(
                "Unknown scope: {s} (expected all, technical, or functional)"
            )),
        }
    }
}

impl EntityKind {
    /// All registered kinds in registry order.
    pub const ALL: [Self; 6] = [
        Self::Tag,
        Self::Link,
        Self::CurationSession,
        Self::ProviderCredential,
        Self::ModelConfig,
        Self::InstructionTemplate,
    ];

    /// Wire name used in requests and audit rows.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Link => "link",
            Self::CurationSession => "curation_session",
            Self::ProviderCredential => "provider_credential",
            Self::ModelConfig => "model_config",
            Self::InstructionTemplate => "instruction_template",
        }
    }

    /// Name of this kind's collection entry inside an archive.
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Tag => "tags.json",
            Self::Link => "links.json",
            Self::CurationSession => "techwatches.json",
            Self::ProviderCredential => "api-keys.json",
            Self::ModelConfig => "llm-configs.json",
            Self::InstructionTemplate => "prompts.json",
        }
    }

    /// Fields that make up the natural key, in key order.
    #[must_use]
    pub const fn key_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Tag | Self::ModelConfig => &["name"],
            Self::Link => &["url"],
            Self::CurationSession => &["date"],
            Self::ProviderCredential => &["provider", "name"],
            Self::InstructionTemplate => &["type"],
        }
    }

    /// Allowed top-level fields.
    #[must_use]
    pub const fn fields(&self) -> &'static [&'static str] {
        match self {
            Self::Tag => &["name"],
            Self::Link => &["url", "title", "description", "summary", "tags"],
            Self::CurationSession => &["date", "status", "maxArticles", "linkUrls"],
            Self::ProviderCredential => &[
                "provider",
                "name",
                "baseUrl",
                "apiKey",
                "organizationId",
                "projectId",
            ],
            Self::ModelConfig => &["name", "provider", "apiKeyName", "model", "isDefault"],
            Self::InstructionTemplate => &["type", "content"],
        }
    }

    /// The export scope this kind belongs to.
    #[must_use]
    pub const fn scope(&self) -> ExportScope {
        match self {
            Self::Tag | Self::Link | Self::CurationSession => ExportScope::Functional,
            Self::ProviderCredential | Self::ModelConfig | Self::InstructionTemplate => {
                ExportScope::Technical
            }
        }
    }

    /// Fields stripped from redacted exports.
    #[must_use]
    pub const fn sensitive_fields(&self) -> &'static [&'static str] {
        match self {
            Self::ProviderCredential => &["apiKey"],
            _ => &[],
        }
    }

    /// Resolve an archive entry name to its kind.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.file_name() == name)
    }

    /// Extract the natural key of a record.
    ///
    /// Tuple keys are joined with `:`, so every component but the last must
    /// be free of `:`. Curation-session dates must be valid calendar dates.
    ///
    /// # Errors
    ///
    /// Returns the reason when a key field is missing, not a string, or blank,
    /// or when a leading tuple component contains `:`.
    pub fn key_of(&self, record: &Record) -> Result<String, String> {
        let fields = self.key_fields();
        let mut parts = Vec::with_capacity(fields.len());

        for (i, field) in fields.iter().enumerate() {
            let part = match record.get(*field) {
                None | Some(Value::Null) => return Err(format!("missing key field '{field}'")),
                Some(Value::String(s)) => s.trim(),
                Some(other) => {
                    return Err(format!("key field '{field}' must be a string, got {other}"));
                }
            };
            if part.is_empty() {
                return Err(format!("key field '{field}' is empty"));
            }
            if i + 1 < fields.len() && part.contains(':') {
                return Err(format!("key field '{field}' must not contain ':'"));
            }
            parts.push(part);
        }

        if *self == Self::CurationSession {
            NaiveDate::parse_from_str(parts[0], "%Y-%m-%d")
                .map_err(|e| format!("'{}' is not a valid date: {e}", parts[0]))?;
        }

        Ok(parts.join(":"))
    }

    /// Check that a record only carries registered fields.
    ///
    /// # Errors
    ///
    /// Returns the reason naming every unknown field.
    pub fn validate_fields(&self, record: &Record) -> Result<(), String> {
        let allowed = self.fields();
        let unknown: Vec<&str> = record
            .keys()
            .map(String::as_str)
            .filter(|field| !allowed.contains(field))
            .collect();

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "unknown field(s) for {self}: {} (allowed: {})",
                unknown.join(", "),
                allowed.join(", ")
            ))
        }
    }

    /// Copy of a record without this kind's sensitive fields.
    #[must_use]
    pub fn redact(&self, record: &Record) -> Record {
        let mut redacted = record.clone();
        for field in self.sensitive_fields() {
            redacted.remove(*field);
        }
        redacted
    }

    /// Fill key fields a record omits from a natural key string.
    ///
    /// Fields already present are left alone.
    pub fn fill_key_fields(&self, key: &str, record: &mut Record) {
        let fields = self.key_fields();
        let parts: Vec<&str> = if fields.len() == 1 {
            vec![key]
        } else {
            key.splitn(fields.len(), ':').collect()
        };

        for (field, part) in fields.iter().zip(parts) {
            record
                .entry((*field).to_string())
                .or_insert_with(|| Value::String(part.to_string()));
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tag" | "Tag" => Ok(Self::Tag),
            "link" | "Link" => Ok(Self::Link),
            "curation_session" | "TechWatch" => Ok(Self::CurationSession),
            "provider_credential" | "AiApiKey" => Ok(Self::ProviderCredential),
            "model_config" | "LlmConfig" => Ok(Self::ModelConfig),
            "instruction_template" | "PromptInstruction" => Ok(Self::InstructionTemplate),
            _ => Err(format!("Unknown entity kind: {s}")),
        }
    }
}

/// Look up a kind by wire name.
///
/// # Errors
///
/// Returns `UnknownEntityKind` for anything outside the registry.
pub fn lookup(name: &str) -> ExchangeResult<EntityKind> {
    name.parse()
        .map_err(|_| ExchangeError::UnknownEntityKind { name: name.to_string() })
}
