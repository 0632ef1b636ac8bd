//! Declarative per-provider parameter schemas.
//!
//! Each provider declares the parameter names it understands along with a
//! type and, for enumerated fields, the allowed values. Raw string maps from
//! configuration are checked against the schema before any request leaves
//! the process:
//!
//! - unknown names are ignored
//! - a missing required name is a validation failure
//! - a value that does not parse as its declared type is a validation failure
//! - `from_date` after `to_date` is a validation failure

use crate::error::FetchError;
use crate::models::{ParamValue, ProviderRequest};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// The value type a parameter must parse as.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Integer { min: i64, max: i64 },
    /// `YYYY-MM-DD`.
    Date,
    /// One of a closed, lowercase set. Aliases map common synonyms first.
    OneOf {
        allowed: &'static [&'static str],
        aliases: &'static [(&'static str, &'static str)],
    },
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Text => f.write_str("text"),
            FieldKind::Integer { min, max } => write!(f, "integer {min}..={max}"),
            FieldKind::Date => f.write_str("date (YYYY-MM-DD)"),
            FieldKind::OneOf { allowed, .. } => write!(f, "one of [{}]", allowed.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn text(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            kind: FieldKind::Text,
        }
    }

    pub fn integer(name: &'static str, min: i64, max: i64) -> Self {
        Self {
            name,
            required: false,
            kind: FieldKind::Integer { min, max },
        }
    }

    pub fn date(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            kind: FieldKind::Date,
        }
    }

    pub fn one_of(
        name: &'static str,
        allowed: &'static [&'static str],
        aliases: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            name,
            required: false,
            kind: FieldKind::OneOf { allowed, aliases },
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn parse(&self, provider: &str, raw: &str) -> Result<ParamValue, FetchError> {
        match &self.kind {
            FieldKind::Text => Ok(ParamValue::Text(raw.to_string())),
            FieldKind::Integer { min, max } => {
                let n: i64 = raw.parse().map_err(|_| {
                    FetchError::validation(
                        provider,
                        format!("parameter `{}` must be an integer, got `{raw}`", self.name),
                    )
                })?;
                if n < *min || n > *max {
                    return Err(FetchError::validation(
                        provider,
                        format!("parameter `{}` must be within {min}..={max}, got {n}", self.name),
                    ));
                }
                Ok(ParamValue::Integer(n))
            }
            FieldKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(ParamValue::Date)
                .map_err(|_| {
                    FetchError::validation(
                        provider,
                        format!("parameter `{}` must be a YYYY-MM-DD date, got `{raw}`", self.name),
                    )
                }),
            FieldKind::OneOf { allowed, aliases } => {
                let lowered = raw.to_lowercase();
                let value = aliases
                    .iter()
                    .find(|(alias, _)| *alias == lowered)
                    .map(|(_, canonical)| canonical.to_string())
                    .unwrap_or(lowered);
                if allowed.contains(&value.as_str()) {
                    Ok(ParamValue::Text(value))
                } else {
                    Err(FetchError::validation(
                        provider,
                        format!(
                            "parameter `{}` must be one of [{}], got `{raw}`",
                            self.name,
                            allowed.join(", ")
                        ),
                    ))
                }
            }
        }
    }
}

/// The set of parameters one provider accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSchema {
    provider: &'static str,
    fields: Vec<FieldSpec>,
}

impl ParamSchema {
    pub fn new(provider: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self { provider, fields }
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a raw parameter map and build the typed request.
    ///
    /// Blank values count as absent. The error is always
    /// [`crate::error::ErrorKind::Validation`].
    pub fn validate(&self, raw: &BTreeMap<String, String>) -> Result<ProviderRequest, FetchError> {
        let mut params = BTreeMap::new();

        for (name, value) in raw {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match self.field(name) {
                Some(spec) => {
                    params.insert(spec.name.to_string(), spec.parse(self.provider, value)?);
                }
                None => debug!(provider = self.provider, param = %name, "Ignoring unknown parameter"),
            }
        }

        if let Some(missing) = self
            .fields
            .iter()
            .find(|f| f.required && !params.contains_key(f.name))
        {
            return Err(FetchError::validation(
                self.provider,
                format!("missing required parameter `{}`", missing.name),
            ));
        }

        if let (Some(ParamValue::Date(from)), Some(ParamValue::Date(to))) =
            (params.get("from_date"), params.get("to_date"))
        {
            if from > to {
                return Err(FetchError::validation(
                    self.provider,
                    format!("from_date {from} is after to_date {to}"),
                ));
            }
        }

        Ok(ProviderRequest::new(self.provider, params))
    }
}

impl fmt::Display for ParamSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.provider)?;
        for field in &self.fields {
            let req = if field.required { " (required)" } else { "" };
            writeln!(f, "  {:<12} {}{}", field.name, field.kind, req)?;
        }
        Ok(())
    }
}

/// Category synonyms accepted by every provider that takes a category.
pub const CATEGORY_ALIASES: &[(&str, &str)] = &[
    ("tech", "technology"),
    ("sport", "sports"),
    ("finance", "business"),
    ("economy", "business"),
    ("medical", "health"),
    ("healthcare", "health"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn schema() -> ParamSchema {
        ParamSchema::new(
            "test",
            vec![
                FieldSpec::text("query").required(),
                FieldSpec::integer("limit", 1, 100),
                FieldSpec::date("from_date"),
                FieldSpec::date("to_date"),
                FieldSpec::one_of("category", &["business", "technology"], CATEGORY_ALIASES),
            ],
        )
    }

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_validate_typed_values() {
        let req = schema()
            .validate(&raw(&[
                ("query", "ai"),
                ("limit", "25"),
                ("from_date", "2025-05-01"),
                ("category", "Tech"),
            ]))
            .unwrap();
        assert_eq!(req.provider(), "test");
        assert_eq!(req.query(), Some("ai"));
        assert_eq!(req.limit(), Some(25));
        assert_eq!(req.text("category"), Some("technology"));
        assert_eq!(
            req.date("from_date"),
            NaiveDate::from_ymd_opt(2025, 5, 1)
        );
    }

    #[test]
    fn test_validate_ignores_unknown() {
        let req = schema()
            .validate(&raw(&[("query", "ai"), ("colour", "blue")]))
            .unwrap();
        assert!(req.get("colour").is_none());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = schema().validate(&raw(&[("limit", "5")])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("query"));
    }

    #[test]
    fn test_validate_blank_counts_as_missing() {
        let err = schema().validate(&raw(&[("query", "   ")])).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_validate_bad_values() {
        for pairs in [
            vec![("query", "ai"), ("limit", "ten")],
            vec![("query", "ai"), ("limit", "500")],
            vec![("query", "ai"), ("from_date", "05/01/2025")],
            vec![("query", "ai"), ("category", "gossip")],
            vec![("query", "ai"), ("from_date", "2025-05-02"), ("to_date", "2025-05-01")],
        ] {
            let err = schema().validate(&raw(&pairs)).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Validation, "{pairs:?}");
        }
    }

    #[test]
    fn test_schema_display_lists_fields() {
        let text = schema().to_string();
        assert!(text.starts_with("test\n"));
        assert!(text.contains("query"));
        assert!(text.contains("(required)"));
        assert!(text.contains("integer 1..=100"));
    }
}
