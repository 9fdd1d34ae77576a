//! Resource Pattern Templates
//!
//! Parses templated resource identifiers (`${Placeholder}` slots plus IAM
//! wildcards) and `Key=Value` parameter override lists.

use pest::Parser;
use pest_derive::Parser;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "grammar.pest"]
pub struct PatternParser;

/// Errors raised while parsing or rendering templates
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("malformed pattern '{input}': {message}")]
    Syntax { input: String, message: String },

    #[error("placeholder '${{{name}}}' in '{template}' has no binding")]
    Unbound { template: String, name: String },

    #[error("value '{value}' bound to '${{{name}}}' contains wildcard or template characters")]
    UnsafeSubstitution { name: String, value: String },

    #[error("malformed parameter override '{input}': {message}")]
    Override { input: String, message: String },
}

/// One piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
    /// `*`: any run of characters, including none
    AnyRun,
    /// `?`: exactly one character
    AnyChar,
}

/// A parsed resource pattern template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template such as `arn:${Partition}:logs:${Region}:${AccountId}:log-group:*`
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        let pairs = PatternParser::parse(Rule::template, input).map_err(|e| PatternError::Syntax {
            input: input.to_string(),
            message: e.variant.message().to_string(),
        })?;

        let mut segments = Vec::new();
        for pair in pairs.flat_map(|p| p.into_inner()) {
            match pair.as_rule() {
                Rule::literal => segments.push(Segment::Literal(pair.as_str().to_string())),
                Rule::wildcard => segments.push(match pair.as_str() {
                    "?" => Segment::AnyChar,
                    _ => Segment::AnyRun,
                }),
                Rule::placeholder => {
                    let name = pair
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::identifier)
                        .map(|p| p.as_str().to_string())
                        .ok_or_else(|| PatternError::Syntax {
                            input: input.to_string(),
                            message: "empty placeholder".to_string(),
                        })?;
                    segments.push(Segment::Placeholder(name));
                }
                _ => {}
            }
        }

        Ok(Self {
            source: input.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in order of appearance (duplicates included)
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// True if the template contains `*` or `?`
    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::AnyRun | Segment::AnyChar))
    }

    /// Substitute every placeholder. Wildcards are kept verbatim.
    ///
    /// A bound value may not itself contain `*`, `?` or `${`, otherwise a
    /// caller-supplied name could widen the scope of the rendered pattern.
    pub fn render(&self, bindings: &BTreeMap<String, String>) -> Result<String, PatternError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::AnyRun => out.push('*'),
                Segment::AnyChar => out.push('?'),
                Segment::Placeholder(name) => {
                    let value = bindings.get(name).ok_or_else(|| PatternError::Unbound {
                        template: self.source.clone(),
                        name: name.clone(),
                    })?;
                    if value.contains(['*', '?']) || value.contains("${") {
                        return Err(PatternError::UnsafeSubstitution {
                            name: name.clone(),
                            value: value.clone(),
                        });
                    }
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// IAM-style wildcard match: `*` matches any run, `?` matches one character.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let (mut pi, mut vi) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while vi < v.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = vi;
            pi += 1;
        } else if let Some(star_at) = star {
            pi = star_at + 1;
            resume += 1;
            vi = resume;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Parse `Key=Value[,Key=Value...]` into ordered pairs
pub fn parse_overrides(input: &str) -> Result<Vec<(String, String)>, PatternError> {
    let trimmed = input.trim();
    let pairs = PatternParser::parse(Rule::overrides, trimmed).map_err(|e| PatternError::Override {
        input: trimmed.to_string(),
        message: e.variant.message().to_string(),
    })?;

    let mut overrides = Vec::new();
    for pair in pairs.flat_map(|p| p.into_inner()) {
        if pair.as_rule() != Rule::override_pair {
            continue;
        }
        let mut key = None;
        let mut value = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::identifier => key = Some(inner.as_str().to_string()),
                Rule::override_value => value = Some(inner.as_str().trim().to_string()),
                _ => {}
            }
        }
        match (key, value) {
            (Some(k), Some(v)) => overrides.push((k, v)),
            _ => {
                return Err(PatternError::Override {
                    input: trimmed.to_string(),
                    message: "expected Key=Value".to_string(),
                })
            }
        }
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> BTreeMap<String, String> {
        [
            ("Partition", "aws"),
            ("Region", "us-east-1"),
            ("AccountId", "413157014023"),
            ("TableName", "rd-sample"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_parse_segments() {
        let t = Template::parse("arn:${Partition}:dynamodb:${Region}:${AccountId}:table/${TableName}/backup/*").unwrap();
        let names: Vec<_> = t.placeholders().collect();
        assert_eq!(names, vec!["Partition", "Region", "AccountId", "TableName"]);
        assert!(t.has_wildcards());
        assert_eq!(t.segments().last(), Some(&Segment::AnyRun));
    }

    #[test]
    fn test_render_backup_arn() {
        let t = Template::parse("arn:${Partition}:dynamodb:${Region}:${AccountId}:table/${TableName}/backup/*").unwrap();
        assert_eq!(
            t.render(&bindings()).unwrap(),
            "arn:aws:dynamodb:us-east-1:413157014023:table/rd-sample/backup/*"
        );
    }

    #[test]
    fn test_lone_dollar_is_literal() {
        let t = Template::parse("cost$center").unwrap();
        assert_eq!(t.segments(), &[Segment::Literal("cost$center".to_string())]);
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = Template::parse("arn:${Partition:logs").unwrap_err();
        assert!(matches!(err, PatternError::Syntax { .. }));
    }

    #[test]
    fn test_unbound_placeholder() {
        let t = Template::parse("table/${Missing}").unwrap();
        let err = t.render(&bindings()).unwrap_err();
        assert_eq!(
            err,
            PatternError::Unbound {
                template: "table/${Missing}".to_string(),
                name: "Missing".to_string()
            }
        );
    }

    #[test]
    fn test_wildcard_substitution_rejected() {
        let t = Template::parse("table/${TableName}").unwrap();
        let mut b = bindings();
        b.insert("TableName".to_string(), "*".to_string());
        assert!(matches!(
            t.render(&b),
            Err(PatternError::UnsafeSubstitution { .. })
        ));
    }

    #[test]
    fn test_wildcard_match() {
        let lambda_logs = "arn:aws:logs:us-east-1:413157014023:log-group:/aws/lambda/*";
        assert!(wildcard_match(lambda_logs, "arn:aws:logs:us-east-1:413157014023:log-group:/aws/lambda/importer"));
        assert!(!wildcard_match(lambda_logs, "arn:aws:logs:us-east-1:413157014023:log-group:/ecs/importer"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("s3:Get*", "s3:GetObject"));
        assert!(wildcard_match("table/r?-sample", "table/rd-sample"));
        assert!(!wildcard_match("table/r?-sample", "table/rdd-sample"));
        assert!(wildcard_match("a*b*c", "a-x-b-y-c"));
        assert!(!wildcard_match("a*b*c", "a-x-b-y"));
    }

    #[test]
    fn test_parse_overrides() {
        let parsed = parse_overrides("S3Bucket=my-bucket,DynamoDBTableName=accounts").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("S3Bucket".to_string(), "my-bucket".to_string()),
                ("DynamoDBTableName".to_string(), "accounts".to_string()),
            ]
        );
        assert!(parse_overrides("").unwrap().is_empty());
        assert!(parse_overrides("=value").is_err());
    }
}
