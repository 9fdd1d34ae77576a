//! Provider naming constraints

use crate::error::{StackError, StackResult};

pub fn validate_account_id(value: &str) -> StackResult<()> {
    if value.len() != 12 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StackError::invalid_name("account id", value, "expected 12 digits"));
    }
    Ok(())
}

/// Region codes look like `us-east-1` or `us-gov-west-1`.
pub fn validate_region(value: &str) -> StackResult<()> {
    let parts: Vec<&str> = value.split('-').collect();
    let well_formed = parts.len() >= 3
        && parts[0].len() == 2
        && parts[0].bytes().all(|b| b.is_ascii_lowercase())
        && parts[1..parts.len() - 1]
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_lowercase()))
        && parts
            .last()
            .is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        return Err(StackError::invalid_name(
            "region",
            value,
            "expected a region code such as us-east-1",
        ));
    }
    Ok(())
}

/// DynamoDB: 3-255 characters of `[A-Za-z0-9_.-]`.
pub fn validate_table_name(value: &str) -> StackResult<()> {
    if !(3..=255).contains(&value.len()) {
        return Err(StackError::invalid_name(
            "table name",
            value,
            "must be between 3 and 255 characters",
        ));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(StackError::invalid_name(
            "table name",
            value,
            format!("character '{}' is not allowed", c),
        ));
    }
    Ok(())
}

/// S3 general purpose bucket rules.
pub fn validate_bucket_name(value: &str) -> StackResult<()> {
    if !(3..=63).contains(&value.len()) {
        return Err(StackError::invalid_name(
            "bucket name",
            value,
            "must be between 3 and 63 characters",
        ));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err(StackError::invalid_name(
            "bucket name",
            value,
            "only lowercase letters, digits, '.' and '-' are allowed",
        ));
    }
    let edge_ok = |b: Option<&u8>| b.is_some_and(|b| b.is_ascii_alphanumeric());
    if !edge_ok(value.as_bytes().first()) || !edge_ok(value.as_bytes().last()) {
        return Err(StackError::invalid_name(
            "bucket name",
            value,
            "must begin and end with a letter or digit",
        ));
    }
    if value.contains("..") {
        return Err(StackError::invalid_name("bucket name", value, "must not contain '..'"));
    }
    let octets: Vec<&str> = value.split('.').collect();
    if octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok()) {
        return Err(StackError::invalid_name(
            "bucket name",
            value,
            "must not be formatted as an IP address",
        ));
    }
    Ok(())
}

/// CloudFormation stack names: a letter, then up to 127 of `[A-Za-z0-9-]`.
pub fn validate_stack_name(value: &str) -> StackResult<()> {
    let starts_alpha = value.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if !starts_alpha
        || value.len() > 128
        || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(StackError::invalid_name(
            "stack name",
            value,
            "must start with a letter and contain only letters, digits and '-' (max 128)",
        ));
    }
    Ok(())
}

/// IAM role names: 1-64 of `[A-Za-z0-9+=,.@_-]`.
pub fn validate_role_name(value: &str) -> StackResult<()> {
    if value.is_empty()
        || value.len() > 64
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c))
    {
        return Err(StackError::invalid_name(
            "role name",
            value,
            "must be 1-64 characters of letters, digits and +=,.@_-",
        ));
    }
    Ok(())
}

/// Lambda function names: 1-64 of `[A-Za-z0-9_-]`.
pub fn validate_function_name(value: &str) -> StackResult<()> {
    if value.is_empty()
        || value.len() > 64
        || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(StackError::invalid_name(
            "function name",
            value,
            "must be 1-64 characters of letters, digits, '_' and '-'",
        ));
    }
    Ok(())
}
