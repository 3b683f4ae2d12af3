//! Field validation shared by the resource expanders.

use crate::config::ExtraFields;
use converge_core::{parse_duration, ValidationError};
use std::net::Ipv4Addr;

/// Flat-cased keys of the older schema and their canonical spelling.
const LEGACY_FIELDS: &[(&str, &str)] = &[
    ("startrange", "start_range"),
    ("endrange", "end_range"),
    ("scopename", "scope_name"),
    ("subnetmask", "subnet_mask"),
    ("dnsdomain", "dns_domain"),
    ("dnsserver", "dns_server"),
    ("leaseduration", "lease_duration"),
    ("activatepolicies", "activate_policies"),
    ("maxbootpclients", "max_bootp_clients"),
    ("conflictdetectionattempts", "conflict_detection_attempts"),
    ("populatesecuritygroup", "populate_security_group"),
    ("domainuser", "domain_user"),
    ("domainpass", "domain_pass"),
];

/// Reject keys no schema knows, pointing legacy spellings at their
/// replacement.
pub fn no_extra_fields(resource: &str, extra: &ExtraFields) -> Result<(), ValidationError> {
    let Some(field) = extra.keys().next() else {
        return Ok(());
    };

    let legacy = LEGACY_FIELDS
        .iter()
        .find(|(old, _)| old.eq_ignore_ascii_case(field));

    Err(match legacy {
        Some((_, canonical)) => ValidationError::LegacyField {
            resource: resource.to_string(),
            field: field.clone(),
            canonical: canonical.to_string(),
        },
        None => ValidationError::UnknownField {
            resource: resource.to_string(),
            field: field.clone(),
        },
    })
}

/// A required, non-blank text field.
pub fn required<'a>(
    resource: &str,
    field: &str,
    value: Option<&'a String>,
) -> Result<&'a str, ValidationError> {
    match value.map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ValidationError::MissingField {
            resource: resource.to_string(),
            field: field.to_string(),
        }),
    }
}

/// An integer within `min..=max`.
pub fn ranged(
    resource: &str,
    field: &str,
    value: i64,
    min: i64,
    max: i64,
) -> Result<i64, ValidationError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::OutOfRange {
            resource: resource.to_string(),
            field: field.to_string(),
            value,
            min,
            max,
        })
    }
}

/// A dotted-quad IPv4 address.
pub fn ipv4(resource: &str, field: &str, value: &str) -> Result<Ipv4Addr, ValidationError> {
    value
        .parse()
        .map_err(|_| invalid(resource, field, value, "not an IPv4 address"))
}

/// One of a fixed set of words, matched case-insensitively and returned in
/// lower case.
pub fn one_of(
    resource: &str,
    field: &str,
    value: &str,
    allowed: &[&str],
) -> Result<String, ValidationError> {
    let lower = value.trim().to_ascii_lowercase();
    if allowed.contains(&lower.as_str()) {
        Ok(lower)
    } else {
        Err(invalid(
            resource,
            field,
            value,
            &format!("expected one of {}", allowed.join(", ")),
        ))
    }
}

/// A time span; returns the trimmed text and the parsed duration.
pub fn duration(
    resource: &str,
    field: &str,
    value: &str,
) -> Result<(String, chrono::Duration), ValidationError> {
    let text = value.trim();
    match parse_duration(text) {
        Some(span) if span >= chrono::Duration::zero() => Ok((text.to_string(), span)),
        Some(_) => Err(invalid(resource, field, value, "negative time span")),
        None => Err(invalid(resource, field, value, "expected [d.]hh:mm[:ss] or a number of days")),
    }
}

/// An `InvalidValue` error.
pub fn invalid(resource: &str, field: &str, value: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        resource: resource.to_string(),
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
