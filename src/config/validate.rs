// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::FleetConfig;

// ---------------------------------------------------------------------------
// ConfigDiagnostic
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("readiness timeout must be greater than zero")]
    #[diagnostic(
        code(devfleet::zero_readiness_timeout),
        help("services typically need 60 to 120 seconds to build and bind their port")
    )]
    ZeroReadinessTimeout {
        #[source_code]
        src: NamedSource<String>,
        #[label("timeout is zero")]
        span: SourceSpan,
    },

    #[error("poll interval of {poll_ms}ms does not fit the {timeout_secs}s readiness timeout")]
    #[diagnostic(
        code(devfleet::invalid_poll_interval),
        help("use a non-zero interval no longer than the readiness timeout")
    )]
    InvalidPollInterval {
        #[source_code]
        src: NamedSource<String>,
        #[label("invalid interval")]
        span: SourceSpan,
        poll_ms: u64,
        timeout_secs: u64,
    },

    #[error("the `{tier}` keyword list contains an empty keyword")]
    #[diagnostic(
        code(devfleet::empty_keyword),
        help("an empty keyword would match every service")
    )]
    EmptyKeyword {
        #[source_code]
        src: NamedSource<String>,
        #[label("empty keyword")]
        span: SourceSpan,
        tier: String,
    },

    #[error("invalid health check address `{value}`")]
    #[diagnostic(
        code(devfleet::invalid_health_address),
        help("expected `host:port`, for example `localhost:1433`")
    )]
    InvalidHealthAddress {
        #[source_code]
        src: NamedSource<String>,
        #[label("not host:port")]
        span: SourceSpan,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Byte span of a `[section]` header, or an empty span when the section is absent.
fn find_table_span(source: &str, section: &str) -> SourceSpan {
    let header = format!("[{}]", section);
    match source.find(&header) {
        Some(pos) => (pos + 1, section.len()).into(),
        None => (0, 0).into(),
    }
}

/// Byte span of the value of `field` inside `[section]`.
fn find_field_span(source: &str, section: &str, field: &str) -> SourceSpan {
    let header = format!("[{}]", section);
    let Some(search_start) = source.find(&header) else {
        return (0, 0).into();
    };
    let after_header = &source[search_start..];

    for prefix in [format!("{} =", field), format!("{}=", field)] {
        if let Some(rel_pos) = after_header.find(&prefix) {
            let val_start = search_start + rel_pos + prefix.len();
            let val_trimmed = source[val_start..].trim_start();
            let trim_offset = val_start + (source[val_start..].len() - val_trimmed.len());
            let val_len = val_trimmed.find('\n').unwrap_or(val_trimmed.len());
            return (trim_offset, val_len.min(val_trimmed.len())).into();
        }
    }

    find_table_span(source, section)
}

/// True for `host:port` with a non-empty host and a non-zero port.
pub fn is_host_port(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => {
            !host.trim().is_empty() && port.parse::<u16>().map(|p| p != 0).unwrap_or(false)
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

pub fn validate(
    config: &FleetConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());
    let sup = &config.supervisor;

    if sup.readiness_timeout_secs == 0 {
        errors.push(ConfigDiagnostic::ZeroReadinessTimeout {
            src: src.clone(),
            span: find_field_span(source, "supervisor", "readiness_timeout_secs"),
        });
    }

    if sup.poll_interval_ms == 0
        || (sup.readiness_timeout_secs > 0
            && sup.poll_interval_ms > sup.readiness_timeout_secs.saturating_mul(1000))
    {
        errors.push(ConfigDiagnostic::InvalidPollInterval {
            src: src.clone(),
            span: find_field_span(source, "supervisor", "poll_interval_ms"),
            poll_ms: sup.poll_interval_ms,
            timeout_secs: sup.readiness_timeout_secs,
        });
    }

    let tiers = [
        ("required", &config.bulk.required),
        ("web", &config.bulk.web),
        ("communication", &config.bulk.communication),
    ];
    for (tier, keywords) in tiers {
        if keywords.iter().any(|k| k.trim().is_empty()) {
            errors.push(ConfigDiagnostic::EmptyKeyword {
                src: src.clone(),
                span: find_field_span(source, "bulk", tier),
                tier: tier.to_string(),
            });
        }
    }

    if let Some(address) = &config.health.address {
        if !is_host_port(address) {
            errors.push(ConfigDiagnostic::InvalidHealthAddress {
                src: src.clone(),
                span: find_field_span(source, "health", "address"),
                value: address.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
