//! Relay target parsing
//!
//! Parses `LOCAL_PORT:REMOTE_HOST:REMOTE_PORT` into its components. All
//! checks here run before any cluster call is made.

use std::net::Ipv6Addr;

use crate::errors::SocatError;
use crate::relay::RelayTarget;

/// Parse a relay target
///
/// # Format
/// ```text
/// LOCAL_PORT:REMOTE_HOST:REMOTE_PORT
/// LOCAL_PORT:[IPV6_ADDRESS]:REMOTE_PORT
/// ```
///
/// # Examples
/// ```
/// use kubectl_socat::cli::parse_relay_target;
///
/// let target = parse_relay_target("8080:db.internal:5432").unwrap();
/// assert_eq!(target.local_port, 8080);
/// assert_eq!(target.remote_host, "db.internal");
/// assert_eq!(target.remote_port, 5432);
/// ```
pub fn parse_relay_target(spec: &str) -> Result<RelayTarget, SocatError> {
    let spec = spec.trim();

    let (local, remote) = spec.split_once(':').ok_or_else(|| SocatError::Argument(format!(
        "Target must be LOCAL_PORT:REMOTE_HOST:REMOTE_PORT. Got: {}", spec
    )))?;

    let local_port = parse_port(local, "local")?;

    let (host, port) = remote.rsplit_once(':').ok_or_else(|| SocatError::Argument(format!(
        "Target is missing the remote port: {}", spec
    )))?;

    let remote_port = parse_port(port, "remote")?;
    if remote_port == 0 {
        return Err(SocatError::Argument("Remote port cannot be 0".to_string()));
    }

    let remote_host = parse_host(host)?;

    Ok(RelayTarget {
        local_port,
        remote_host,
        remote_port,
    })
}

fn parse_port(s: &str, which: &str) -> Result<u16, SocatError> {
    if s.is_empty() {
        return Err(SocatError::Argument(format!("The {} port cannot be empty", which)));
    }
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(SocatError::Argument(format!("Invalid {} port: {}", which, s)));
    }
    s.parse::<u16>()
        .map_err(|_| SocatError::Argument(format!("The {} port is out of range: {}", which, s)))
}

fn parse_host(host: &str) -> Result<String, SocatError> {
    if host.is_empty() {
        return Err(SocatError::Argument("Remote host cannot be empty".to_string()));
    }

    // Bracketed IPv6 literal
    if let Some(inner) = host.strip_prefix('[') {
        let inner = inner.strip_suffix(']').ok_or_else(|| SocatError::Argument(format!(
            "Unterminated IPv6 address: {}", host
        )))?;
        let addr: Ipv6Addr = inner.parse().map_err(|_| SocatError::Argument(format!(
            "Invalid IPv6 address: {}", inner
        )))?;
        return Ok(addr.to_string());
    }

    if host.contains(':') {
        return Err(SocatError::Argument(format!(
            "IPv6 addresses must be enclosed in brackets, e.g. [{}]", host
        )));
    }

    for c in host.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '.' && c != '_' {
            return Err(SocatError::Argument(format!(
                "Remote host contains invalid character '{}': {}", c, host
            )));
        }
    }

    Ok(host.to_string())
}

/// Validate a Kubernetes resource name (DNS-1123 label)
pub fn validate_k8s_name(name: &str, kind: &str) -> Result<(), SocatError> {
    // Names must:
    // - Be 63 characters or fewer
    // - Contain only lowercase alphanumeric characters or '-'
    // - Start and end with an alphanumeric character

    if name.is_empty() {
        return Err(SocatError::Argument(format!("K8s {} name cannot be empty", kind)));
    }

    if name.len() > 63 {
        return Err(SocatError::Argument(format!(
            "K8s {} name too long (max 63 chars): {}", kind, name
        )));
    }

    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    if !name.chars().next().map(is_alnum).unwrap_or(false) {
        return Err(SocatError::Argument(format!(
            "K8s {} name must start with a lowercase letter or digit: {}", kind, name
        )));
    }

    if !name.chars().last().map(is_alnum).unwrap_or(false) {
        return Err(SocatError::Argument(format!(
            "K8s {} name must end with alphanumeric character: {}", kind, name
        )));
    }

    for c in name.chars() {
        if !is_alnum(c) && c != '-' {
            return Err(SocatError::Argument(format!(
                "K8s {} name contains invalid character '{}': {}", kind, c, name
            )));
        }
    }

    Ok(())
}
