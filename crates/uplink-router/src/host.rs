//! Host header classification

/// What a Host header resolves to, relative to the configured base domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMatch {
    /// `<subdomain>.<base_domain>`
    Tunnel(String),
    /// The base domain itself
    BaseDomain,
    /// Anything else (foreign domains, deeper nesting, raw IPs)
    Unknown,
}

/// Classify a Host header value against the base domain.
///
/// The port is stripped and matching is case-insensitive. Only a single
/// label directly under the base domain counts as a tunnel host;
/// `a.b.<base>` is Unknown.
pub fn classify_host(host: &str, base_domain: &str) -> HostMatch {
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    let base = base_domain.to_ascii_lowercase();

    if host == base {
        return HostMatch::BaseDomain;
    }

    let Some(label) = host.strip_suffix(&format!(".{}", base)) else {
        return HostMatch::Unknown;
    };
    if label.is_empty() || label.contains('.') {
        return HostMatch::Unknown;
    }
    HostMatch::Tunnel(label.to_string())
}
