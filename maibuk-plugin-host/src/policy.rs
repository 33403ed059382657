//! Security policy: CSP derivation, outbound URL admission, and the
//! static source scanner.
//!
//! Everything here is a pure function of a permission set or of source
//! text. The scanner is advisory defense-in-depth — the execution sandbox,
//! not this module, is the security boundary.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::catalog::{ALL_PERMISSIONS, Permission, Risk};

/// Maximally restrictive base policy. Everything not listed is denied;
/// additions are merged per directive from the permission catalog.
const BASE_CSP: &[(&str, &[&str])] = &[
    ("default-src", &["'none'"]),
    ("script-src", &["'self'"]),
    ("style-src", &["'self'", "'unsafe-inline'"]),
    ("img-src", &["'self'", "data:"]),
];

/// Hosts that are never admissible for outbound requests.
const BLOCKED_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "::1", "[::1]"];

/// Wildcard host patterns, translated to anchored regexes at first use.
const BLOCKED_HOST_PATTERNS: &[&str] = &[
    "*.localhost",
    "*.local",
    "10.*",
    "192.168.*",
    "169.254.*",
    "172.16.*",
    "172.17.*",
    "172.18.*",
    "172.19.*",
    "172.20.*",
    "172.21.*",
    "172.22.*",
    "172.23.*",
    "172.24.*",
    "172.25.*",
    "172.26.*",
    "172.27.*",
    "172.28.*",
    "172.29.*",
    "172.30.*",
    "172.31.*",
];

static BLOCKED_PATTERN_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    BLOCKED_HOST_PATTERNS
        .iter()
        .map(|p| Regex::new(&translate_wildcard(p)).expect("blocklist pattern is valid"))
        .collect()
});

/// Translates a `*`-wildcard host pattern into an anchored regex.
fn translate_wildcard(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    out.push('$');
    out
}

/// Outcome of a URL admission check. Never an error: callers always get a
/// decision with a reason they can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlDecision {
    Allowed,
    Denied { reason: String },
}

impl UrlDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }
}

/// One finding from the static scanner.
#[derive(Debug, Clone, Serialize)]
pub struct ScanViolation {
    pub name: &'static str,
    pub reason: &'static str,
    pub risk: Risk,
    pub line: Option<usize>,
}

struct ScanRule {
    pattern: Regex,
    name: &'static str,
    reason: &'static str,
    risk: Risk,
}

/// Fixed, ordered rule table. Line-based and regex-driven: comments inside
/// string literals and obfuscated code evade it, which is accepted.
static SCAN_RULES: Lazy<Vec<ScanRule>> = Lazy::new(|| {
    let rule = |pattern: &str, name, reason, risk| ScanRule {
        pattern: Regex::new(pattern).expect("scan rule pattern is valid"),
        name,
        reason,
        risk,
    };
    vec![
        rule(
            r"\beval\s*\(",
            "dynamic-eval",
            "executes arbitrary strings as code",
            Risk::High,
        ),
        rule(
            r"\bnew\s+Function\s*\(",
            "function-constructor",
            "constructs functions from strings",
            Risk::High,
        ),
        rule(
            r"\.innerHTML\s*=",
            "inner-html-assignment",
            "injects markup into the document",
            Risk::High,
        ),
        rule(
            r"\.outerHTML\s*=",
            "outer-html-assignment",
            "replaces document markup",
            Risk::High,
        ),
        rule(
            r"\bdocument\.write(ln)?\s*\(",
            "document-write",
            "writes directly into the document stream",
            Risk::High,
        ),
        rule(
            r"\bdocument\.cookie\b",
            "cookie-access",
            "reads or writes cookies directly",
            Risk::Medium,
        ),
        rule(
            r"\b(localStorage|sessionStorage)\b",
            "direct-storage-access",
            "bypasses the plugin storage API",
            Risk::Medium,
        ),
        rule(
            r"(\bwindow\.location|\blocation\.href)\s*=",
            "navigation-assignment",
            "navigates the host window",
            Risk::Medium,
        ),
        rule(
            r"__proto__",
            "proto-access",
            "touches the prototype chain",
            Risk::Medium,
        ),
        rule(
            r"\bObject\.prototype\b",
            "prototype-pollution",
            "modifies shared prototypes",
            Risk::Medium,
        ),
    ]
});

/// Policy over a permission set and the configured extra blocklist.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    extra_blocked_domains: Vec<String>,
}

impl SecurityPolicy {
    pub fn new(extra_blocked_domains: Vec<String>) -> Self {
        Self {
            extra_blocked_domains,
        }
    }

    /// Derives the Content-Security-Policy string for a permission set.
    ///
    /// Starts from the restrictive base and merges the catalog's
    /// per-permission additions, de-duplicating values per directive.
    pub fn build_csp(&self, granted: &HashSet<Permission>) -> String {
        let mut directives: Vec<(&str, Vec<&str>)> = BASE_CSP
            .iter()
            .map(|(name, values)| (*name, values.to_vec()))
            .collect();

        // Iterate the catalog rather than the set for deterministic output.
        for permission in ALL_PERMISSIONS {
            if !granted.contains(permission) {
                continue;
            }
            for (directive, value) in permission.csp_additions() {
                match directives.iter_mut().find(|(name, _)| name == directive) {
                    Some((_, values)) => {
                        if !values.contains(value) {
                            values.push(value);
                        }
                    }
                    None => directives.push((directive, vec![value])),
                }
            }
        }

        directives
            .iter()
            .map(|(name, values)| format!("{} {}", name, values.join(" ")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Decides whether a plugin with `granted` permissions may reach `url`.
    pub fn is_url_allowed(&self, granted: &HashSet<Permission>, url: &str) -> UrlDecision {
        if !granted.contains(&Permission::NetworkAccess) {
            return UrlDecision::denied("network-access permission not granted");
        }

        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return UrlDecision::denied(format!("'{url}' is not a valid URL")),
        };

        match parsed.scheme() {
            "data" => return UrlDecision::Allowed,
            "https" => {}
            other => {
                return UrlDecision::denied(format!(
                    "scheme '{other}' is not allowed; use https"
                ));
            }
        }

        let host = match parsed.host_str() {
            Some(h) => h.trim_start_matches('[').trim_end_matches(']').to_string(),
            None => return UrlDecision::denied("URL has no host"),
        };

        if BLOCKED_HOSTS.contains(&host.as_str()) {
            return UrlDecision::denied(format!("host '{host}' is blocked"));
        }
        if BLOCKED_PATTERN_REGEXES.iter().any(|re| re.is_match(&host)) {
            return UrlDecision::denied(format!("host '{host}' matches a blocked pattern"));
        }
        for domain in &self.extra_blocked_domains {
            let matches = if domain.contains('*') {
                Regex::new(&translate_wildcard(domain))
                    .map(|re| re.is_match(&host))
                    .unwrap_or(false)
            } else {
                host == *domain
            };
            if matches {
                return UrlDecision::denied(format!("host '{host}' is blocked by configuration"));
            }
        }

        UrlDecision::Allowed
    }

    /// Scans plugin source for disallowed API usage, line by line.
    ///
    /// A match after a `//` marker on the same line is skipped. That check
    /// is a best-effort heuristic, not a parse: markers inside string
    /// literals also suppress matches. An empty result means no advisory
    /// findings, not that the code is safe.
    pub fn scan_source(&self, source: &str) -> Vec<ScanViolation> {
        let mut violations = Vec::new();
        for (idx, line) in source.lines().enumerate() {
            let comment_start = line.find("//");
            for rule in SCAN_RULES.iter() {
                if let Some(m) = rule.pattern.find(line) {
                    if comment_start.is_some_and(|c| m.start() > c) {
                        continue;
                    }
                    violations.push(ScanViolation {
                        name: rule.name,
                        reason: rule.reason,
                        risk: rule.risk,
                        line: Some(idx + 1),
                    });
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn perms(list: &[Permission]) -> HashSet<Permission> {
        list.iter().copied().collect()
    }

    // ================================================================
    // CSP generation
    // ================================================================

    #[test]
    fn base_csp_without_permissions() {
        let policy = SecurityPolicy::default();
        let csp = policy.build_csp(&perms(&[]));
        assert_eq!(
            csp,
            "default-src 'none'; script-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:"
        );
    }

    #[test]
    fn connect_src_iff_network_granted() {
        let policy = SecurityPolicy::default();
        assert!(!policy.build_csp(&perms(&[Permission::ContentRead])).contains("connect-src"));

        let csp = policy.build_csp(&perms(&[Permission::NetworkAccess]));
        assert!(csp.contains("connect-src https: data:"));
    }

    #[test]
    fn directive_values_never_duplicate() {
        let policy = SecurityPolicy::default();
        let csp = policy.build_csp(&perms(&[Permission::NetworkAccess, Permission::ContentRead]));
        for directive in csp.split("; ") {
            let values: Vec<&str> = directive.split(' ').skip(1).collect();
            let unique: HashSet<&str> = values.iter().copied().collect();
            assert_eq!(values.len(), unique.len(), "duplicates in '{directive}'");
        }
    }

    #[test]
    fn csp_is_deterministic() {
        let policy = SecurityPolicy::default();
        let set = perms(&[Permission::NetworkAccess, Permission::StorageLocal]);
        assert_eq!(policy.build_csp(&set), policy.build_csp(&set));
    }

    // ================================================================
    // URL admission
    // ================================================================

    #[test]
    fn url_requires_network_permission() {
        let policy = SecurityPolicy::default();
        let decision = policy.is_url_allowed(&perms(&[]), "https://example.com");
        assert!(!decision.is_allowed());
        match decision {
            UrlDecision::Denied { reason } => assert!(reason.contains("network-access")),
            UrlDecision::Allowed => unreachable!(),
        }
    }

    #[test]
    fn https_and_data_allowed() {
        let policy = SecurityPolicy::default();
        let net = perms(&[Permission::NetworkAccess]);
        assert!(policy.is_url_allowed(&net, "https://api.example.com/v1").is_allowed());
        assert!(policy.is_url_allowed(&net, "data:image/png;base64,AAAA").is_allowed());
    }

    #[test]
    fn insecure_schemes_denied() {
        let policy = SecurityPolicy::default();
        let net = perms(&[Permission::NetworkAccess]);
        assert!(!policy.is_url_allowed(&net, "http://example.com").is_allowed());
        assert!(!policy.is_url_allowed(&net, "ftp://example.com").is_allowed());
        assert!(!policy.is_url_allowed(&net, "not a url").is_allowed());
    }

    #[test]
    fn loopback_hosts_denied() {
        let policy = SecurityPolicy::default();
        let net = perms(&[Permission::NetworkAccess]);
        for url in [
            "https://localhost/api",
            "https://127.0.0.1:8443",
            "https://0.0.0.0",
            "https://[::1]/x",
            "https://dev.localhost",
        ] {
            assert!(!policy.is_url_allowed(&net, url).is_allowed(), "{url}");
        }
    }

    #[test]
    fn private_network_patterns_denied() {
        let policy = SecurityPolicy::default();
        let net = perms(&[Permission::NetworkAccess]);
        for url in [
            "https://10.0.0.5",
            "https://192.168.1.10/admin",
            "https://169.254.169.254/latest/meta-data",
            "https://172.16.0.1",
            "https://172.31.255.255",
        ] {
            assert!(!policy.is_url_allowed(&net, url).is_allowed(), "{url}");
        }
        // 172.32.x is outside the private range.
        assert!(policy.is_url_allowed(&net, "https://172.32.0.1").is_allowed());
    }

    #[test]
    fn wildcard_translation_is_anchored() {
        // "10.*" must not match a public host merely containing "10.".
        let policy = SecurityPolicy::default();
        let net = perms(&[Permission::NetworkAccess]);
        assert!(policy.is_url_allowed(&net, "https://cdn10.example.com").is_allowed());
    }

    #[test]
    fn configured_extra_domains_denied() {
        let policy = SecurityPolicy::new(vec![
            "tracker.example.com".to_string(),
            "*.ads.example.com".to_string(),
        ]);
        let net = perms(&[Permission::NetworkAccess]);
        assert!(!policy.is_url_allowed(&net, "https://tracker.example.com").is_allowed());
        assert!(!policy.is_url_allowed(&net, "https://a.ads.example.com").is_allowed());
        assert!(policy.is_url_allowed(&net, "https://example.com").is_allowed());
    }

    // ================================================================
    // Static scanner
    // ================================================================

    #[test]
    fn flags_dynamic_code_and_sinks() {
        let policy = SecurityPolicy::default();
        let source = "const x = eval(input);\nel.innerHTML = html;\nnew Function(body)();\nlet c = document.cookie;";
        let names: Vec<&str> = policy.scan_source(source).iter().map(|v| v.name).collect();
        assert!(names.contains(&"dynamic-eval"));
        assert!(names.contains(&"inner-html-assignment"));
        assert!(names.contains(&"function-constructor"));
        assert!(names.contains(&"cookie-access"));
    }

    #[test]
    fn reports_one_based_line_numbers() {
        let policy = SecurityPolicy::default();
        let violations = policy.scan_source("let ok = 1;\neval(x);\n");
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, Some(2));
    }

    #[test]
    fn skips_matches_after_line_comment() {
        let policy = SecurityPolicy::default();
        assert!(policy.scan_source("// eval(x) is forbidden here").is_empty());
        assert!(policy.scan_source("let a = 1; // document.cookie").is_empty());
        // A match before the marker still counts.
        assert_eq!(policy.scan_source("eval(x); // fine").len(), 1);
    }

    #[test]
    fn flags_storage_navigation_and_prototypes() {
        let policy = SecurityPolicy::default();
        let source = "localStorage.setItem('k', v);\nwindow.location = url;\nobj.__proto__ = evil;\nObject.prototype.x = 1;";
        let found = policy.scan_source(source);
        assert_eq!(found.len(), 4);
    }

    #[test]
    fn clean_source_has_no_findings() {
        let policy = SecurityPolicy::default();
        let source = "export function onLoad(api) {\n  return api.editor.getText();\n}\n";
        assert!(policy.scan_source(source).is_empty());
    }
}
