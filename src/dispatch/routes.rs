//! Lookup table the request servicer routes through.
//!
//! # Responsibilities
//! - Map domain → {secure, non-secure} → mount path → service
//! - Resolve a request's `Host` to a domain, falling back to the `"*"` domain
//! - Fall back through parent paths when the exact path has no service
//!
//! Written only by the service registry; read on every request.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::registry::{same_service, SecurityType, ServiceRef};

/// Domain that matches any host.
pub const ANY_DOMAIN: &str = "*";

#[derive(Default)]
struct DomainRoutes {
    secure: HashMap<String, ServiceRef>,
    non_secure: HashMap<String, ServiceRef>,
}

impl DomainRoutes {
    fn table(&self, secure: bool) -> &HashMap<String, ServiceRef> {
        if secure {
            &self.secure
        } else {
            &self.non_secure
        }
    }

    fn is_empty(&self) -> bool {
        self.secure.is_empty() && self.non_secure.is_empty()
    }
}

/// A successful lookup.
#[derive(Clone)]
pub struct Route {
    /// Domain the match came from (`"*"` for the fallback domain).
    pub domain: String,
    /// Mount path of the matched service (may be a parent of the request path).
    pub mount: String,
    pub service: ServiceRef,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("domain", &self.domain)
            .field("mount", &self.mount)
            .finish()
    }
}

#[derive(Default)]
pub struct RoutingTable {
    domains: RwLock<HashMap<String, DomainRoutes>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `service` on the sides of `domain` that `security` covers.
    pub fn add(&self, domain: &str, path: &str, security: SecurityType, service: &ServiceRef) {
        let mut domains = self.domains.write();
        let routes = domains.entry(domain.to_string()).or_default();
        if security.includes_secure() {
            routes.secure.insert(path.to_string(), service.clone());
        }
        if security.includes_non_secure() {
            routes.non_secure.insert(path.to_string(), service.clone());
        }
    }

    /// Unmount `path`, but only where it still points at `service`.
    pub fn remove(&self, domain: &str, path: &str, security: SecurityType, service: &ServiceRef) {
        let mut domains = self.domains.write();
        let Some(routes) = domains.get_mut(domain) else {
            return;
        };
        let owned = |map: &HashMap<String, ServiceRef>| {
            map.get(path).map(|s| same_service(s, service)).unwrap_or(false)
        };
        if security.includes_secure() && owned(&routes.secure) {
            routes.secure.remove(path);
        }
        if security.includes_non_secure() && owned(&routes.non_secure) {
            routes.non_secure.remove(path);
        }
        if routes.is_empty() {
            domains.remove(domain);
        }
    }

    pub fn clear(&self) {
        self.domains.write().clear();
    }

    /// Number of mounted (domain, side, path) routes.
    pub fn len(&self) -> usize {
        self.domains
            .read()
            .values()
            .map(|r| r.secure.len() + r.non_secure.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the service for a request.
    ///
    /// `host` is the raw `Host` value; `path` must already be normalized.
    /// The host's own domain is searched first, then `"*"`.
    pub fn find(&self, host: Option<&str>, path: &str, secure: bool) -> Option<Route> {
        let domain = host.map(domain_of).filter(|d| !d.is_empty());
        let domains = self.domains.read();

        let candidates = domain
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(ANY_DOMAIN));
        for name in candidates {
            let Some(routes) = domains.get(name) else {
                continue;
            };
            if let Some((mount, service)) = lookup(routes.table(secure), path) {
                return Some(Route {
                    domain: name.to_string(),
                    mount: mount.to_string(),
                    service: service.clone(),
                });
            }
        }
        None
    }
}

/// Exact path first, then each parent: `/a/b/c` → `/a/b` → `/a` → `/`.
fn lookup<'m>(table: &'m HashMap<String, ServiceRef>, path: &str) -> Option<(&'m str, &'m ServiceRef)> {
    let mut candidate = path;
    loop {
        if let Some((mount, service)) = table.get_key_value(candidate) {
            return Some((mount.as_str(), service));
        }
        if candidate.len() <= 1 {
            return None;
        }
        candidate = match candidate.rfind('/') {
            Some(0) => "/",
            Some(i) => &candidate[..i],
            None => "/",
        };
    }
}

/// Lowercased host name with any port removed.
pub fn domain_of(host: &str) -> String {
    let host = host.trim();
    let name = if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal: keep the brackets, drop what follows `]`.
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    name.to_ascii_lowercase()
}

/// Drop the query and fragment, collapse repeated slashes, and trim the
/// trailing slash so lookups see a canonical mount path.
pub fn normalize_path(target: &str) -> String {
    let path = target
        .split(['?', '#'])
        .next()
        .unwrap_or_default();

    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment == ".." {
            if let Some(i) = out.rfind('/') {
                out.truncate(i);
            }
            continue;
        }
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// The query part of a request target, if any.
pub fn query_of(target: &str) -> Option<&str> {
    let (_, rest) = target.split_once('?')?;
    Some(rest.split('#').next().unwrap_or_default())
}
