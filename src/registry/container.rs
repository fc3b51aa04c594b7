//! Domain and security aware service registry.
//!
//! # Responsibilities
//! - Hold domain → {secure, non-secure} → path → service under one reader/writer lock
//! - Register a service across several domains as a single transaction
//! - Keep the dispatcher's routing table in step with successful changes
//!
//! # Design Decisions
//! - Initialize hooks run before the lock is taken; only map edits happen under it
//! - Cleanup hooks run after the lock is released, once per distinct instance
//! - Domain names are stored lowercased to match `Host` resolution

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dispatch::routes::{RoutingTable, ANY_DOMAIN};
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::registry::security::SecurityType;
use crate::registry::service::{same_service, ServiceRef};

#[derive(Default)]
struct DomainServices {
    secure: HashMap<String, ServiceRef>,
    non_secure: HashMap<String, ServiceRef>,
}

impl DomainServices {
    fn is_empty(&self) -> bool {
        self.secure.is_empty() && self.non_secure.is_empty()
    }

    fn len(&self) -> usize {
        self.secure.len() + self.non_secure.len()
    }

    /// `Both` needs both sides free.
    fn is_free(&self, path: &str, security: SecurityType) -> bool {
        !(security.includes_secure() && self.secure.contains_key(path)
            || security.includes_non_secure() && self.non_secure.contains_key(path))
    }
}

struct RegistryState {
    domains: HashMap<String, DomainServices>,
    default_domains: Vec<String>,
}

impl RegistryState {
    fn len(&self) -> usize {
        self.domains.values().map(DomainServices::len).sum()
    }

    fn targets(&self, domain: Option<&str>) -> Vec<String> {
        let requested = match domain {
            Some(d) => vec![normalize_domain(d)],
            None => self.default_domains.clone(),
        };
        let mut targets: Vec<String> = Vec::with_capacity(requested.len());
        for d in requested {
            if !targets.contains(&d) {
                targets.push(d);
            }
        }
        targets
    }

    fn insert(&mut self, domain: &str, security: SecurityType, service: &ServiceRef) -> Result<()> {
        let path = service.path();
        let free = self
            .domains
            .get(domain)
            .map(|d| d.is_free(path, security))
            .unwrap_or(true);
        if !free {
            return Err(Error::DuplicateService {
                domain: domain.to_string(),
                path: path.to_string(),
                security,
            });
        }

        let entry = self.domains.entry(domain.to_string()).or_default();
        if security.includes_secure() {
            entry.secure.insert(path.to_string(), service.clone());
        }
        if security.includes_non_secure() {
            entry.non_secure.insert(path.to_string(), service.clone());
        }
        Ok(())
    }

    /// Remove `path` from `domain`. With `owner`, only entries pointing at
    /// that instance are touched. Returns what was removed.
    fn remove(
        &mut self,
        domain: &str,
        path: &str,
        security: SecurityType,
        owner: Option<&ServiceRef>,
    ) -> Vec<ServiceRef> {
        let mut removed = Vec::new();
        let Some(entry) = self.domains.get_mut(domain) else {
            return removed;
        };

        let mut take = |map: &mut HashMap<String, ServiceRef>| {
            let owned = match (map.get(path), owner) {
                (Some(current), Some(owner)) => same_service(current, owner),
                (Some(_), None) => true,
                (None, _) => false,
            };
            if owned {
                if let Some(service) = map.remove(path) {
                    removed.push(service);
                }
            }
        };
        if security.includes_secure() {
            take(&mut entry.secure);
        }
        if security.includes_non_secure() {
            take(&mut entry.non_secure);
        }

        if entry.is_empty() {
            self.domains.remove(domain);
        }
        removed
    }
}

/// Process-wide registry of web services.
pub struct ServiceRegistry {
    state: RwLock<RegistryState>,
    routes: Arc<RoutingTable>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    /// Empty registry with `["*"]` as the default domain list.
    pub fn new() -> Self {
        Self::with_default_domains(vec![ANY_DOMAIN.to_string()])
    }

    pub fn with_default_domains(domains: Vec<String>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                domains: HashMap::new(),
                default_domains: domains.iter().map(|d| normalize_domain(d)).collect(),
            }),
            routes: Arc::new(RoutingTable::new()),
        }
    }

    /// Routing table kept in step with this registry.
    pub fn routes(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.routes)
    }

    pub fn default_domains(&self) -> Vec<String> {
        self.state.read().default_domains.clone()
    }

    /// Replace the domains used when a call names no domain.
    ///
    /// Existing registrations stay where they are.
    pub fn set_default_domains(&self, domains: Vec<String>) {
        let domains: Vec<String> = domains.iter().map(|d| normalize_domain(d)).collect();
        tracing::info!(domains = ?domains, "Default domains updated");
        self.state.write().default_domains = domains;
    }

    /// Register `service` under `domain`, or under every default domain.
    ///
    /// Either every target domain gets the service or none does. With
    /// `initialize`, the init hook runs first; its cleanup hook runs if
    /// init or registration fails.
    pub fn add_service(
        &self,
        service: ServiceRef,
        security: SecurityType,
        initialize: bool,
        domain: Option<&str>,
    ) -> Result<()> {
        let path = service.path().to_string();

        if initialize {
            if let Err(e) = service.initialize() {
                service.cleanup();
                tracing::warn!(path = %path, error = %e, "Service failed to initialize");
                return Err(Error::AddServiceFailure {
                    path,
                    source: Box::new(e),
                });
            }
        }

        let outcome = {
            let mut state = self.state.write();
            let targets = state.targets(domain);
            let mut added: Vec<&str> = Vec::with_capacity(targets.len());
            let mut failure = None;

            for target in &targets {
                match state.insert(target, security, &service) {
                    Ok(()) => added.push(target),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            match failure {
                Some(e) => {
                    for target in added {
                        state.remove(target, &path, security, Some(&service));
                    }
                    Err(e)
                }
                None => {
                    for target in &targets {
                        self.routes.add(target, &path, security, &service);
                    }
                    metrics::set_registry_services(state.len());
                    Ok(targets)
                }
            }
        };

        match outcome {
            Ok(targets) => {
                tracing::info!(path = %path, security = %security, domains = ?targets, "Web service added");
                Ok(())
            }
            Err(e) => {
                if initialize {
                    service.cleanup();
                }
                tracing::warn!(path = %path, security = %security, error = %e, "Could not add web service");
                Err(Error::AddServiceFailure {
                    path,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Remove `path` from `domain`, or from every default domain.
    ///
    /// Returns the number of distinct service instances removed. With
    /// `cleanup`, each of them has its cleanup hook run exactly once.
    pub fn remove_service(
        &self,
        path: &str,
        security: SecurityType,
        cleanup: bool,
        domain: Option<&str>,
    ) -> usize {
        let mut distinct: Vec<ServiceRef> = Vec::new();
        {
            let mut state = self.state.write();
            for target in state.targets(domain) {
                for service in state.remove(&target, path, security, None) {
                    self.routes.remove(&target, path, security, &service);
                    if !distinct.iter().any(|s| same_service(s, &service)) {
                        distinct.push(service);
                    }
                }
            }
            metrics::set_registry_services(state.len());
        }

        if cleanup {
            for service in &distinct {
                service.cleanup();
            }
        }
        tracing::info!(path = %path, security = %security, removed = distinct.len(), "Web service removed");
        distinct.len()
    }

    /// Look a service up by exact path.
    ///
    /// `Both` prefers the non-secure side and falls back to the secure one.
    /// Without `domain`, the default domains are searched in order.
    pub fn get_service(
        &self,
        path: &str,
        security: SecurityType,
        domain: Option<&str>,
    ) -> Option<ServiceRef> {
        let state = self.state.read();
        for target in state.targets(domain) {
            let Some(entry) = state.domains.get(&target) else {
                continue;
            };
            if security.includes_non_secure() {
                if let Some(service) = entry.non_secure.get(path) {
                    return Some(service.clone());
                }
            }
            if security.includes_secure() {
                if let Some(service) = entry.secure.get(path) {
                    return Some(service.clone());
                }
            }
        }
        None
    }

    /// Drop every registration. Cleanup hooks are not run.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.domains.clear();
        self.routes.clear();
        metrics::set_registry_services(0);
        tracing::info!("Service registry cleared");
    }

    /// Number of registered (domain, side, path) keys.
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Domains that currently hold at least one service, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.state.read().domains.keys().cloned().collect();
        domains.sort();
        domains
    }

    /// Every registered key as `(domain, side, path)`, sorted.
    ///
    /// The side is `Secure` or `NonSecure`; a `Both` registration shows up twice.
    pub fn entries(&self) -> Vec<(String, SecurityType, String)> {
        let state = self.state.read();
        let mut entries = Vec::with_capacity(state.len());
        for (domain, services) in &state.domains {
            for path in services.secure.keys() {
                entries.push((domain.clone(), SecurityType::Secure, path.clone()));
            }
            for path in services.non_secure.keys() {
                entries.push((domain.clone(), SecurityType::NonSecure, path.clone()));
            }
        }
        entries.sort_by(|a, b| (&a.0, a.1.as_str(), &a.2).cmp(&(&b.0, b.1.as_str(), &b.2)));
        entries
    }
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Exchange;
    use crate::registry::WebService;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Hooks {
        path: String,
        fail_init: bool,
        inits: AtomicUsize,
        cleanups: AtomicUsize,
    }

    impl Hooks {
        fn new(path: &str) -> Arc<Self> {
            Arc::new(Self {
                path: path.to_string(),
                ..Default::default()
            })
        }
    }

    impl WebService for Hooks {
        fn path(&self) -> &str {
            &self.path
        }

        fn initialize(&self) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(Error::InitFailed {
                    path: self.path.clone(),
                    reason: "boom".into(),
                });
            }
            Ok(())
        }

        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }

        fn service(&self, _exchange: &mut Exchange<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn get_returns_registered_service_until_removed() {
        let registry = ServiceRegistry::new();
        let hooks = Hooks::new("/orders");
        let service: ServiceRef = hooks.clone();

        registry
            .add_service(service.clone(), SecurityType::Secure, true, Some("shop.local"))
            .unwrap();
        assert_eq!(hooks.inits.load(Ordering::SeqCst), 1);

        let found = registry
            .get_service("/orders", SecurityType::Secure, Some("shop.local"))
            .unwrap();
        assert!(same_service(&found, &service));
        assert!(registry
            .get_service("/orders", SecurityType::NonSecure, Some("shop.local"))
            .is_none());
        assert!(registry.get_service("/orders", SecurityType::Secure, None).is_none());

        assert_eq!(registry.remove_service("/orders", SecurityType::Secure, false, Some("shop.local")), 1);
        assert!(registry
            .get_service("/orders", SecurityType::Secure, Some("shop.local"))
            .is_none());
        assert!(registry.is_empty());
        assert!(registry.domains().is_empty());
        assert_eq!(hooks.cleanups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn both_prefers_non_secure() {
        let registry = ServiceRegistry::new();
        let secure = Hooks::new("/x");
        let plain = Hooks::new("/x");
        registry.add_service(secure.clone(), SecurityType::Secure, false, None).unwrap();

        let found = registry.get_service("/x", SecurityType::Both, None).unwrap();
        assert!(same_service(&found, &(secure.clone() as ServiceRef)));

        registry.add_service(plain.clone(), SecurityType::NonSecure, false, None).unwrap();
        let found = registry.get_service("/x", SecurityType::Both, None).unwrap();
        assert!(same_service(&found, &(plain as ServiceRef)));
    }

    #[test]
    fn duplicate_rolls_back_every_domain() {
        let registry = ServiceRegistry::with_default_domains(vec!["a".into(), "b".into(), "c".into()]);
        let existing = Hooks::new("/svc");
        registry
            .add_service(existing, SecurityType::NonSecure, false, Some("c"))
            .unwrap();
        let before = registry.entries();
        let routes_before = registry.routes().len();

        let newcomer = Hooks::new("/svc");
        let err = registry
            .add_service(newcomer.clone(), SecurityType::Both, true, None)
            .unwrap_err();

        match err {
            Error::AddServiceFailure { source, .. } => {
                assert!(matches!(*source, Error::DuplicateService { ref domain, .. } if domain == "c"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.entries(), before);
        assert_eq!(registry.routes().len(), routes_before);
        assert_eq!(newcomer.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn both_requires_both_sides_free() {
        let registry = ServiceRegistry::new();
        registry.add_service(Hooks::new("/p"), SecurityType::Secure, false, None).unwrap();
        assert!(registry.add_service(Hooks::new("/p"), SecurityType::Both, false, None).is_err());
        assert!(registry.add_service(Hooks::new("/p"), SecurityType::NonSecure, false, None).is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn failed_init_registers_nothing() {
        let registry = ServiceRegistry::new();
        let hooks = Arc::new(Hooks {
            path: "/bad".into(),
            fail_init: true,
            ..Default::default()
        });
        let err = registry
            .add_service(hooks.clone(), SecurityType::Both, true, None)
            .unwrap_err();
        assert!(matches!(err, Error::AddServiceFailure { .. }));
        assert!(registry.is_empty());
        assert!(registry.routes().is_empty());
        assert_eq!(hooks.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_runs_once_per_instance() {
        let registry = ServiceRegistry::with_default_domains(vec!["one".into(), "two".into()]);
        let hooks = Hooks::new("/shared");
        registry.add_service(hooks.clone(), SecurityType::Both, false, None).unwrap();
        assert_eq!(registry.len(), 4);

        assert_eq!(registry.remove_service("/shared", SecurityType::Both, true, None), 1);
        assert_eq!(hooks.cleanups.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(registry.routes().is_empty());
    }

    #[test]
    fn default_domains_are_deduplicated_and_lowercased() {
        let registry = ServiceRegistry::new();
        registry.set_default_domains(vec!["API.local".into(), "api.local".into()]);
        assert_eq!(registry.default_domains(), vec!["api.local", "api.local"]);
        registry.add_service(Hooks::new("/d"), SecurityType::NonSecure, false, None).unwrap();
        assert_eq!(registry.domains(), vec!["api.local"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_skips_cleanup() {
        let registry = ServiceRegistry::new();
        let hooks = Hooks::new("/c");
        registry.add_service(hooks.clone(), SecurityType::Both, false, None).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.routes().is_empty());
        assert_eq!(hooks.cleanups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registrations_feed_the_routing_table() {
        let registry = ServiceRegistry::new();
        registry.add_service(Hooks::new("/r"), SecurityType::Secure, false, None).unwrap();
        let routes = registry.routes();
        assert!(routes.find(Some("any.host"), "/r/x", true).is_some());
        assert!(routes.find(Some("any.host"), "/r/x", false).is_none());
    }
}
