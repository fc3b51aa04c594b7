//! The handler contract the registry stores.

use std::fmt;
use std::sync::Arc;

use crate::dispatch::Exchange;
use crate::error::Result;

/// A request handler mounted at a path.
///
/// One instance may be registered under several domains and security
/// types; `cleanup` still runs once per removal call.
pub trait WebService: Send + Sync {
    /// Mount point, e.g. `/api/orders`.
    fn path(&self) -> &str;

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn cleanup(&self) {}

    /// Answer one request. Returning `Err` before a response was sent
    /// produces a structured error response.
    fn service(&self, exchange: &mut Exchange<'_>) -> Result<()>;
}

/// Shared handle to a registered service.
pub type ServiceRef = Arc<dyn WebService>;

/// Identity comparison for shared services.
///
/// Compares data pointers only; vtable pointers of the same type may differ
/// between codegen units.
pub fn same_service(a: &ServiceRef, b: &ServiceRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Closure-backed service for small handlers.
pub struct FnService<F> {
    path: String,
    handler: F,
}

impl<F> FnService<F>
where
    F: Fn(&mut Exchange<'_>) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(path: impl Into<String>, handler: F) -> Self {
        Self {
            path: path.into(),
            handler,
        }
    }

    /// Build and wrap in a `ServiceRef`.
    pub fn shared(path: impl Into<String>, handler: F) -> ServiceRef {
        Arc::new(Self::new(path, handler))
    }
}

impl<F> WebService for FnService<F>
where
    F: Fn(&mut Exchange<'_>) -> Result<()> + Send + Sync + 'static,
{
    fn path(&self) -> &str {
        &self.path
    }

    fn service(&self, exchange: &mut Exchange<'_>) -> Result<()> {
        (self.handler)(exchange)
    }
}

impl<F> fmt::Debug for FnService<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnService").field("path", &self.path).finish()
    }
}
