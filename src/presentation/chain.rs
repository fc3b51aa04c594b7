//! Ordered, lock-protected list of presentation wrappers.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::net::Socket;
use crate::presentation::wrapper::{NullWrapper, Presented, PresentationWrapper, WrapOutcome};

/// Tries each wrapper in insertion order; the Null wrapper guarantees a result.
///
/// Built at startup, appended to rarely, read for every accepted connection.
#[derive(Default)]
pub struct PresentationChain {
    wrappers: RwLock<Vec<Arc<dyn PresentationWrapper>>>,
    fallback: NullWrapper,
}

impl PresentationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a wrapper (exclusive lock).
    pub fn add(&self, wrapper: Arc<dyn PresentationWrapper>) {
        tracing::info!(wrapper = wrapper.name(), "Presentation wrapper added");
        self.wrappers.write().push(wrapper);
    }

    pub fn len(&self) -> usize {
        self.wrappers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classify and decorate an accepted connection.
    ///
    /// The shared lock is held while wrappers run, so `add` waits for
    /// in-progress detections.
    pub fn create_wrapper(&self, socket: Box<dyn Socket>) -> Presented {
        let mut socket = socket;
        {
            let wrappers = self.wrappers.read();
            for wrapper in wrappers.iter() {
                match wrapper.wrap(socket) {
                    WrapOutcome::Accepted(presented) => {
                        crate::observability::metrics::record_presentation(presented.wrapper, presented.secure);
                        return presented;
                    }
                    WrapOutcome::Declined(returned) => socket = returned,
                }
            }
        }

        let presented = self.fallback.present(socket);
        crate::observability::metrics::record_presentation(presented.wrapper, presented.secure);
        presented
    }
}

impl std::fmt::Debug for PresentationChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self.wrappers.read().iter().map(|w| w.name()).collect();
        f.debug_struct("PresentationChain").field("wrappers", &names).finish()
    }
}
