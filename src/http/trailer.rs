//! Chunked-transfer trailer handle.
//!
//! The sender keeps a clone while the body streams and may add fields until
//! the final chunk is written. The receiver gets the fields parsed after the
//! final chunk.

use std::sync::Arc;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct TrailerState {
    fields: HeaderMap,
    finalized: bool,
    content_length: Option<u64>,
}

/// Shared trailer fields. Cloning yields another handle to the same trailer.
#[derive(Debug, Clone, Default)]
pub struct Trailer {
    inner: Arc<Mutex<TrailerState>>,
}

impl Trailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. Fails once the trailer has been written.
    pub fn set_field(&self, name: &str, value: impl AsRef<str>) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::bad_header(format!("invalid trailer name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value.as_ref())
            .map_err(|e| Error::bad_header(format!("invalid trailer value: {}", e)))?;

        let mut state = self.inner.lock();
        if state.finalized {
            return Err(Error::TrailerFinalized);
        }
        state.fields.insert(name, value);
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .fields
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Snapshot of all fields.
    pub fn fields(&self) -> HeaderMap {
        self.inner.lock().fields.clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.lock().finalized
    }

    /// Decoded body length on the receiving side, known once the last chunk arrived.
    pub fn content_length(&self) -> Option<u64> {
        self.inner.lock().content_length
    }

    /// Freeze the trailer and hand back the fields to write.
    pub(crate) fn finalize(&self) -> HeaderMap {
        let mut state = self.inner.lock();
        state.finalized = true;
        state.fields.clone()
    }

    /// Record what the chunked reader parsed after the last chunk.
    pub(crate) fn set_received(&self, fields: HeaderMap, content_length: u64) {
        let mut state = self.inner.lock();
        state.fields.extend(fields);
        state.content_length = Some(content_length);
        state.finalized = true;
    }
}
