//! Service runtime library: protocol sniffing, HTTP message transport and
//! domain-aware service registration.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod message;
pub mod net;
pub mod observability;
pub mod presentation;
pub mod registry;
pub mod value;

pub use config::RuntimeConfig;
pub use dispatch::{ConnectionServicer, Exchange};
pub use error::{Error, RemoteError, Result};
pub use crate::http::HttpServer;
pub use lifecycle::Shutdown;
pub use message::Message;
pub use presentation::PresentationChain;
pub use registry::{FnService, SecurityType, ServiceRegistry, WebService};
pub use value::Value;
