use crate::endpoint::{Endpoint, Transport};
use crate::error::Result;
use crate::token::CancelToken;

/// Options qualifying an endpoint resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// The service name or port, if not part of the name itself.
    pub service: Option<String>,
    /// Restricts results to one transport.
    pub transport: Option<Transport>,
    /// Token usable to cancel the resolution.
    pub token: Option<CancelToken>,
}

/// Completion of an endpoint resolution.
pub type ResolveCallback = Box<dyn FnOnce(Result<Endpoint>) + Send>;

/// An asynchronous name resolver injected into the stream engine.
///
/// Name resolution itself is outside this crate; bind and connect by name
/// delegate here and propagate resolution failures as the operation's
/// failure.
pub trait Resolver: Send + Sync {
    /// Resolves `name` to an endpoint and invokes `callback` with the
    /// result.
    fn resolve_endpoint(&self, name: &str, options: &ResolveOptions, callback: ResolveCallback);

    /// Requests cancellation of a pending resolution. A resolution whose
    /// callback already ran is unaffected.
    fn cancel(&self, token: CancelToken) {
        let _ = token;
    }
}
