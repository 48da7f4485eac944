//! Client push seam.
//!
//! UDP fan-out to subscribed clients lives outside the core; the registry
//! and the beat-check task only need to announce that a service changed.

pub trait ServicePush: Send + Sync {
    fn service_changed(
        &self,
        namespace_id: &str,
        service_name: &str,
    );
}

/// Default when the embedding application has no push channel.
pub struct NoopPush;

impl ServicePush for NoopPush {
    fn service_changed(
        &self,
        _namespace_id: &str,
        _service_name: &str,
    ) {
    }
}
