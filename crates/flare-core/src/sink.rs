use flare_types::events::{Audience, GatewayEvent};

/// Seam between confirmed state transitions and the real-time channel.
///
/// `publish` is synchronous and fire-and-forget: the engine calls it
/// after the durable write and before releasing the per-target lock, so
/// events for one target go out in write order. Delivery past this point
/// is best-effort — a missing or lagging subscriber is dropped silently.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: GatewayEvent, audience: Audience);
}
