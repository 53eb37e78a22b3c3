//! The [`Handler`] trait invoked by the subscription worker for every delivery.

use std::future::Future;

use async_trait::async_trait;
use lapin::message::Delivery;
use tokio_util::sync::CancellationToken;

/// Consumes a single delivery.
///
/// Invoked with the supervisor's cancellation token so cancellation
/// propagates into an in-flight handler invocation, though the supervisor
/// never interrupts it: it only lets the handler observe that shutdown has
/// begun.
///
/// The return value is reserved for future use and currently discarded,
/// mirroring the source, where the handler's result type is untyped and the
/// value is never inspected.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles one delivery.
    async fn handle(&self, ctx: CancellationToken, delivery: Delivery);
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(CancellationToken, Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, ctx: CancellationToken, delivery: Delivery) {
        (self)(ctx, delivery).await;
    }
}
