//! Connection-level abstractions: a connection handle, the capability to
//! open channels from one, and the pluggable "init function" that turns a
//! connection into a ready-to-consume channel.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use lapin::Connection;
use tokio::sync::oneshot;

use crate::channel::{AmqpChannel, BoxError, LapinChannel};
use crate::error::ConsumerError;

/// A connection handed to the supervisor by the connection supplier.
///
/// `close_signal` becomes readable (or is dropped/closed) when the
/// underlying broker connection is lost; `close_signal: None` is legal and
/// means this handle never signals closure locally, matching the source's
/// `nil` channel case.
pub struct ConnectionHandle<C> {
    /// The connection itself.
    pub connection: C,
    /// Fires when the connection is lost. `None` if this handle never
    /// signals closure locally.
    pub close_signal: Option<oneshot::Receiver<()>>,
}

impl<C> ConnectionHandle<C> {
    /// Creates a handle with no local close signal.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            close_signal: None,
        }
    }

    /// Creates a handle that signals closure locally via `close_signal`.
    pub fn with_close_signal(connection: C, close_signal: oneshot::Receiver<()>) -> Self {
        Self {
            connection,
            close_signal: Some(close_signal),
        }
    }
}

/// The capability to produce a channel from a connection.
///
/// `Clone` is required because the supervisor keeps the connection around
/// across an entire `RUNNING` episode and may need to hand it to `init`
/// again on the channel-closed fast-path without consuming the original
/// handle.
#[async_trait]
pub trait AmqpConnection: Clone + Send + Sync + 'static {
    /// The channel type this connection produces.
    type Channel: AmqpChannel;

    /// Opens a fresh channel on this connection.
    async fn create_channel(&self) -> Result<Self::Channel, BoxError>;
}

/// The default, `lapin`-backed implementation of [`AmqpConnection`].
#[derive(Clone)]
pub struct LapinConnection {
    connection: Arc<Connection>,
}

impl LapinConnection {
    /// Wraps an already-established `lapin` connection.
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Arc::new(connection),
        }
    }
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    type Channel = LapinChannel;

    async fn create_channel(&self) -> Result<Self::Channel, BoxError> {
        let channel = self.connection.create_channel().await?;
        Ok(LapinChannel::new(channel))
    }
}

/// The pluggable step that turns a connection into a ready-to-consume
/// channel; the natural place to declare queues and bindings atomically
/// with channel creation. The default just opens a fresh channel.
pub type InitFn<C> =
    Arc<dyn Fn(C) -> BoxFuture<'static, Result<<C as AmqpConnection>::Channel, ConsumerError>> + Send + Sync>;

/// The default init function: opens a fresh channel from the connection.
pub fn default_init<C: AmqpConnection>() -> InitFn<C> {
    Arc::new(|conn: C| {
        Box::pin(async move {
            conn.create_channel()
                .await
                .map_err(|e| ConsumerError::Init(e.to_string()))
        })
    })
}
