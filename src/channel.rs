//! Channel-level abstractions: the arguments a consumption is started with,
//! the events a running consumption can produce, and the trait boundary
//! between the supervisor/worker and the underlying AMQP library.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicCancelOptions, BasicConsumeOptions};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{Channel, Consumer};

/// A boxed error, used at the abstract channel boundary so it doesn't need
/// to carry `lapin::Error` specifically (which isn't `Clone` and shouldn't
/// leak into code that only needs to format or log it).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Arguments a consumption is started with.
///
/// Mirrors `lapin::Channel::basic_consume`'s parameter list one for one;
/// built with a `kanin::HandlerConfig`-style `with_*` builder rather than a
/// bare tuple so call sites stay readable.
#[derive(Clone, Debug, Default)]
pub struct ConsumeArgs {
    pub(crate) consumer_tag: String,
    pub(crate) auto_ack: bool,
    pub(crate) exclusive: bool,
    pub(crate) no_local: bool,
    pub(crate) no_wait: bool,
    pub(crate) arguments: FieldTable,
}

impl ConsumeArgs {
    /// Creates a new default set of consume arguments: blank consumer tag
    /// (the broker assigns one), everything else `false`, empty table.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the consumer tag. Blank means "broker assigns one".
    pub fn with_consumer_tag(mut self, consumer_tag: impl Into<String>) -> Self {
        self.consumer_tag = consumer_tag.into();
        self
    }

    /// Sets whether deliveries are automatically acknowledged by the broker.
    pub fn with_auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    /// Sets whether this is the only consumer allowed on the queue.
    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Sets the `no-local` flag (the server will not deliver messages published on this channel's connection).
    pub fn with_no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    /// Sets whether the broker should skip waiting for a consume-ok reply.
    pub fn with_no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    /// Sets an extra argument on the consume call.
    pub fn with_arg(mut self, arg: impl Into<ShortString>, value: impl Into<AMQPValue>) -> Self {
        self.arguments.insert(arg.into(), value.into());
        self
    }

    fn options(&self) -> BasicConsumeOptions {
        BasicConsumeOptions {
            no_local: self.no_local,
            no_ack: self.auto_ack,
            exclusive: self.exclusive,
            nowait: self.no_wait,
        }
    }
}

/// The three things a running consumption can yield, conflating `lapin`'s
/// `Consumer` stream items (`Some(Ok(delivery))` / `Some(Err(..))`) with
/// stream termination (`None`, which `lapin` uses for a broker-initiated
/// cancel) into the three outcomes the worker's dispatch loop cares about.
pub enum ConsumeEvent {
    /// The next delivery from the queue.
    Delivery(Delivery),
    /// The channel (or underlying connection) was closed, with a formatted reason.
    Closed(String),
    /// The broker canceled this consumption.
    Canceled,
}

/// A running consumption: something that can be polled for its next event.
#[async_trait]
pub trait DeliveryConsumer: Send {
    /// Waits for the next event on this consumption.
    async fn next_event(&mut self) -> ConsumeEvent;
}

/// The capability set the worker needs from a channel: start a consumption,
/// and release the channel when done.
#[async_trait]
pub trait AmqpChannel: Send + Sync + 'static {
    /// The consumption type this channel produces.
    type Consumer: DeliveryConsumer;

    /// Starts consuming from `queue` with the given arguments.
    async fn consume(&self, queue: &str, args: &ConsumeArgs) -> Result<Self::Consumer, BoxError>;

    /// Releases the channel. Idempotent: an "already closed" error is
    /// treated as success by implementations, matching the source's
    /// contract for `Close`.
    async fn close(&self) -> Result<(), BoxError>;
}

/// The default, `lapin`-backed implementation of [`AmqpChannel`].
pub struct LapinChannel {
    channel: Channel,
}

impl LapinChannel {
    /// Wraps an already-opened `lapin` channel.
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    type Consumer = LapinConsumer;

    async fn consume(&self, queue: &str, args: &ConsumeArgs) -> Result<Self::Consumer, BoxError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &args.consumer_tag,
                args.options(),
                args.arguments.clone(),
            )
            .await?;
        Ok(LapinConsumer {
            channel: self.channel.clone(),
            consumer_tag: consumer.tag().to_string(),
            consumer,
        })
    }

    async fn close(&self) -> Result<(), BoxError> {
        match self.channel.close(200, "consumer closed").await {
            Ok(()) => Ok(()),
            // Closing an already-closed channel is not a real failure.
            Err(lapin::Error::InvalidChannelState(_)) => Ok(()),
            Err(e) => Err(Box::new(e)),
        }
    }
}

/// The default, `lapin`-backed implementation of [`DeliveryConsumer`].
pub struct LapinConsumer {
    channel: Channel,
    consumer_tag: String,
    consumer: Consumer,
}

#[async_trait]
impl DeliveryConsumer for LapinConsumer {
    async fn next_event(&mut self) -> ConsumeEvent {
        match self.consumer.next().await {
            Some(Ok(delivery)) => ConsumeEvent::Delivery(delivery),
            Some(Err(e)) => ConsumeEvent::Closed(e.to_string()),
            None => {
                let _ = self
                    .channel
                    .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
                    .await;
                ConsumeEvent::Canceled
            }
        }
    }
}
