pub mod connection;

pub use connection::{AckMode, ChangeConsumer, ConsumeOptions, ConsumerState, RECONNECT_DELAY};

// Broker consumer: owns the single RabbitMQ connection, walks the
// declare/bind/consume handshake as an explicit state machine and feeds
// deliveries, in arrival order, to the message handler. Unexpected loss of
// the connection re-enters the handshake after a fixed delay.
