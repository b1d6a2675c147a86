//! AMQP 0-9-1 transport over lapin.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info};

use super::{Broker, BrokerConnector, BrokerError};
use crate::topology::BrokerEndpoint;

/// One AMQP connection with a confirm-mode channel.
pub struct AmqpBroker {
    alias: String,
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    /// Connect and open a channel with publisher confirms enabled. The
    /// handshake is abandoned after `timeout`.
    pub async fn connect(endpoint: &BrokerEndpoint, timeout: Duration) -> Result<Self, BrokerError> {
        let connection_error = |e: lapin::Error| BrokerError::Connection {
            alias: endpoint.alias.clone(),
            reason: e.to_string(),
        };

        let connect = Connection::connect(
            &endpoint.url,
            ConnectionProperties::default()
                .with_connection_name(endpoint.connection_name.clone().into()),
        );
        let connection = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| BrokerError::Timeout {
                alias: endpoint.alias.clone(),
                after_ms: timeout.as_millis() as u64,
            })?
            .map_err(connection_error)?;

        let channel = connection.create_channel().await.map_err(connection_error)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(connection_error)?;

        info!(
            alias = %endpoint.alias,
            url = %endpoint.redacted_url(),
            "Connected to AMQP broker"
        );

        Ok(Self {
            alias: endpoint.alias.clone(),
            connection,
            channel,
        })
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn ensure_queue(&self, queue: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Declare {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        debug!(alias = %self.alias, queue = %queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let publish_error = |e: lapin::Error| BrokerError::Publish {
            queue: queue.to_string(),
            reason: e.to_string(),
        };

        let confirm = self
            .channel
            .basic_publish(
                "",    // Default exchange
                queue, // Routing key = queue name
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(publish_error)?;

        match confirm.await.map_err(publish_error)? {
            Confirmation::Nack(_) => Err(BrokerError::Nacked(queue.to_string())),
            _ => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// Connector for `amqp://` and `amqps://` endpoints.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    connect_timeout: Duration,
}

impl AmqpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for AmqpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Broker>, BrokerError> {
        Ok(Arc::new(
            AmqpBroker::connect(endpoint, self.connect_timeout).await?,
        ))
    }
}
