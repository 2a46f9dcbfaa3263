//! Inbound command channel.
//!
//! Controllers push sealed `CommandRequest` payloads over MQTT; the agent
//! opens them, executes, and publishes the sealed `CommandResult` back on
//! the node's result topic. A payload that fails authentication is dropped
//! and logged, never executed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tracing::{debug, error, info, warn};

use crate::config::CommandChannelConfig;
use crate::crypto::{CipherChannel, CryptoError};
use crate::execution::{CommandExecutor, CommandRequest};
use crate::identity::NodeIdentity;

/// Wait before re-polling a broken broker connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// MQTT command/response channel for one node.
pub struct CommandChannel {
    config: CommandChannelConfig,
    identity: Arc<NodeIdentity>,
    cipher: Arc<CipherChannel>,
    executor: CommandExecutor,
    default_timeout: Duration,
}

impl CommandChannel {
    pub fn new(
        config: CommandChannelConfig,
        identity: Arc<NodeIdentity>,
        cipher: Arc<CipherChannel>,
        executor: CommandExecutor,
        default_timeout: Duration,
    ) -> Self {
        Self { config, identity, cipher, executor, default_timeout }
    }

    fn command_topic(&self) -> String {
        format!("monica/nodes/command@v1/{}", self.identity.node_id)
    }

    fn result_topic(&self) -> String {
        format!("monica/nodes/result@v1/{}", self.identity.node_id)
    }

    /// Connect, subscribe, and dispatch inbound commands until shutdown.
    pub async fn run(&self) -> Result<()> {
        let client_id = format!("monica-node-{}", self.identity.node_id);
        let mut options = MqttOptions::new(
            &client_id,
            &self.config.broker_host,
            self.config.broker_port,
        );
        options.set_keep_alive(Duration::from_secs(u64::from(self.config.keep_alive_secs)));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        client
            .subscribe(self.command_topic(), QoS::AtLeastOnce)
            .await
            .context("Failed to subscribe to command topic")?;
        info!("Command channel listening on {}", self.command_topic());

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.dispatch(&client, publish.payload.to_vec());
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// Run one inbound payload on its own task so a slow or hung command
    /// never delays heartbeats or later commands.
    fn dispatch(&self, client: &AsyncClient, payload: Vec<u8>) {
        let cipher = Arc::clone(&self.cipher);
        let executor = self.executor;
        let client = client.clone();
        let result_topic = self.result_topic();
        let default_timeout = self.default_timeout;

        tokio::spawn(async move {
            match process(&cipher, &executor, &payload, default_timeout).await {
                Ok(sealed) => {
                    if let Err(e) = client
                        .publish(result_topic, QoS::AtLeastOnce, false, sealed)
                        .await
                    {
                        warn!("Failed to publish command result: {}", e);
                    }
                }
                Err(CryptoError::Authentication) => {
                    warn!("Rejected command payload: authentication failed");
                }
                Err(e) => {
                    warn!("Rejected command payload: {}", e);
                }
            }
        });
    }
}

/// Open, execute, and seal one command exchange. Decrypt failure aborts
/// before anything runs.
async fn process(
    cipher: &CipherChannel,
    executor: &CommandExecutor,
    payload: &[u8],
    default_timeout: Duration,
) -> Result<Vec<u8>, CryptoError> {
    let request: CommandRequest = cipher.open(payload)?;
    let timeout = request
        .timeout_seconds
        .map(Duration::from_secs)
        .unwrap_or(default_timeout);

    debug!("Executing controller command: {}", request.command);
    let result = executor.execute(&request.command, timeout).await;
    cipher.seal(&result)
}
