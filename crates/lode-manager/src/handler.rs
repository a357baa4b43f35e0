//! Request dispatch for the manager side of a connection.
//!
//! [`ProtocolHandler::handle_message`] is a pure message-in, message-out
//! function so the whole method surface can be tested without a socket;
//! [`ProtocolHandler::serve`] wires it to a live session, starting with the
//! handshake that announces this manager's catalog.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use lode_rpc::{Message, MessageType, Session, SessionError};

use crate::error::ManagerError;
use crate::instances::InstanceManager;

pub struct ProtocolHandler {
    manager_id: String,
    instances: Arc<InstanceManager>,
}

impl ProtocolHandler {
    #[must_use]
    pub fn new(manager_id: impl Into<String>, instances: Arc<InstanceManager>) -> Self {
        Self {
            manager_id: manager_id.into(),
            instances,
        }
    }

    #[must_use]
    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    /// The one-shot frame sent to a peer right after connecting.
    #[must_use]
    pub fn handshake_message(&self) -> Message {
        let registry = self.instances.registry();
        Message::handshake(json!({
            "manager_id": self.manager_id,
            "driver_count": registry.len(),
            "drivers": registry.catalog(),
        }))
    }

    /// Serve one connection until it closes: announce the catalog, then
    /// answer every inbound request and ping.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake cannot be written or the session's
    /// inbound queue was already claimed.
    pub async fn serve(&self, session: &Session) -> Result<(), SessionError> {
        session.send(self.handshake_message()).await?;

        let Some(mut inbound) = session.take_inbound() else {
            return Err(SessionError::Disconnected);
        };

        let closed = session.closed();
        loop {
            let msg = tokio::select! {
                () = closed.cancelled() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            if let Some(reply) = self.handle_message(msg).await {
                if let Err(e) = session.send(reply).await {
                    warn!("Failed to send reply: {}", e);
                    break;
                }
            }
        }
        debug!("Connection to host closed");
        Ok(())
    }

    /// Answer one inbound frame. Pings get pongs, requests get responses,
    /// anything else is dropped.
    pub async fn handle_message(&self, msg: Message) -> Option<Message> {
        match msg.message_type {
            MessageType::Ping => Some(Message::response(msg.id, json!("pong"))),
            MessageType::Request => {
                let method = msg.method.clone().unwrap_or_default();
                let params = msg.params.unwrap_or_default();
                let reply = match self.dispatch(&method, &params).await {
                    Ok(result) => Message::response(msg.id, result),
                    Err(e) => {
                        debug!("Request {} failed: {}", method, e);
                        Message::error_response(msg.id, e.to_error_info())
                    }
                };
                Some(reply)
            }
            MessageType::Handshake | MessageType::Response => None,
        }
    }

    async fn dispatch(&self, method: &str, params: &Map<String, Value>) -> Result<Value, ManagerError> {
        match method {
            "list_drivers" => Ok(Value::Object(self.instances.registry().catalog())),
            "get_driver_info" => {
                let name = str_param(params, "driver")?;
                self.instances
                    .registry()
                    .get(name)
                    .map(lode_driver::DriverEntry::descriptor)
                    .ok_or_else(|| ManagerError::UnknownDriver(name.to_string()))
            }
            "create_instance" => {
                let instance_id = str_param(params, "instance_id")?;
                let driver = str_param(params, "driver")?;
                let config = match params.get("config") {
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => {
                        return Err(ManagerError::BadParams(
                            "config must be an object".to_string(),
                        ));
                    }
                    None => Map::new(),
                };
                self.instances.create(instance_id, driver, &config).await?;
                Ok(json!("success"))
            }
            "remove_instance" => {
                let instance_id = str_param(params, "instance_id")?;
                self.instances.remove(instance_id).await?;
                Ok(json!("success"))
            }
            "list_instances" => Ok(Value::Array(self.instances.list().await)),
            "enable_instance" => {
                let instance_id = str_param(params, "instance_id")?;
                self.instances.set_enabled(instance_id, true).await?;
                Ok(json!("success"))
            }
            "disable_instance" => {
                let instance_id = str_param(params, "instance_id")?;
                self.instances.set_enabled(instance_id, false).await?;
                Ok(json!("success"))
            }
            "execute_operation" => {
                let instance_id = str_param(params, "instance_id")?;
                let operation = str_param(params, "operation")?;
                let op_params = match params.get("params") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                self.instances.execute(instance_id, operation, &op_params).await
            }
            _ => Err(ManagerError::BadParams(format!("unknown method: {method}"))),
        }
    }
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str, ManagerError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ManagerError::BadParams(format!("{key} parameter is required")))
}
