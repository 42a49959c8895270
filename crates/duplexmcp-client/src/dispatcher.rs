//! Client-side dispatch of server-initiated traffic.
//!
//! Every active stream (POST-SSE or the GET notification stream) can carry
//! requests from the server: sampling, roots listing, elicitation, and
//! ping. The dispatcher routes them to the registered application handlers
//! and produces the correlated response the client POSTs back.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use duplexmcp_protocol::types::{
    CreateMessageRequest, CreateMessageResult, ElicitRequest, ElicitResult, EmptyResult,
    ListRootsResult, Root,
};
use duplexmcp_protocol::{
    error_codes, methods, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};

use crate::error::ClientResult;

/// Application handler for `sampling/createMessage`.
#[async_trait]
pub trait SamplingHandler: Send + Sync + 'static {
    /// Run the requested inference and return the completion.
    async fn create_message(&self, request: CreateMessageRequest)
        -> ClientResult<CreateMessageResult>;
}

/// Application handler for `elicitation/create`.
#[async_trait]
pub trait ElicitationHandler: Send + Sync + 'static {
    /// Ask the user and report their decision.
    async fn elicit(&self, request: ElicitRequest) -> ClientResult<ElicitResult>;
}

/// Callback invoked for every server notification.
pub type NotificationCallback = Box<dyn Fn(JsonRpcNotification) + Send + Sync>;

/// Routes server-initiated messages to application handlers.
#[derive(Default)]
pub struct ClientDispatcher {
    sampling: Option<Box<dyn SamplingHandler>>,
    elicitation: Option<Box<dyn ElicitationHandler>>,
    roots: RwLock<Vec<Root>>,
    on_notification: Option<NotificationCallback>,
}

impl std::fmt::Debug for ClientDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDispatcher")
            .field("sampling", &self.sampling.is_some())
            .field("elicitation", &self.elicitation.is_some())
            .field("roots", &self.roots.read().len())
            .finish()
    }
}

impl ClientDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the sampling handler.
    pub fn set_sampling(&mut self, handler: Box<dyn SamplingHandler>) {
        self.sampling = Some(handler);
    }

    /// Install the elicitation handler.
    pub fn set_elicitation(&mut self, handler: Box<dyn ElicitationHandler>) {
        self.elicitation = Some(handler);
    }

    /// Replace the advertised filesystem roots.
    pub fn set_roots(&self, roots: Vec<Root>) {
        *self.roots.write() = roots;
    }

    /// Install the notification callback.
    pub fn set_notification_callback(&mut self, callback: NotificationCallback) {
        self.on_notification = Some(callback);
    }

    /// Whether a sampling handler is installed.
    pub fn has_sampling(&self) -> bool {
        self.sampling.is_some()
    }

    /// Whether an elicitation handler is installed.
    pub fn has_elicitation(&self) -> bool {
        self.elicitation.is_some()
    }

    /// Whether roots are configured.
    pub fn has_roots(&self) -> bool {
        !self.roots.read().is_empty()
    }

    /// Handle a server-initiated request and produce its response.
    pub async fn dispatch_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        debug!(method = %request.method, %id, "server-initiated request");
        let result: Result<Value, JsonRpcError> = match request.method.as_str() {
            methods::SAMPLING_CREATE_MESSAGE => match &self.sampling {
                Some(handler) => self
                    .run_sampling(handler.as_ref(), &request)
                    .await
                    .map_err(into_wire_error),
                None => Err(method_not_found(&request.method)),
            },
            methods::ELICITATION_CREATE => match &self.elicitation {
                Some(handler) => self
                    .run_elicitation(handler.as_ref(), &request)
                    .await
                    .map_err(into_wire_error),
                None => Err(method_not_found(&request.method)),
            },
            methods::ROOTS_LIST => serde_json::to_value(ListRootsResult {
                roots: self.roots.read().clone(),
            })
            .map_err(|e| JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string())),
            methods::PING => serde_json::to_value(EmptyResult::default())
                .map_err(|e| JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string())),
            other => Err(method_not_found(other)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(value, id),
            Err(error) => JsonRpcResponse::error(error, id),
        }
    }

    /// Hand a server notification to the application callback.
    pub fn dispatch_notification(&self, notification: JsonRpcNotification) {
        debug!(method = %notification.method, "server notification");
        if let Some(callback) = &self.on_notification {
            callback(notification);
        }
    }

    async fn run_sampling(
        &self,
        handler: &dyn SamplingHandler,
        request: &JsonRpcRequest,
    ) -> ClientResult<Value> {
        let params: CreateMessageRequest = request
            .params_as()
            .map_err(duplexmcp_protocol::Error::Serialization)?;
        let result = handler.create_message(params).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn run_elicitation(
        &self,
        handler: &dyn ElicitationHandler,
        request: &JsonRpcRequest,
    ) -> ClientResult<Value> {
        let params: ElicitRequest = request
            .params_as()
            .map_err(duplexmcp_protocol::Error::Serialization)?;
        let result = handler.elicit(params).await?;
        Ok(serde_json::to_value(result)?)
    }
}

fn method_not_found(method: &str) -> JsonRpcError {
    JsonRpcError::new(
        error_codes::METHOD_NOT_FOUND,
        format!("Method not found: {method}"),
    )
}

fn into_wire_error(error: crate::error::ClientError) -> JsonRpcError {
    JsonRpcError::new(error_codes::INTERNAL_ERROR, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplexmcp_protocol::types::{ContentBlock, Role};
    use duplexmcp_protocol::MessageId;
    use serde_json::json;

    struct EchoSampling;

    #[async_trait]
    impl SamplingHandler for EchoSampling {
        async fn create_message(
            &self,
            _request: CreateMessageRequest,
        ) -> ClientResult<CreateMessageResult> {
            Ok(CreateMessageResult {
                model: "echo-1".into(),
                role: Role::Assistant,
                content: ContentBlock::text("echoed"),
                stop_reason: None,
            })
        }
    }

    #[tokio::test]
    async fn test_sampling_dispatch() {
        let mut dispatcher = ClientDispatcher::new();
        dispatcher.set_sampling(Box::new(EchoSampling));

        let request = JsonRpcRequest::new(
            "sampling/createMessage",
            Some(json!({"messages": []})),
            MessageId::String("s-1".into()),
        );
        let response = dispatcher.dispatch_request(request).await;
        assert!(response.is_success());
        assert_eq!(response.result().unwrap()["model"], "echo-1");
        assert_eq!(
            response.message_id(),
            Some(&MessageId::String("s-1".into()))
        );
    }

    #[tokio::test]
    async fn test_sampling_without_handler_is_method_not_found() {
        let dispatcher = ClientDispatcher::new();
        let request = JsonRpcRequest::new(
            "sampling/createMessage",
            Some(json!({"messages": []})),
            MessageId::String("s-2".into()),
        );
        let response = dispatcher.dispatch_request(request).await;
        assert_eq!(response.rpc_error().unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_roots_list() {
        let dispatcher = ClientDispatcher::new();
        dispatcher.set_roots(vec![Root::new("file:///workspace").with_name("ws")]);

        let request =
            JsonRpcRequest::new("roots/list", None, MessageId::String("s-3".into()));
        let response = dispatcher.dispatch_request(request).await;
        let roots = response.result().unwrap()["roots"].as_array().unwrap().clone();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["uri"], "file:///workspace");
    }

    #[tokio::test]
    async fn test_server_ping() {
        let dispatcher = ClientDispatcher::new();
        let request = JsonRpcRequest::new("ping", None, MessageId::String("s-4".into()));
        let response = dispatcher.dispatch_request(request).await;
        assert!(response.is_success());
    }
}
