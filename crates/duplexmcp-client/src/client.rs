//! The MCP client.
//!
//! Drives the handshake, the typed operations, the POST-SSE read loop
//! (resolving each call on its correlated final response while dispatching
//! intermediate server-initiated traffic), and the resumable GET
//! notification stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use duplexmcp_protocol::codec::parse_result_as;
use duplexmcp_protocol::types::{
    CallToolRequest, CallToolResult, ClientCapabilities, CompleteArgument, CompleteRequest,
    CompleteResult, CompletionReference, EmptyResult, GetPromptRequest, GetPromptResult,
    Implementation, InitializeRequest, InitializeResult, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, LoggingLevel,
    ReadResourceRequest, ReadResourceResult, Root, SetLevelRequest,
};
use duplexmcp_protocol::{
    methods, version, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcResponsePayload, MessageId,
};

use crate::dispatcher::{ClientDispatcher, ElicitationHandler, SamplingHandler};
use crate::error::{ClientError, ClientResult};
use crate::transport::{EventStream, HttpClientConfig, HttpClientTransport, PostOutcome};

/// Builder for a [`Client`].
pub struct ClientBuilder {
    config: HttpClientConfig,
    info: Implementation,
    dispatcher: ClientDispatcher,
    roots: Vec<Root>,
}

impl ClientBuilder {
    /// Start building a client for a server base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: HttpClientConfig::new(base_url),
            info: Implementation::new("duplexmcp-client", env!("CARGO_PKG_VERSION")),
            dispatcher: ClientDispatcher::new(),
            roots: Vec::new(),
        }
    }

    /// Override the transport configuration.
    pub fn config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the client implementation info sent at `initialize`.
    pub fn info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = Implementation::new(name, version);
        self
    }

    /// Install a sampling handler (declares the `sampling` capability).
    pub fn sampling(mut self, handler: impl SamplingHandler) -> Self {
        self.dispatcher.set_sampling(Box::new(handler));
        self
    }

    /// Install an elicitation handler (declares the `elicitation`
    /// capability).
    pub fn elicitation(mut self, handler: impl ElicitationHandler) -> Self {
        self.dispatcher.set_elicitation(Box::new(handler));
        self
    }

    /// Expose filesystem roots (declares the `roots` capability).
    pub fn roots(mut self, roots: Vec<Root>) -> Self {
        self.roots = roots;
        self
    }

    /// Install a callback for server notifications.
    pub fn on_notification(mut self, callback: impl Fn(JsonRpcNotification) + Send + Sync + 'static) -> Self {
        self.dispatcher.set_notification_callback(Box::new(callback));
        self
    }

    /// Build the client.
    pub fn build(self) -> ClientResult<Client> {
        let transport = Arc::new(HttpClientTransport::new(self.config)?);
        self.dispatcher.set_roots(self.roots);
        Ok(Client {
            transport,
            dispatcher: Arc::new(self.dispatcher),
            info: self.info,
            next_id: AtomicI64::new(0),
            initialized: AtomicBool::new(false),
            last_event_id: Arc::new(AtomicU64::new(0)),
            stream_task: Mutex::new(None),
            closed: CancellationToken::new(),
        })
    }
}

/// A streamable HTTP MCP client.
pub struct Client {
    transport: Arc<HttpClientTransport>,
    dispatcher: Arc<ClientDispatcher>,
    info: Implementation,
    next_id: AtomicI64,
    initialized: AtomicBool,
    /// Highest event id seen on the notification stream (0 = none)
    last_event_id: Arc<AtomicU64>,
    stream_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: CancellationToken,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("info", &self.info)
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .finish()
    }
}

impl Client {
    /// Start building a client.
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    /// The session id assigned by the server, once initialized.
    pub fn session_id(&self) -> Option<String> {
        self.transport.session_id()
    }

    /// Capabilities this client declares, derived from its handlers.
    fn capabilities(&self) -> ClientCapabilities {
        let mut capabilities = ClientCapabilities::default();
        if self.dispatcher.has_sampling() {
            capabilities = capabilities.with_sampling();
        }
        if self.dispatcher.has_elicitation() {
            capabilities = capabilities.with_elicitation();
        }
        if self.dispatcher.has_roots() {
            capabilities = capabilities.with_roots(false);
        }
        capabilities
    }

    /// Run the `initialize` handshake and confirm it with
    /// `notifications/initialized`.
    pub async fn initialize(&self) -> ClientResult<InitializeResult> {
        let params = InitializeRequest {
            protocol_version: version::latest().to_string(),
            capabilities: self.capabilities(),
            client_info: self.info.clone(),
        };
        let result = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = parse_result_as(&result)?;

        // Handshake completes with the initialized notification
        let notification = JsonRpcNotification::new(methods::NOTIFICATION_INITIALIZED, None);
        match self
            .transport
            .post(&serde_json::to_value(&notification)?)
            .await?
        {
            PostOutcome::Accepted => {}
            _ => return Err(ClientError::Protocol(duplexmcp_protocol::Error::invalid_request(
                "notification was not acknowledged with 202",
            ))),
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "initialized"
        );
        Ok(result)
    }

    fn allocate_id(&self) -> MessageId {
        MessageId::Number(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn ensure_initialized(&self) -> ClientResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::NotInitialized)
        }
    }

    /// Issue a raw request and return its result payload.
    ///
    /// The response may arrive as a plain JSON body or over a POST-SSE
    /// stream; in the streaming case intermediate server-initiated
    /// requests and notifications are dispatched while waiting for the
    /// event carrying the correlated final response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        let id = self.allocate_id();
        let request = JsonRpcRequest::new(method, params, id.clone());
        let body = serde_json::to_value(&request)?;

        match self.transport.post(&body).await? {
            PostOutcome::Json(value) => {
                let response: JsonRpcResponse = serde_json::from_value(value)?;
                Self::check_id(&response, &id)?;
                Self::unwrap_payload(response)
            }
            PostOutcome::Stream(stream) => {
                let timeout = self.transport.config().streaming_request_timeout;
                match tokio::time::timeout(timeout, self.read_stream_until(stream, &id)).await {
                    Ok(result) => result,
                    Err(_) => Err(ClientError::Timeout(timeout)),
                }
            }
            PostOutcome::Accepted => Err(ClientError::Protocol(
                duplexmcp_protocol::Error::invalid_request("request answered with 202"),
            )),
        }
    }

    /// Fire a notification at the server.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        match self
            .transport
            .post(&serde_json::to_value(&notification)?)
            .await?
        {
            PostOutcome::Accepted => Ok(()),
            _ => Err(ClientError::Protocol(
                duplexmcp_protocol::Error::invalid_request("notification was not acknowledged"),
            )),
        }
    }

    async fn read_stream_until(
        &self,
        mut stream: EventStream,
        id: &MessageId,
    ) -> ClientResult<Value> {
        while let Some(event) = stream.next_event().await? {
            let Ok(message) = serde_json::from_str::<JsonRpcMessage>(&event.data) else {
                debug!(data = %event.data, "skipping undecodable stream event");
                continue;
            };
            match message {
                JsonRpcMessage::Response(response) => {
                    if response.message_id() == Some(id) {
                        return Self::unwrap_payload(response);
                    }
                    debug!("response for a different request on this stream, ignoring");
                }
                JsonRpcMessage::Request(request) => {
                    self.spawn_server_request(request);
                }
                JsonRpcMessage::Notification(notification) => {
                    self.dispatcher.dispatch_notification(notification);
                }
                JsonRpcMessage::Batch(_) => {
                    debug!("ignoring batch frame on stream");
                }
            }
        }
        Err(ClientError::StreamEnded)
    }

    /// Handle a server-initiated request off the read loop: dispatch to
    /// the local handlers and POST the correlated response back.
    fn spawn_server_request(&self, request: JsonRpcRequest) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            let response = dispatcher.dispatch_request(request).await;
            let body = match serde_json::to_value(&response) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "failed to serialize callback response");
                    return;
                }
            };
            match transport.post(&body).await {
                Ok(PostOutcome::Accepted) => {}
                Ok(_) => warn!("callback response not acknowledged with 202"),
                Err(e) => warn!(error = %e, "failed to deliver callback response"),
            }
        });
    }

    /// Open the long-lived notification stream and keep it alive with the
    /// configured reconnect policy. Received server requests and
    /// notifications are dispatched to the registered handlers.
    pub fn subscribe_notifications(&self) {
        let transport = Arc::clone(&self.transport);
        let dispatcher = Arc::clone(&self.dispatcher);
        let last_event_id = Arc::clone(&self.last_event_id);
        let closed = self.closed.clone();
        let retry = transport.config().retry.clone();

        let task = tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if closed.is_cancelled() {
                    break;
                }
                let resume_from = match last_event_id.load(Ordering::SeqCst) {
                    0 => None,
                    n => Some(n),
                };
                let stream = tokio::select! {
                    _ = closed.cancelled() => break,
                    result = transport.open_notification_stream(resume_from) => result,
                };
                match stream {
                    Ok(mut stream) => {
                        attempt = 0;
                        debug!(?resume_from, "notification stream open");
                        loop {
                            let event = tokio::select! {
                                _ = closed.cancelled() => return,
                                event = stream.next_event() => event,
                            };
                            match event {
                                Ok(Some(event)) => {
                                    if let Some(event_id) = event.id {
                                        last_event_id.store(event_id, Ordering::SeqCst);
                                    }
                                    handle_stream_event(&transport, &dispatcher, event);
                                }
                                Ok(None) => {
                                    debug!("notification stream ended");
                                    break;
                                }
                                Err(e) => {
                                    warn!(error = %e, "notification stream error");
                                    break;
                                }
                            }
                        }
                    }
                    Err(ClientError::SessionNotFound) => {
                        warn!("session lost; notification stream stopped");
                        break;
                    }
                    Err(e) => debug!(error = %e, "notification stream connect failed"),
                }

                let Some(delay) = retry.delay(attempt) else {
                    warn!("giving up on the notification stream");
                    break;
                };
                attempt = attempt.saturating_add(1);
                tokio::select! {
                    _ = closed.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });

        if let Some(previous) = self.stream_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Close the client: stop the notification stream and terminate the
    /// session server-side.
    pub async fn close(&self) -> ClientResult<()> {
        self.closed.cancel();
        if let Some(task) = self.stream_task.lock().take() {
            task.abort();
        }
        self.transport.delete_session().await?;
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn check_id(response: &JsonRpcResponse, expected: &MessageId) -> ClientResult<()> {
        if response.message_id() == Some(expected) {
            Ok(())
        } else {
            Err(ClientError::Protocol(
                duplexmcp_protocol::Error::invalid_request("response id mismatch"),
            ))
        }
    }

    fn unwrap_payload(response: JsonRpcResponse) -> ClientResult<Value> {
        match response.payload {
            JsonRpcResponsePayload::Success { result } => Ok(result),
            JsonRpcResponsePayload::Error { error } => Err(ClientError::Rpc(error)),
        }
    }

    // ---- Typed operations ------------------------------------------------

    /// `ping`
    pub async fn ping(&self) -> ClientResult<()> {
        let result = self.request(methods::PING, None).await?;
        let _: EmptyResult = parse_result_as(&result)?;
        Ok(())
    }

    /// `tools/list`
    pub async fn list_tools(&self) -> ClientResult<ListToolsResult> {
        self.ensure_initialized()?;
        let result = self.request(methods::TOOLS_LIST, None).await?;
        Ok(parse_result_as(&result)?)
    }

    /// `tools/call`
    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Option<HashMap<String, Value>>,
    ) -> ClientResult<CallToolResult> {
        self.ensure_initialized()?;
        let params = CallToolRequest {
            name: name.into(),
            arguments,
        };
        let result = self
            .request(methods::TOOLS_CALL, Some(serde_json::to_value(&params)?))
            .await?;
        Ok(parse_result_as(&result)?)
    }

    /// `prompts/list`
    pub async fn list_prompts(&self) -> ClientResult<ListPromptsResult> {
        self.ensure_initialized()?;
        let result = self.request(methods::PROMPTS_LIST, None).await?;
        Ok(parse_result_as(&result)?)
    }

    /// `prompts/get`
    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: Option<HashMap<String, String>>,
    ) -> ClientResult<GetPromptResult> {
        self.ensure_initialized()?;
        let params = GetPromptRequest {
            name: name.into(),
            arguments,
        };
        let result = self
            .request(methods::PROMPTS_GET, Some(serde_json::to_value(&params)?))
            .await?;
        Ok(parse_result_as(&result)?)
    }

    /// `resources/list`
    pub async fn list_resources(&self) -> ClientResult<ListResourcesResult> {
        self.ensure_initialized()?;
        let result = self.request(methods::RESOURCES_LIST, None).await?;
        Ok(parse_result_as(&result)?)
    }

    /// `resources/templates/list`
    pub async fn list_resource_templates(&self) -> ClientResult<ListResourceTemplatesResult> {
        self.ensure_initialized()?;
        let result = self.request(methods::RESOURCES_TEMPLATES_LIST, None).await?;
        Ok(parse_result_as(&result)?)
    }

    /// `resources/read`
    pub async fn read_resource(&self, uri: impl Into<String>) -> ClientResult<ReadResourceResult> {
        self.ensure_initialized()?;
        let params = ReadResourceRequest { uri: uri.into() };
        let result = self
            .request(methods::RESOURCES_READ, Some(serde_json::to_value(&params)?))
            .await?;
        Ok(parse_result_as(&result)?)
    }

    /// `completion/complete`
    pub async fn complete(
        &self,
        reference: CompletionReference,
        argument: impl Into<String>,
        value: impl Into<String>,
    ) -> ClientResult<CompleteResult> {
        self.ensure_initialized()?;
        let params = CompleteRequest {
            reference,
            argument: CompleteArgument {
                name: argument.into(),
                value: value.into(),
            },
        };
        let result = self
            .request(
                methods::COMPLETION_COMPLETE,
                Some(serde_json::to_value(&params)?),
            )
            .await?;
        Ok(parse_result_as(&result)?)
    }

    /// `logging/setLevel`
    pub async fn set_log_level(&self, level: LoggingLevel) -> ClientResult<()> {
        self.ensure_initialized()?;
        let params = SetLevelRequest { level };
        let result = self
            .request(
                methods::LOGGING_SET_LEVEL,
                Some(serde_json::to_value(&params)?),
            )
            .await?;
        let _: EmptyResult = parse_result_as(&result)?;
        Ok(())
    }

    /// `notifications/cancelled` for an in-flight request
    pub async fn cancel_request(
        &self,
        request_id: MessageId,
        reason: Option<String>,
    ) -> ClientResult<()> {
        let params = duplexmcp_protocol::types::CancelledNotification { request_id, reason };
        self.notify(
            methods::NOTIFICATION_CANCELLED,
            Some(serde_json::to_value(&params)?),
        )
        .await
    }
}

/// Route a notification-stream event: server requests are answered, plain
/// notifications are handed to the application callback.
fn handle_stream_event(
    transport: &Arc<HttpClientTransport>,
    dispatcher: &Arc<ClientDispatcher>,
    event: duplexmcp_transport::SseEvent,
) {
    let Ok(message) = serde_json::from_str::<JsonRpcMessage>(&event.data) else {
        debug!(data = %event.data, "skipping undecodable notification frame");
        return;
    };
    match message {
        JsonRpcMessage::Request(request) => {
            let dispatcher = Arc::clone(dispatcher);
            let transport = Arc::clone(transport);
            tokio::spawn(async move {
                let response = dispatcher.dispatch_request(request).await;
                if let Ok(body) = serde_json::to_value(&response) {
                    if let Err(e) = transport.post(&body).await {
                        warn!(error = %e, "failed to deliver callback response");
                    }
                }
            });
        }
        JsonRpcMessage::Notification(notification) => {
            dispatcher.dispatch_notification(notification);
        }
        other => debug!(?other, "unexpected frame on notification stream"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_numbers() {
        let client = Client::builder("http://localhost:1").build().unwrap();
        assert_eq!(client.allocate_id(), MessageId::Number(1));
        assert_eq!(client.allocate_id(), MessageId::Number(2));
    }

    #[test]
    fn test_operations_require_initialize() {
        let client = Client::builder("http://localhost:1").build().unwrap();
        assert!(matches!(
            client.ensure_initialized(),
            Err(ClientError::NotInitialized)
        ));
    }

    #[test]
    fn test_capabilities_follow_handlers() {
        let client = Client::builder("http://localhost:1")
            .roots(vec![Root::new("file:///ws")])
            .build()
            .unwrap();
        let capabilities = client.capabilities();
        assert!(capabilities.roots.is_some());
        assert!(capabilities.sampling.is_none());
        assert!(capabilities.elicitation.is_none());
    }
}
