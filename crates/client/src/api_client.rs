//! Request dispatcher shared by generated REST and streaming methods.
//!
//! One call signature, two delivery models: [`ApiClient::request`] either
//! performs an HTTP exchange and yields one value, or subscribes to the
//! channel derived from the same method and URL and yields a
//! [`NotificationStream`].

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bridgekit_shared::{channel_name, translate_failure, ApiError, HttpFailure};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::stream::{Stream, StreamExt};
use serde_json::{Map, Value};

use crate::auth_session::SessionManager;
use crate::config::ClientConfig;
use crate::http::{HttpRequest, HttpTransport, ReqwestTransport};
use crate::request::{join_base, resolve_path, RequestDescriptor};
use crate::ws::{ConnectOptions, ListenerId, SocketConnection, SocketRegistry, WsTransport};

/// What a dispatched call produced.
pub enum Reply {
    Value(Value),
    Stream(NotificationStream),
}

impl Reply {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Reply::Value(value) => Some(value),
            Reply::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<NotificationStream> {
        match self {
            Reply::Stream(stream) => Some(stream),
            Reply::Value(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    session: Arc<SessionManager>,
    http: Arc<dyn HttpTransport>,
    sockets: Arc<SocketRegistry>,
}

impl ApiClient {
    /// Client over `reqwest` and the WebSocket transport.
    pub fn new(config: ClientConfig, session: Arc<SessionManager>) -> Self {
        Self {
            config,
            session,
            http: Arc::new(ReqwestTransport::new()),
            sockets: Arc::new(SocketRegistry::new(Arc::new(WsTransport::new()))),
        }
    }

    pub fn with_http_transport(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = http;
        self
    }

    /// Share a registry between clients to share their connections.
    pub fn with_socket_registry(mut self, sockets: Arc<SocketRegistry>) -> Self {
        self.sockets = sockets;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn sockets(&self) -> &Arc<SocketRegistry> {
        &self.sockets
    }

    /// The access token header, when a token is present.
    pub fn auth_headers(&self) -> Vec<(String, String)> {
        self.session
            .access_token_id()
            .map(|token| vec![(self.config.auth_header.clone(), token)])
            .unwrap_or_default()
    }

    /// Dispatch on `use_streaming`.
    pub async fn request(&self, req: RequestDescriptor) -> Result<Reply, ApiError> {
        if req.use_streaming {
            Ok(Reply::Stream(self.subscribe(req)))
        } else {
            self.rest(req).await.map(Reply::Value)
        }
    }

    /// Perform the HTTP exchange for `req`. Never retries.
    pub async fn rest(&self, req: RequestDescriptor) -> Result<Value, ApiError> {
        let url = join_base(&self.config.base_url, &req.url());
        let body = req
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ApiError::Encode(e.to_string()))?;

        let request = HttpRequest {
            method: req.method.clone(),
            url,
            headers: self.auth_headers(),
            body,
        };
        let method = request.method.clone();
        let url = request.url.clone();

        let resp = self.http.send(request).await.map_err(|failure| {
            crate::log_debug!("{} {} failed: {:?}", method, url, failure);
            translate_failure(&failure)
        })?;

        if !resp.is_success() {
            crate::log_debug!("{} {} returned HTTP {}", method, url, resp.status);
            return Err(translate_failure(&HttpFailure::Status {
                status: resp.status,
                body: resp.body,
            }));
        }

        parse_body(&resp.body)
    }

    /// Subscribe to the channel for `req` on this API's shared connection.
    ///
    /// The channel is named after the method and the path-resolved template.
    /// Query parameters do not take part, so filtered and unfiltered calls
    /// share one channel.
    pub fn subscribe(&self, req: RequestDescriptor) -> NotificationStream {
        let path = resolve_path(&req.url_template, &req.path_params);
        let channel = channel_name(req.method.as_str(), &path);
        let options = ConnectOptions {
            headers: self.auth_headers(),
        };
        let connection = self.sockets.get_handler(&self.config.base_url, options);
        NotificationStream::attach(connection, channel)
    }

    /// `POST {model}/login`. On success the session takes the returned token,
    /// user id and profile, marks remember-me and persists.
    pub async fn login(
        &self,
        model: &str,
        credentials: Value,
        include: Option<&str>,
    ) -> Result<Value, ApiError> {
        let mut req = RequestDescriptor::post(format!("{}/login", model.trim_end_matches('/')))
            .body(credentials);
        if let Some(include) = include {
            req = req.query_param("include", include);
        }

        let result = self.rest(req).await;
        if let Ok(value) = &result {
            self.observe_login(value);
        }
        result
    }

    /// `POST {model}/logout`. On success the session is cleared in memory and in storage.
    pub async fn logout(&self, model: &str) -> Result<Value, ApiError> {
        let req = RequestDescriptor::post(format!("{}/logout", model.trim_end_matches('/')));

        let result = self.rest(req).await;
        if result.is_ok() {
            self.observe_logout();
        }
        result
    }

    /// `GET {model}/:id` for the current user, refreshing the cached profile.
    /// Anonymous sessions get `Ok(None)` without a call.
    pub async fn get_current(&self, model: &str) -> Result<Option<Value>, ApiError> {
        let Some(user_id) = self.session.current_user_id() else {
            return Ok(None);
        };
        let req = RequestDescriptor::get(format!("{}/:id", model.trim_end_matches('/')))
            .path_param("id", user_id);

        let profile = self.rest(req).await?;
        self.session.set_current_user_data(Some(profile.clone()));
        Ok(Some(profile))
    }

    fn observe_login(&self, value: &Value) {
        let Some(token) = value.get("id").and_then(id_text) else {
            crate::log_warn!("login response carried no token id, session unchanged");
            return;
        };
        let Some(user_id) = value.get("userId").and_then(id_text) else {
            crate::log_warn!("login response carried no user id, session unchanged");
            return;
        };

        crate::log_info!("logged in as {}", user_id);
        self.session
            .set_user(token, user_id, value.get("user").cloned());
        self.session.set_remember_me(true);
        self.session.save();
    }

    fn observe_logout(&self) {
        crate::log_info!("logged out");
        self.session.clear_user();
        self.session.clear_storage();
    }
}

/// Identifiers arrive as strings or numbers.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Empty bodies mean "no content" and yield an empty object.
fn parse_body(body: &str) -> Result<Value, ApiError> {
    if body.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(body).map_err(|e| ApiError::Deserialize(e.to_string()))
}

/// Collapse the data arguments of one delivery into a single value.
///
/// One argument is forwarded as is, several become an array, none becomes
/// `null`. Strings holding JSON are parsed.
fn delivery_value(mut args: Vec<Value>) -> Value {
    let value = match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    };
    match value {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}

type Observers = Arc<Mutex<Vec<UnboundedSender<Value>>>>;

/// Continuous, multicast notifications for one channel.
///
/// Every delivery reaches every attached [`Observer`] in transport order.
/// The first [`observe`](Self::observe) also receives what arrived since the
/// subscription was made; later observers only see later deliveries.
/// Dropping or cancelling the stream detaches its listener; the shared
/// connection stays open for other subscribers.
pub struct NotificationStream {
    channel: String,
    connection: Arc<SocketConnection>,
    listener: Option<ListenerId>,
    observers: Observers,
    first: Mutex<Option<Observer>>,
}

impl NotificationStream {
    fn attach(connection: Arc<SocketConnection>, channel: String) -> Self {
        let (sender, receiver) = unbounded();
        let observers: Observers = Arc::new(Mutex::new(vec![sender]));
        let fanout = observers.clone();

        let listener = connection.on(&channel, move |args| {
            let value = delivery_value(args);
            fanout
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|observer| observer.unbounded_send(value.clone()).is_ok());
        });

        crate::log_debug!("subscribed to {} on {}", channel, connection.base_url());
        Self {
            channel,
            connection,
            listener: Some(listener),
            observers,
            first: Mutex::new(Some(Observer { receiver })),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Attach a new observer that sees every later delivery.
    pub fn observe(&self) -> Observer {
        if let Some(first) = self
            .first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return first;
        }
        let (sender, receiver) = unbounded();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        Observer { receiver }
    }

    /// Detach from the channel. Observers end after draining what they hold.
    pub fn cancel(self) {}
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.connection.off(&self.channel, id);
            self.observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            crate::log_debug!("unsubscribed from {}", self.channel);
        }
    }
}

/// One observer of a [`NotificationStream`].
pub struct Observer {
    receiver: UnboundedReceiver<Value>,
}

impl Stream for Observer {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.receiver.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_session::SessionStore;
    use crate::storage::MemoryStorage;
    use crate::testing::{MemoryTransport, MockHttp};
    use serde_json::json;

    const BASE: &str = "http://backend.test";

    fn client(http: &MockHttp, hub: &MemoryTransport, storage: &MemoryStorage) -> ApiClient {
        let session = Arc::new(SessionManager::new(SessionStore::new(
            Arc::new(storage.clone()),
            "$LoopBack$",
        )));
        ApiClient::new(ClientConfig::default().with_base_url(BASE), session)
            .with_http_transport(Arc::new(http.clone()))
            .with_socket_registry(Arc::new(SocketRegistry::new(Arc::new(hub.clone()))))
    }

    #[tokio::test]
    async fn rest_builds_url_and_omits_auth_when_anonymous() {
        let http = MockHttp::new();
        http.respond(200, r#"{"name":"bolt"}"#);
        let api = client(&http, &MemoryTransport::new(), &MemoryStorage::new());

        let value = api
            .rest(RequestDescriptor::get("/widgets/:id").path_param("id", "3"))
            .await
            .unwrap();

        assert_eq!(value, json!({"name": "bolt"}));
        let sent = &http.requests()[0];
        assert_eq!(sent.url, "http://backend.test/widgets/3");
        assert!(sent.headers.is_empty());
        assert_eq!(sent.body, None);
    }

    #[tokio::test]
    async fn token_is_sent_raw_in_the_auth_header() {
        let http = MockHttp::new();
        http.respond(200, "{}");
        let api = client(&http, &MemoryTransport::new(), &MemoryStorage::new());
        api.session().set_user("tok1", "u1", None);

        api.rest(RequestDescriptor::get("/widgets")).await.unwrap();

        assert_eq!(
            http.requests()[0].headers,
            vec![("Authorization".to_string(), "tok1".to_string())]
        );
    }

    #[tokio::test]
    async fn body_is_serialized_as_json() {
        let http = MockHttp::new();
        http.respond(200, r#"{"id":1}"#);
        let api = client(&http, &MemoryTransport::new(), &MemoryStorage::new());

        api.rest(RequestDescriptor::post("/widgets").body(json!({"name": "nut"})))
            .await
            .unwrap();

        let body = http.requests()[0].body.clone().unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"name": "nut"}));
    }

    #[tokio::test]
    async fn empty_success_body_is_an_empty_object() {
        let http = MockHttp::new();
        http.respond(204, "");
        let api = client(&http, &MemoryTransport::new(), &MemoryStorage::new());

        let value = api.rest(RequestDescriptor::get("/widgets")).await.unwrap();
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn non_json_success_body_is_a_deserialize_error() {
        let http = MockHttp::new();
        http.respond(200, "<html>");
        let api = client(&http, &MemoryTransport::new(), &MemoryStorage::new());

        let err = api.rest(RequestDescriptor::get("/widgets")).await.unwrap_err();
        assert!(matches!(err, ApiError::Deserialize(_)));
    }

    #[tokio::test]
    async fn failures_are_translated_once_and_not_retried() {
        let http = MockHttp::new();
        http.respond(404, r#"{"error":{"message":"not found"}}"#);
        http.fail("connection reset");
        let api = client(&http, &MemoryTransport::new(), &MemoryStorage::new());

        let err = api
            .rest(RequestDescriptor::get("/widgets/:id").path_param("id", "9"))
            .await
            .unwrap_err();
        assert_eq!(err.remote_error(), Some(&json!({"message": "not found"})));
        assert_eq!(http.requests().len(), 1);

        let err = api.rest(RequestDescriptor::get("/widgets")).await.unwrap_err();
        assert!(matches!(err, ApiError::Server { status: None, .. }));
        assert_eq!(http.requests().len(), 2);
    }

    #[tokio::test]
    async fn request_branches_on_the_streaming_flag() {
        let http = MockHttp::new();
        http.respond(200, "[]");
        let hub = MemoryTransport::new();
        let api = client(&http, &hub, &MemoryStorage::new());

        let rest = api.request(RequestDescriptor::get("/widgets")).await.unwrap();
        assert_eq!(rest.into_value(), Some(json!([])));

        let stream = api
            .request(RequestDescriptor::get("/widgets").streaming(true))
            .await
            .unwrap()
            .into_stream()
            .unwrap();
        assert_eq!(stream.channel(), "[GET]/widgets");
        assert_eq!(http.requests().len(), 1);
        assert_eq!(hub.connected_urls(), vec![BASE]);
    }

    #[tokio::test]
    async fn first_observer_gets_deliveries_made_before_it_attached() {
        let hub = MemoryTransport::new();
        let api = client(&MockHttp::new(), &hub, &MemoryStorage::new());

        let stream = api.subscribe(RequestDescriptor::post("/widgets").streaming(true));
        hub.publish(BASE, "[POST]/widgets", vec![json!(1).into()]);

        let mut first = stream.observe();
        let mut second = stream.observe();
        hub.publish(BASE, "[POST]/widgets", vec![json!(2).into()]);

        assert_eq!(first.next().await, Some(json!(1)));
        assert_eq!(first.next().await, Some(json!(2)));
        assert_eq!(second.next().await, Some(json!(2)));
    }

    #[tokio::test]
    async fn query_params_do_not_change_the_channel() {
        let hub = MemoryTransport::new();
        let api = client(&MockHttp::new(), &hub, &MemoryStorage::new());

        let stream = api.subscribe(
            RequestDescriptor::get("/widgets/:id")
                .path_param("id", "4")
                .query_param("filter", json!({"where": {"a": 1}}))
                .streaming(true),
        );
        assert_eq!(stream.channel(), channel_name("GET", "/widgets/4"));

        let mut observer = stream.observe();
        assert_eq!(hub.publish(BASE, "[GET]/widgets/4", vec![json!("hit").into()]), 1);
        assert_eq!(observer.next().await, Some(json!("hit")));
    }

    #[tokio::test]
    async fn socket_handshake_carries_the_token() {
        let hub = MemoryTransport::new();
        let api = client(&MockHttp::new(), &hub, &MemoryStorage::new());
        api.session().set_user("tok9", "u9", None);

        let _stream = api.subscribe(RequestDescriptor::get("/widgets").streaming(true));

        let options = hub.options_for(BASE).unwrap();
        assert_eq!(options.headers, vec![("Authorization".to_string(), "tok9".to_string())]);
    }

    #[tokio::test]
    async fn login_updates_and_persists_session() {
        let http = MockHttp::new();
        http.respond(
            200,
            r#"{"id":"tok1","userId":7,"user":{"email":"a@example.com"}}"#,
        );
        let storage = MemoryStorage::new();
        let api = client(&http, &MemoryTransport::new(), &storage);

        let value = api
            .login("/Users", json!({"email": "a@example.com", "password": "x"}), Some("user"))
            .await
            .unwrap();

        assert_eq!(value["id"], "tok1");
        assert_eq!(http.requests()[0].url, "http://backend.test/Users/login?include=user");
        let session = api.session();
        assert_eq!(session.access_token_id().as_deref(), Some("tok1"));
        assert_eq!(session.current_user_id().as_deref(), Some("7"));
        assert_eq!(session.current_user_data(), Some(json!({"email": "a@example.com"})));
        assert!(session.remember_me());
        assert_eq!(storage.raw("$LoopBack$accessTokenId").as_deref(), Some("tok1"));
    }

    #[tokio::test]
    async fn failed_login_leaves_session_anonymous() {
        let http = MockHttp::new();
        http.respond(401, r#"{"error":{"message":"login failed"}}"#);
        let api = client(&http, &MemoryTransport::new(), &MemoryStorage::new());

        let err = api.login("/Users", json!({}), None).await.unwrap_err();
        assert_eq!(err.remote_message(), Some("login failed"));
        assert!(!api.session().is_authenticated());
    }

    #[tokio::test]
    async fn logout_clears_session_and_is_idempotent() {
        let http = MockHttp::new();
        http.respond(204, "").respond(204, "");
        let storage = MemoryStorage::new();
        let api = client(&http, &MemoryTransport::new(), &storage);
        api.session().set_user("tok1", "u1", None);
        api.session().save();

        api.logout("/Users").await.unwrap();
        let once = api.session().snapshot();
        api.logout("/Users").await.unwrap();

        assert_eq!(api.session().snapshot(), once);
        assert_eq!(once.token_id, None);
        assert_eq!(once.user_id, None);
        assert_eq!(storage.raw("$LoopBack$accessTokenId").as_deref(), Some(""));
        assert_eq!(http.requests().len(), 2);
        assert!(http.requests()[1].headers.is_empty());
    }

    #[tokio::test]
    async fn failed_logout_keeps_the_session() {
        let http = MockHttp::new();
        http.respond(500, "oops");
        let api = client(&http, &MemoryTransport::new(), &MemoryStorage::new());
        api.session().set_user("tok1", "u1", None);

        assert!(api.logout("/Users").await.is_err());
        assert!(api.session().is_authenticated());
    }

    #[tokio::test]
    async fn get_current_refreshes_profile_only() {
        let http = MockHttp::new();
        http.respond(200, r#"{"id":"u1","email":"new@example.com"}"#);
        let storage = MemoryStorage::new();
        let api = client(&http, &MemoryTransport::new(), &storage);

        assert_eq!(api.get_current("/Users").await.unwrap(), None);
        assert!(http.requests().is_empty());

        api.session().set_user("tok1", "u1", None);
        let profile = api.get_current("/Users").await.unwrap().unwrap();

        assert_eq!(http.requests()[0].url, "http://backend.test/Users/u1");
        assert_eq!(api.session().current_user_data(), Some(profile));
        assert_eq!(storage.raw("$LoopBack$accessTokenId"), None);
    }

    #[test]
    fn delivery_value_shapes() {
        assert_eq!(delivery_value(vec![]), Value::Null);
        assert_eq!(delivery_value(vec![json!({"a": 1})]), json!({"a": 1}));
        assert_eq!(delivery_value(vec![json!(r#"{"a":1}"#)]), json!({"a": 1}));
        assert_eq!(delivery_value(vec![json!("plain")]), json!("plain"));
        assert_eq!(delivery_value(vec![json!(1), json!(2)]), json!([1, 2]));
    }
}
