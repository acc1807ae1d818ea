use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use futures_util::future::BoxFuture;

use crate::headers::Headers;
use crate::http::{AppResult, Method, StatusCode};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::Response;
use crate::websocket::WebSocket;

/// Per-request bag for sharing values between middlewares.
#[derive(Default)]
pub struct State {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl State {
    pub fn insert<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T>(&self, key: &str) -> Option<&T>
    where
        T: Any,
    {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn get_mut<T>(&mut self, key: &str) -> Option<&mut T>
    where
        T: Any,
    {
        self.values.get_mut(key)?.downcast_mut::<T>()
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Everything a middleware sees for one request.
pub struct Context {
    request: Request,
    response: Response,
    state: State,
    web_socket: Option<WebSocket>,
}

impl Context {
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            state: State::default(),
            web_socket: None,
        }
    }

    #[must_use]
    pub fn with_web_socket(mut self, socket: WebSocket) -> Self {
        self.web_socket = Some(socket);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn into_response(self) -> Response {
        self.response
    }

    pub fn into_parts(self) -> (Request, Response) {
        (self.request, self.response)
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn query(&self) -> HashMap<String, String> {
        self.request.query()
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    pub fn accepts<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        self.request.accepts(candidates)
    }

    pub fn ip(&self, trust_proxy: bool) -> Option<String> {
        self.request.ip(trust_proxy)
    }

    pub fn redirect(&mut self, address: &str) {
        self.response.redirect(address);
    }

    pub fn redirect_with_status(&mut self, status: StatusCode, address: &str) {
        self.response.redirect_with_status(status, address);
    }

    pub fn push<M>(&self, middleware: M) -> BoxFuture<'static, AppResult>
    where
        M: Middleware,
    {
        self.response.push(middleware)
    }

    pub fn send_informational(
        &self,
        status: StatusCode,
        headers: Headers,
    ) -> BoxFuture<'static, AppResult> {
        self.response.send_informational(status, headers)
    }

    pub fn is_web_socket(&self) -> bool {
        self.web_socket.is_some()
    }

    pub fn web_socket(&mut self) -> Option<&mut WebSocket> {
        self.web_socket.as_mut()
    }

    pub fn take_web_socket(&mut self) -> Option<WebSocket> {
        self.web_socket.take()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("state", &self.state)
            .field("web_socket", &self.web_socket.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::websocket::Message;
    use futures::executor::block_on;
    use futures::StreamExt;

    fn ctx(target: &str) -> Context {
        let headers: Headers = [("Accept", "text/html")].into_iter().collect();
        Context::new(
            Request::memory(Method::GET, target, headers, Body::empty()),
            Response::memory(),
        )
    }

    #[test]
    fn shortcuts_delegate_to_request_and_response() {
        let mut ctx = ctx("/foo?page=2");
        assert_eq!(ctx.path(), "/foo");
        assert_eq!(ctx.method(), &Method::GET);
        assert_eq!(ctx.query().get("page").map(String::as_str), Some("2"));
        assert_eq!(ctx.accepts(&["json", "html"]), Some("html"));
        assert_eq!(ctx.ip(true), None);

        ctx.set_status(StatusCode::ACCEPTED);
        assert_eq!(ctx.status(), StatusCode::ACCEPTED);
        assert_eq!(ctx.response().status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn redirect_sets_location() {
        let mut ctx = ctx("/");
        ctx.redirect("/login");
        assert_eq!(ctx.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            ctx.response().headers().get("location").as_deref(),
            Some("/login")
        );
        ctx.redirect_with_status(StatusCode::TEMPORARY_REDIRECT, "/retry");
        assert_eq!(ctx.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[test]
    fn state_is_typed() {
        let mut ctx = ctx("/");
        assert!(ctx.state().is_empty());
        ctx.state_mut().insert("user", String::from("evert"));
        ctx.state_mut().insert("count", 1u32);
        assert_eq!(ctx.state().get::<String>("user").map(String::as_str), Some("evert"));
        assert_eq!(ctx.state().get::<u32>("user"), None);
        *ctx.state_mut().get_mut::<u32>("count").unwrap() += 1;
        assert_eq!(ctx.state().get::<u32>("count"), Some(&2));
        assert!(ctx.state_mut().remove("count"));
        assert!(!ctx.state().contains("count"));
        assert_eq!(ctx.state().len(), 1);
    }

    #[test]
    fn web_socket_is_optional() {
        let mut plain = ctx("/");
        assert!(!plain.is_web_socket());
        assert!(plain.web_socket().is_none());

        let (socket, mut peer) = WebSocket::channel(2);
        let mut upgraded = ctx("/ws").with_web_socket(socket);
        assert!(upgraded.is_web_socket());
        block_on(async {
            upgraded.web_socket().unwrap().send("hi").await.unwrap();
            assert_eq!(peer.outgoing.next().await, Some(Message::Text("hi".into())));
        });
        assert!(upgraded.take_web_socket().is_some());
        assert!(!upgraded.is_web_socket());
    }

    #[test]
    fn into_parts_returns_both_halves() {
        let mut ctx = ctx("/parts");
        ctx.response_mut().set_body("done");
        let (request, response) = ctx.into_parts();
        assert_eq!(request.path(), "/parts");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
