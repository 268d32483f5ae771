//! Routing of inbound SOAP calls on the client side.

use bridge_core::{ClientBridge, ForwardRequest};
use hyper::{Method, StatusCode};
use tracing::{debug, warn};

/// Content type of forwarded SOAP responses.
pub const XML_CONTENT_TYPE: &str = "text/xml; charset=UTF-8";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Paths served by a [`SoapEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOptions {
    /// Prefix of proxied calls. The rest of the path is the call context.
    pub proxy_path: String,
    /// Served without authentication.
    pub health_path: String,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            proxy_path: "/proxy-server".to_string(),
            health_path: "/actuator/health".to_string(),
        }
    }
}

impl EndpointOptions {
    /// Sets the prefix of proxied calls.
    pub fn with_proxy_path(mut self, path: impl Into<String>) -> Self {
        self.proxy_path = path.into();
        self
    }

    /// Sets the path of the health check.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }
}

/// An inbound HTTP request, reduced to what routing needs.
#[derive(Debug, Clone)]
pub struct InboundCall {
    /// HTTP method.
    pub method: Method,
    /// Request path, without query.
    pub path: String,
    /// Common name of the verified client certificate.
    pub identity: Option<String>,
    /// The SOAP request body.
    pub body: String,
}

/// The answer to an [`InboundCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Set when the body is not empty.
    pub content_type: Option<&'static str>,
    /// Response body.
    pub body: String,
}

impl EndpointResponse {
    fn empty(status: StatusCode) -> Self {
        Self { status, content_type: None, body: String::new() }
    }

    fn xml(body: String) -> Self {
        Self { status: StatusCode::OK, content_type: Some(XML_CONTENT_TYPE), body }
    }
}

/// Authorizes inbound calls and forwards them through the [`ClientBridge`].
#[derive(Debug, Clone)]
pub struct SoapEndpoint {
    options: EndpointOptions,
    client: ClientBridge,
}

impl SoapEndpoint {
    /// Creates an endpoint forwarding through `client`.
    pub fn new(options: EndpointOptions, client: ClientBridge) -> Self {
        Self { options, client }
    }

    /// The served paths.
    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }

    /// The call context of `path`, or `None` if it is not a proxied path.
    fn context<'a>(&self, path: &'a str) -> Option<&'a str> {
        let proxy = self.options.proxy_path.trim_end_matches('/');
        let rest = path.strip_prefix(proxy)?;

        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Routes one call: the health check, a forwarded SOAP call, or a rejection.
    pub async fn handle(&self, call: InboundCall) -> EndpointResponse {
        if call.path == self.options.health_path {
            return EndpointResponse {
                status: StatusCode::OK,
                content_type: Some(JSON_CONTENT_TYPE),
                body: r#"{"status":"UP"}"#.to_string(),
            };
        }

        let Some(context) = self.context(&call.path) else {
            debug!(path = %call.path, "no route");
            return EndpointResponse::empty(StatusCode::NOT_FOUND);
        };

        let Some(organization) = call.identity else {
            warn!(path = %call.path, "rejected unauthenticated call");
            return EndpointResponse::empty(StatusCode::UNAUTHORIZED);
        };

        if call.method != Method::POST {
            return EndpointResponse::empty(StatusCode::METHOD_NOT_ALLOWED);
        }

        let request = ForwardRequest {
            context: context.to_string(),
            payload: call.body,
            organization: Some(organization),
        };

        match self.client.forward(request).await {
            Ok(response) => EndpointResponse::xml(response),
            Err(e) if e.is_timeout() => EndpointResponse::empty(StatusCode::GATEWAY_TIMEOUT),
            Err(e) => {
                warn!(error = %e, "forwarding failed");
                EndpointResponse::empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}
