/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/ext_stores/src/apiserver.rs
*
* The aggregated API server for ext.cattle.io. The Kubernetes API server
* proxies requests for the group here, authenticating the caller and passing
* the identity along in `X-Remote-*` headers. Each request is routed to the
* registered store for its resource; discovery and OpenAPI documents are
* answered directly.
*
* Bodies are JSON by default, YAML when asked for; every error goes back as a
* `meta/v1 Status`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::rest::{ResourceInfo, RestError, RestStorage, UserInfo};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIResource, APIResourceList, ListMeta, Status};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use warp::http::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use warp::http::{Method, StatusCode};
use warp::hyper::body::Bytes;
use warp::path::FullPath;
use warp::reply::Response;
use warp::{Filter, Rejection};

const REMOTE_USER: &str = "x-remote-user";
const REMOTE_UID: &str = "x-remote-uid";
const REMOTE_GROUP: &str = "x-remote-group";
const REMOTE_EXTRA_PREFIX: &str = "x-remote-extra-";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

impl Format {
    fn content_type(self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Yaml => "application/yaml",
        }
    }

    /// Picks the first acceptable media type of an `Accept` header.
    fn negotiate(accept: Option<&str>) -> Result<Self, RestError> {
        let Some(accept) = accept.map(str::trim).filter(|a| !a.is_empty()) else {
            return Ok(Format::Json);
        };
        accept
            .split(',')
            .filter_map(|entry| {
                let media = entry.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
                match media.as_str() {
                    "application/json" | "application/*" | "*/*" => Some(Format::Json),
                    "application/yaml" => Some(Format::Yaml),
                    _ => None,
                }
            })
            .next()
            .ok_or_else(|| RestError::NotAcceptable(format!("only application/json and application/yaml are served, not {accept}")))
    }

    fn of_body(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.trim().to_ascii_lowercase().starts_with("application/yaml") => Format::Yaml,
            _ => Format::Json,
        }
    }

    fn decode<T: DeserializeOwned>(self, body: &[u8]) -> Result<T, RestError> {
        match self {
            Format::Json => serde_json::from_slice(body).map_err(|e| RestError::BadRequest(format!("invalid JSON body: {e}"))),
            Format::Yaml => serde_yaml::from_slice(body).map_err(|e| RestError::BadRequest(format!("invalid YAML body: {e}"))),
        }
    }

    fn encode(self, value: &Value) -> Result<Vec<u8>, RestError> {
        match self {
            Format::Json => serde_json::to_vec(value).map_err(|e| RestError::Internal(e.to_string())),
            Format::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| RestError::Internal(e.to_string())),
        }
    }
}

struct Payload {
    format: Format,
    bytes: Bytes,
}

impl Payload {
    fn decode<T: DeserializeOwned>(&self) -> Result<T, RestError> {
        self.format.decode(&self.bytes)
    }
}

enum Operation {
    Get(String),
    List,
    Create(Payload),
    Update(String, Payload),
    Delete(String),
}

impl Operation {
    fn verb(&self) -> &'static str {
        match self {
            Operation::Get(_) => "get",
            Operation::List => "list",
            Operation::Create(_) => "create",
            Operation::Update(..) => "update",
            Operation::Delete(_) => "delete",
        }
    }
}

/// The type-erased face of a store, as seen by the router.
#[async_trait]
trait Endpoint: Send + Sync {
    fn describe(&self) -> ResourceInfo;

    async fn serve(
        &self,
        group_version: &str,
        user: &UserInfo,
        namespace: Option<&str>,
        operation: Operation,
    ) -> Result<(StatusCode, Value), RestError>;
}

fn to_value<T: Serialize>(object: &T) -> Result<Value, RestError> {
    serde_json::to_value(object).map_err(|e| RestError::Internal(format!("failed to encode object: {e}")))
}

#[async_trait]
impl<S: RestStorage> Endpoint for S {
    fn describe(&self) -> ResourceInfo {
        RestStorage::info(self)
    }

    async fn serve(
        &self,
        group_version: &str,
        user: &UserInfo,
        namespace: Option<&str>,
        operation: Operation,
    ) -> Result<(StatusCode, Value), RestError> {
        match operation {
            Operation::Get(name) => Ok((StatusCode::OK, to_value(&self.get(user, namespace, &name).await?)?)),
            Operation::List => {
                let items = self
                    .list(user, namespace)
                    .await?
                    .iter()
                    .map(to_value)
                    .collect::<Result<Vec<_>, _>>()?;
                let list = json!({
                    "apiVersion": group_version,
                    "kind": format!("{}List", RestStorage::info(self).kind),
                    "metadata": {},
                    "items": items,
                });
                Ok((StatusCode::OK, list))
            }
            Operation::Create(payload) => {
                let object = payload.decode()?;
                Ok((StatusCode::CREATED, to_value(&self.create(user, namespace, object).await?)?))
            }
            Operation::Update(name, payload) => {
                let object = payload.decode()?;
                Ok((StatusCode::OK, to_value(&self.update(user, namespace, &name, object).await?)?))
            }
            Operation::Delete(name) => {
                self.delete(user, namespace, &name).await?;
                let status = Status {
                    code: Some(200),
                    status: Some("Success".to_string()),
                    metadata: ListMeta::default(),
                    ..Default::default()
                };
                Ok((StatusCode::OK, typed(to_value(&status)?, "v1", "Status")))
            }
        }
    }
}

/// Makes sure a serialized object carries its `apiVersion` and `kind`.
fn typed(mut value: Value, api_version: &str, kind: &str) -> Value {
    if let Value::Object(map) = &mut value {
        map.entry("apiVersion").or_insert_with(|| json!(api_version));
        map.entry("kind").or_insert_with(|| json!(kind));
    }
    value
}

/// Result of a request against a store, reported to the observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestOutcome<'a> {
    pub resource: &'a str,
    pub verb: &'a str,
    pub code: u16,
}

type Observer = Arc<dyn Fn(&RequestOutcome<'_>) + Send + Sync>;

/// TLS material for the listener.
#[derive(Clone, Debug)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

struct ApiRequest {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
}

enum Route<'a> {
    Apis,
    Discovery,
    OpenApiV2,
    OpenApiV3,
    OpenApiV3Group,
    Resource {
        namespace: Option<&'a str>,
        resource: &'a str,
        name: Option<&'a str>,
    },
    Unknown,
}

pub struct ApiServer {
    group: String,
    version: String,
    endpoints: BTreeMap<&'static str, Arc<dyn Endpoint>>,
    observer: Option<Observer>,
}

impl ApiServer {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            endpoints: BTreeMap::new(),
            observer: None,
        }
    }

    pub fn register<S: RestStorage>(mut self, storage: S) -> Self {
        let info = RestStorage::info(&storage);
        self.endpoints.insert(info.name, Arc::new(storage));
        self
    }

    /// Installs a callback invoked after every resource request.
    pub fn observe(mut self, observer: impl Fn(&RequestOutcome<'_>) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    fn group_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    pub fn routes(self: Arc<Self>) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
        let server = warp::any().map(move || self.clone());
        warp::method()
            .and(warp::path::full())
            .and(warp::query::<HashMap<String, String>>())
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .and(server)
            .then(
                |method: Method,
                 path: FullPath,
                 query: HashMap<String, String>,
                 headers: HeaderMap,
                 body: Bytes,
                 server: Arc<ApiServer>| async move {
                    let request = ApiRequest {
                        method,
                        path: path.as_str().to_string(),
                        query,
                        headers,
                        body,
                    };
                    server.handle(request).await
                },
            )
    }

    /// Serves the API until the process exits.
    pub async fn run(self: Arc<Self>, addr: SocketAddr, tls: Option<TlsFiles>) {
        let resources: Vec<&str> = self.endpoints.keys().copied().collect();
        let routes = self.routes();
        match tls {
            Some(files) => {
                info!(%addr, ?resources, "Starting ext API server with TLS");
                warp::serve(routes).tls().cert_path(files.cert).key_path(files.key).run(addr).await;
            }
            None => {
                warn!(%addr, ?resources, "Starting ext API server without TLS");
                warp::serve(routes).run(addr).await;
            }
        }
    }

    fn route<'a>(&self, path: &'a str) -> Route<'a> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let ours = |g: &str, v: &str| g == self.group && v == self.version;
        match segments[..] {
            ["apis"] => Route::Apis,
            ["openapi", "v2"] => Route::OpenApiV2,
            ["openapi", "v3"] => Route::OpenApiV3,
            ["openapi", "v3", "apis", g, v] if ours(g, v) => Route::OpenApiV3Group,
            ["apis", g, v] if ours(g, v) => Route::Discovery,
            ["apis", g, v, "namespaces", ns, resource] if ours(g, v) => Route::Resource {
                namespace: Some(ns),
                resource,
                name: None,
            },
            ["apis", g, v, "namespaces", ns, resource, name] if ours(g, v) => Route::Resource {
                namespace: Some(ns),
                resource,
                name: Some(name),
            },
            ["apis", g, v, resource] if ours(g, v) => Route::Resource {
                namespace: None,
                resource,
                name: None,
            },
            ["apis", g, v, resource, name] if ours(g, v) => Route::Resource {
                namespace: None,
                resource,
                name: Some(name),
            },
            _ => Route::Unknown,
        }
    }

    async fn handle(&self, request: ApiRequest) -> Response {
        let format = match Format::negotiate(header(&request.headers, ACCEPT.as_str())) {
            Ok(format) => format,
            Err(e) => return error_response(Format::Json, &e),
        };

        let result = match self.route(&request.path) {
            Route::Apis => Err(RestError::NotAcceptable(
                "aggregated discovery is not supported".to_string(),
            )),
            Route::Discovery => read_only(&request.method).map(|_| (StatusCode::OK, self.discovery())),
            Route::OpenApiV2 => read_only(&request.method).map(|_| (StatusCode::OK, self.openapi_v2())),
            Route::OpenApiV3 => read_only(&request.method).map(|_| (StatusCode::OK, self.openapi_v3())),
            Route::OpenApiV3Group => read_only(&request.method).map(|_| (StatusCode::OK, self.openapi_v3_group())),
            Route::Resource { namespace, resource, name } => {
                self.dispatch(&request, namespace, resource, name).await
            }
            Route::Unknown => Err(not_found()),
        };

        match result {
            Ok((code, value)) => respond(format, code, &value),
            Err(e) => error_response(format, &e),
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        namespace: Option<&str>,
        resource: &str,
        name: Option<&str>,
    ) -> Result<(StatusCode, Value), RestError> {
        let endpoint = self.endpoints.get(resource).ok_or_else(not_found)?;
        let info = endpoint.describe();
        let listing = request.method == Method::GET && name.is_none();
        if (namespace.is_some() && !info.namespaced) || (namespace.is_none() && info.namespaced && !listing) {
            return Err(not_found());
        }

        let user = remote_user(&request.headers)?;
        let watch = request.query.get("watch").is_some_and(|w| w == "true" || w == "1");
        let operation = match (&request.method, name) {
            (&Method::GET, _) if watch => Err(RestError::unsupported(resource, "watch")),
            (&Method::GET, Some(name)) => Ok(Operation::Get(name.to_string())),
            (&Method::GET, None) => Ok(Operation::List),
            (&Method::POST, None) => Ok(Operation::Create(self.payload(request))),
            (&Method::PUT, Some(name)) => Ok(Operation::Update(name.to_string(), self.payload(request))),
            (&Method::DELETE, Some(name)) => Ok(Operation::Delete(name.to_string())),
            (method, _) => Err(RestError::unsupported(resource, verb_of(method))),
        };

        let (verb, result) = match operation {
            Ok(operation) => {
                let verb = operation.verb();
                debug!(user = %user.name, resource, verb, ?namespace, "Serving ext request");
                (verb, endpoint.serve(&self.group_version(), &user, namespace, operation).await)
            }
            Err(e) => ("unsupported", Err(e)),
        };

        if let Some(observer) = &self.observer {
            let code = match &result {
                Ok((code, _)) => code.as_u16(),
                Err(e) => e.code(),
            };
            observer(&RequestOutcome { resource, verb, code });
        }
        if let Err(e) = &result {
            debug!(user = %user.name, resource, verb, error = %e, "Ext request failed");
        }
        result
    }

    fn payload(&self, request: &ApiRequest) -> Payload {
        Payload {
            format: Format::of_body(header(&request.headers, CONTENT_TYPE.as_str())),
            bytes: request.body.clone(),
        }
    }

    fn discovery(&self) -> Value {
        let list = APIResourceList {
            group_version: self.group_version(),
            resources: self
                .endpoints
                .values()
                .map(|endpoint| {
                    let info = endpoint.describe();
                    APIResource {
                        name: info.name.to_string(),
                        singular_name: info.singular.to_string(),
                        kind: info.kind.to_string(),
                        namespaced: info.namespaced,
                        verbs: info.verbs.iter().map(|v| v.to_string()).collect(),
                        ..Default::default()
                    }
                })
                .collect(),
        };
        typed(serde_json::to_value(&list).unwrap_or_default(), "v1", "APIResourceList")
    }

    fn openapi_v2(&self) -> Value {
        json!({
            "swagger": "2.0",
            "info": { "title": self.group, "version": self.version },
            "paths": {},
        })
    }

    fn openapi_v3(&self) -> Value {
        let key = format!("apis/{}/{}", self.group, self.version);
        json!({
            "paths": {
                key.clone(): { "serverRelativeURL": format!("/openapi/v3/{key}") },
            },
        })
    }

    fn openapi_v3_group(&self) -> Value {
        json!({
            "openapi": "3.0.0",
            "info": { "title": self.group, "version": self.version },
            "paths": {},
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Reads the identity the Kubernetes API server authenticated.
fn remote_user(headers: &HeaderMap) -> Result<UserInfo, RestError> {
    let name = header(headers, REMOTE_USER)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| RestError::Unauthorized("no user information on request".to_string()))?;

    let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in headers {
        let Some(extra_key) = key.as_str().strip_prefix(REMOTE_EXTRA_PREFIX) else {
            continue;
        };
        if let Ok(value) = value.to_str() {
            extra.entry(extra_key.to_string()).or_default().push(value.to_string());
        }
    }

    Ok(UserInfo {
        name: name.to_string(),
        uid: header(headers, REMOTE_UID).unwrap_or_default().to_string(),
        groups: headers
            .get_all(REMOTE_GROUP)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect(),
        extra,
    })
}

fn read_only(method: &Method) -> Result<(), RestError> {
    if method == Method::GET {
        Ok(())
    } else {
        Err(RestError::MethodNotSupported {
            resource: "discovery".to_string(),
            verb: verb_of(method),
        })
    }
}

fn verb_of(method: &Method) -> &'static str {
    match *method {
        Method::GET => "get",
        Method::POST => "create",
        Method::PUT => "update",
        Method::PATCH => "patch",
        Method::DELETE => "delete",
        _ => "unknown",
    }
}

fn not_found() -> RestError {
    RestError::NotFound("the server could not find the requested resource".to_string())
}

fn respond(format: Format, code: StatusCode, value: &Value) -> Response {
    match format.encode(value) {
        Ok(body) => raw_response(code, format.content_type(), body),
        Err(e) => error_response(Format::Json, &e),
    }
}

fn error_response(format: Format, error: &RestError) -> Response {
    let status = typed(serde_json::to_value(error.to_status()).unwrap_or_default(), "v1", "Status");
    let code = StatusCode::from_u16(error.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let (body, content_type) = match format.encode(&status) {
        Ok(body) => (body, format.content_type()),
        Err(_) => (status.to_string().into_bytes(), Format::Json.content_type()),
    };
    raw_response(code, content_type, body)
}

fn raw_response(code: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response {
    let mut response = Response::new(body.into());
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
