//! JSON web API on top of the FastCGI Responder
//!
//! [`JsonApi`] is what an application implements: produce a JSON document for
//! `GET` and optionally accept a body on `POST`. [`JsonHandler`] adapts any
//! `JsonApi` to the FastCGI [`Handler`] and turns errors into HTTP statuses.
//!
//! [`SensorApi`] is the implementation backed by the [`SharedStore`]:
//!
//! - `GET` returns the [`crate::data::Snapshot`] as JSON
//! - `POST` applies an [`OverrideCommand`] to the store

use crate::data::SharedStore;
use crate::error::{AppResult, SensorError};
use crate::fastcgi::request::{parse_form, Request, Response};
use crate::fastcgi::Handler;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Keys accepted as the override value, in lookup order
pub const VALUE_KEYS: [&str; 4] = ["value", "volt", "degrees", "temperature"];

/// Body of a POST request
#[derive(Debug, Clone, Default)]
pub struct PostBody {
    /// `CONTENT_TYPE` of the request, if sent
    pub content_type: Option<String>,
    /// Body bytes, already bounded by `CONTENT_LENGTH`
    pub raw: Vec<u8>,
}

impl PostBody {
    /// Extract the body from a FastCGI request
    pub fn from_request(request: &Request) -> Self {
        Self {
            content_type: request.content_type().map(str::to_string),
            raw: request.body().to_vec(),
        }
    }

    /// Body as text
    pub fn text(&self) -> AppResult<&str> {
        std::str::from_utf8(&self.raw)
            .map_err(|_| SensorError::BadRequest("Body is not valid UTF-8".to_string()))
    }

    /// True if the body should be read as JSON rather than form data
    pub fn is_json(&self) -> bool {
        let declared = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
        declared
            || self
                .raw
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .is_some_and(|b| *b == b'{')
    }
}

/// Application callbacks for the JSON API
#[async_trait]
pub trait JsonApi: Send + Sync {
    /// Document returned for `GET`
    async fn get(&self) -> AppResult<Value>;

    /// Handle a `POST` body. Not supported unless overridden.
    async fn post(&self, _body: &PostBody) -> AppResult<()> {
        Err(SensorError::MethodNotSupported("POST".to_string()))
    }

    /// MIME type of the `GET` document, without charset
    fn content_type(&self) -> &str {
        "application/json"
    }
}

/// Override sent by the browser
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideCommand {
    /// Value to inject
    pub value: f32,
    /// Replace the next `steps` samples (`0` cancels); `None` overwrites the whole buffer
    pub steps: Option<u32>,
    /// Free-text greeting, logged only
    pub hello: Option<String>,
}

impl OverrideCommand {
    /// Decode a POST body as JSON or form data.
    pub fn parse(body: &PostBody) -> AppResult<Self> {
        let text = body.text()?;
        let fields = if body.is_json() {
            json_fields(text)?
        } else {
            parse_form(text)
        };
        Self::from_fields(&fields)
    }

    fn from_fields(fields: &HashMap<String, String>) -> AppResult<Self> {
        let (key, raw) = VALUE_KEYS
            .iter()
            .find_map(|k| fields.get(*k).map(|v| (*k, v)))
            .ok_or_else(|| {
                SensorError::BadRequest(format!(
                    "No value given, expected one of: {}",
                    VALUE_KEYS.join(", ")
                ))
            })?;
        let value: f32 = raw
            .trim()
            .parse()
            .map_err(|_| SensorError::BadRequest(format!("'{}' is not a number: {}", key, raw)))?;
        if !value.is_finite() {
            return Err(SensorError::BadRequest(format!(
                "'{}' must be finite",
                key
            )));
        }

        let steps = match fields.get("steps") {
            Some(raw) => Some(parse_steps(raw)?),
            None => None,
        };

        Ok(Self {
            value,
            steps,
            hello: fields.get("hello").cloned(),
        })
    }
}

/// Step count of a forced override. Fractions are truncated and anything
/// below one means "cancel".
fn parse_steps(raw: &str) -> AppResult<u32> {
    let raw = raw.trim();
    let steps = match raw.parse::<i64>() {
        Ok(steps) => steps,
        Err(_) => raw
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite())
            .map(|s| s.trunc() as i64)
            .ok_or_else(|| SensorError::BadRequest(format!("'steps' is not a number: {}", raw)))?,
    };
    Ok(u32::try_from(steps.max(0)).unwrap_or(u32::MAX))
}

/// Flatten a JSON object into string fields. Numbers and strings are kept,
/// other value types are ignored.
fn json_fields(text: &str) -> AppResult<HashMap<String, String>> {
    let root: Value = serde_json::from_str(text)?;
    let object = root
        .as_object()
        .ok_or_else(|| SensorError::BadRequest("JSON body must be an object".to_string()))?;
    Ok(object
        .iter()
        .filter_map(|(k, v)| {
            let text = match v {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return None,
            };
            Some((k.clone(), text))
        })
        .collect())
}

/// [`JsonApi`] serving the sensor store
#[derive(Clone)]
pub struct SensorApi {
    store: SharedStore,
}

impl SensorApi {
    /// Serve readings from `store`
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Apply an override to the store
    pub async fn apply(&self, command: &OverrideCommand) {
        if let Some(hello) = &command.hello {
            info!(hello = %hello, "Greeting from client");
        }
        let mut store = self.store.write().await;
        match command.steps {
            Some(0) => {
                info!("Cancelling forced samples");
                store.force_next(command.value, 0);
            }
            Some(steps) => {
                info!(value = command.value, steps, "Forcing next samples");
                store.force_next(command.value, steps);
            }
            None => {
                info!(value = command.value, "Forcing buffered values");
                store.force_buffer(command.value);
            }
        }
    }
}

#[async_trait]
impl JsonApi for SensorApi {
    async fn get(&self) -> AppResult<Value> {
        let snapshot = self.store.read().await.snapshot();
        Ok(serde_json::to_value(snapshot)?)
    }

    async fn post(&self, body: &PostBody) -> AppResult<()> {
        let command = OverrideCommand::parse(body)?;
        self.apply(&command).await;
        Ok(())
    }
}

/// Adapter from [`JsonApi`] to the FastCGI [`Handler`]
pub struct JsonHandler<A> {
    api: A,
}

impl<A: JsonApi> JsonHandler<A> {
    /// Wrap `api`
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

fn error_response(err: &SensorError) -> Response {
    let status = err.http_status();
    let response = Response::error(status, &err.to_string());
    if status == 405 {
        response.with_header("Allow", "GET, POST")
    } else {
        response
    }
}

#[async_trait]
impl<A: JsonApi> Handler for JsonHandler<A> {
    async fn handle(&self, request: &Request) -> Response {
        let Some(method) = request.method() else {
            error!("REQUEST_METHOD missing. Please add 'include fastcgi_params;' to the nginx conf.");
            return Response::error(
                500,
                "REQUEST_METHOD missing. Please add 'include fastcgi_params;' to the nginx conf.",
            );
        };

        match method {
            "GET" => match self.api.get().await {
                Ok(json) => Response::json(self.api.content_type(), &json.to_string()),
                Err(e) => {
                    error!("GET failed: {}", e);
                    error_response(&e)
                }
            },
            "POST" => match self.api.post(&PostBody::from_request(request)).await {
                Ok(()) => Response::post_ack(),
                Err(e) => {
                    warn!("POST rejected: {}", e);
                    error_response(&e)
                }
            },
            other => error_response(&SensorError::MethodNotSupported(other.to_string())),
        }
    }
}
