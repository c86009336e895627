//! Maps inbound calls onto the three engine operations.
//!
//! Every call is authorized first, then routed by method and path, and every
//! failure is converted to an [`Outcome`] in exactly one place
//! ([`DispatchError::outcome`]).

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::auth::{AuthError, IdentityVerifier};
use crate::engine::ReservationEngine;
use crate::error::EngineError;
use crate::state_machine::Machine;

/// Response taxonomy, each with an HTTP-style status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Ok,
    BadRequest,
    Unauthorized,
    NotFound,
    InternalServerError,
    HardwareError,
}

impl Outcome {
    pub fn status_code(self) -> u16 {
        match self {
            Outcome::Ok => 200,
            Outcome::BadRequest => 400,
            Outcome::Unauthorized => 401,
            Outcome::NotFound => 404,
            Outcome::InternalServerError => 500,
            Outcome::HardwareError => 502,
        }
    }
}

/// A transport-neutral inbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub token: Option<String>,
    pub body: Value,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            token: None,
            body: Value::Null,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Explicit token, else the `token` field of the body.
    fn credential(&self) -> Option<&str> {
        self.token
            .as_deref()
            .or_else(|| self.body.get("token").and_then(Value::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub outcome: Outcome,
    pub body: Value,
}

impl Response {
    fn ok(machine: &Machine) -> Self {
        Self {
            status_code: Outcome::Ok.status_code(),
            outcome: Outcome::Ok,
            body: serde_json::to_value(machine).unwrap_or(Value::Null),
        }
    }

    fn failure(outcome: Outcome, message: String) -> Self {
        Self {
            status_code: outcome.status_code(),
            outcome,
            body: json!({
                "error": {
                    "code": outcome,
                    "message": message,
                }
            }),
        }
    }
}

/// The three operations, resolved from method and path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    ReserveMachine,
    GetMachine { machine_id: String },
    StartMachine { machine_id: String },
}

impl Route {
    /// `POST /machine/request`, `GET /machine/{id}`, `POST /machine/{id}/start`.
    pub fn resolve(method: &str, path: &str) -> Option<Route> {
        let segments: Vec<&str> = path.strip_prefix('/')?.split('/').collect();

        match (method.to_ascii_uppercase().as_str(), segments.as_slice()) {
            ("POST", ["machine", "request"]) => Some(Route::ReserveMachine),
            ("GET", ["machine", id]) if is_machine_id(id) => Some(Route::GetMachine {
                machine_id: id.to_string(),
            }),
            ("POST", ["machine", id, "start"]) if is_machine_id(id) => Some(Route::StartMachine {
                machine_id: id.to_string(),
            }),
            _ => None,
        }
    }
}

/// `[a-zA-Z0-9-]+`
fn is_machine_id(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("missing or invalid token")]
    Unauthorized,

    #[error("no route for {method} {path}")]
    Unroutable { method: String, path: String },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("token verification failed: {0}")]
    Auth(#[from] AuthError),

    #[error("request handler crashed: {0}")]
    Crashed(String),
}

impl DispatchError {
    pub fn outcome(&self) -> Outcome {
        match self {
            DispatchError::Unauthorized => Outcome::Unauthorized,
            DispatchError::Unroutable { .. } | DispatchError::MissingField(_) => {
                Outcome::BadRequest
            }
            DispatchError::Engine(e) => match e {
                EngineError::InvalidInput(_) | EngineError::PreconditionFailed { .. } => {
                    Outcome::BadRequest
                }
                EngineError::MachineNotFound(_) | EngineError::NoneAvailable { .. } => {
                    Outcome::NotFound
                }
                EngineError::HardwareFailure { .. } => Outcome::HardwareError,
                EngineError::Conflict { .. } | EngineError::Store(_) | EngineError::Internal(_) => {
                    Outcome::InternalServerError
                }
            },
            DispatchError::Auth(_) | DispatchError::Crashed(_) => Outcome::InternalServerError,
        }
    }
}

/// Authorizes, routes and answers inbound calls.
#[derive(Clone)]
pub struct RequestRouter {
    engine: ReservationEngine,
    verifier: Arc<dyn IdentityVerifier>,
}

impl RequestRouter {
    pub fn new(engine: ReservationEngine, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self { engine, verifier }
    }

    pub fn engine(&self) -> &ReservationEngine {
        &self.engine
    }

    /// Handle one call. Never fails: every error becomes a [`Response`].
    ///
    /// The handler runs on its own task so that a panic anywhere below
    /// still produces an `INTERNAL_SERVER_ERROR` answer.
    pub async fn dispatch(&self, request: Request) -> Response {
        let span = info_span!(
            "dispatch",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            path = %request.path,
        );

        let router = self.clone();
        let handled = tokio::spawn(async move { router.handle(request).await }.instrument(span.clone()))
            .await
            .unwrap_or_else(|e| Err(DispatchError::Crashed(e.to_string())));

        let _entered = span.enter();
        match handled {
            Ok(machine) => {
                info!(machine_id = %machine.machine_id, status = %machine.status, "request succeeded");
                Response::ok(&machine)
            }
            Err(e) => {
                let outcome = e.outcome();
                match outcome {
                    Outcome::InternalServerError => error!(error = %e, "request failed"),
                    Outcome::HardwareError => warn!(error = %e, "request failed at hardware"),
                    _ => info!(error = %e, ?outcome, "request rejected"),
                }
                Response::failure(outcome, e.to_string())
            }
        }
    }

    async fn handle(&self, request: Request) -> Result<Machine, DispatchError> {
        self.authorize(request.credential()).await?;

        let route = Route::resolve(&request.method, &request.path).ok_or_else(|| {
            DispatchError::Unroutable {
                method: request.method.clone(),
                path: request.path.clone(),
            }
        })?;

        let machine = match route {
            Route::ReserveMachine => {
                let location_id = required_field(&request.body, "locationId")?;
                let job_id = required_field(&request.body, "jobId")?;
                self.engine.reserve_machine(location_id, job_id).await?
            }
            Route::GetMachine { machine_id } => self.engine.get_machine(&machine_id).await?,
            Route::StartMachine { machine_id } => self.engine.start_machine(&machine_id).await?,
        };
        Ok(machine)
    }

    async fn authorize(&self, token: Option<&str>) -> Result<(), DispatchError> {
        let token = token.ok_or(DispatchError::Unauthorized)?;
        if self.verifier.validate_token(token).await? {
            Ok(())
        } else {
            Err(DispatchError::Unauthorized)
        }
    }
}

fn required_field<'a>(body: &'a Value, field: &'static str) -> Result<&'a str, DispatchError> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or(DispatchError::MissingField(field))
}
