//! Per-request context.

use std::fmt;

use super::gate::AuthenticationGate;
use super::identity::UserIdentity;
use crate::{Result, StorageError};

/// Header carrying the trace ID in both directions.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Maximum accepted length of an inbound trace ID.
const MAX_TRACE_ID_LENGTH: usize = 128;

/// Correlation ID attached to every log line and response of one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// Generate a fresh trace ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Reuse an inbound trace ID if it is usable, otherwise generate one.
    pub fn from_inbound(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v)
                if !v.is_empty()
                    && v.len() <= MAX_TRACE_ID_LENGTH
                    && v.bytes().all(|b| b.is_ascii_graphic()) =>
            {
                Self(v.to_string())
            }
            _ => Self::generate(),
        }
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether an operation needs an authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityRequirement {
    /// Fail with `Unauthorized` unless the credential is valid.
    Required,
    /// Authenticate if possible, proceed anonymously otherwise.
    Optional,
}

/// Identity and trace ID of one request.
///
/// Built once per request and never shared between requests.
#[derive(Debug)]
pub struct RequestContext {
    identity: Option<UserIdentity>,
    trace_id: TraceId,
}

impl RequestContext {
    /// Build a context, consulting the gate.
    pub async fn build(
        gate: &AuthenticationGate,
        credential: Option<&str>,
        trace_id: TraceId,
        requirement: IdentityRequirement,
    ) -> Result<Self> {
        let identity = match requirement {
            IdentityRequirement::Required => Some(gate.authenticate(credential).await?),
            IdentityRequirement::Optional => match credential {
                Some(_) => gate.authenticate(credential).await.ok(),
                None => None,
            },
        };

        Ok(Self { identity, trace_id })
    }

    /// Context for an already authenticated identity.
    pub fn authenticated(identity: UserIdentity, trace_id: TraceId) -> Self {
        Self {
            identity: Some(identity),
            trace_id,
        }
    }

    /// Context without an identity.
    pub fn anonymous(trace_id: TraceId) -> Self {
        Self {
            identity: None,
            trace_id,
        }
    }

    /// The authenticated identity, or `Unauthorized`.
    pub fn identity(&self) -> Result<&UserIdentity> {
        self.identity
            .as_ref()
            .ok_or_else(|| StorageError::Unauthorized("authentication required".to_string()))
    }

    /// The user ID if authenticated.
    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }

    /// Trace ID of this request.
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }
}
