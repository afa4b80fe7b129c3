//! Bearer token gate for protected routes.
//!
//! The gate only deals with the shape of the `Authorization` header; deciding
//! whether a token is good is delegated to a [`TokenVerifier`] chosen at startup.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ring::hmac;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ClothSegError, Result};
use crate::pipeline::PipelineState;
use crate::traits::TokenVerifier;

pub const BEARER_SCHEME: &str = "bearer";

/// Credential parsed from an `Authorization` header. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    scheme: String,
    token: String,
}

impl Credential {
    /// Split `<scheme> <token>`. Returns `None` when either part is missing, which
    /// the gate treats the same as an absent header.
    pub fn parse(header_value: &str) -> Option<Self> {
        let (scheme, token) = header_value.trim().split_once(char::is_whitespace)?;
        let token = token.trim();
        if scheme.is_empty() || token.is_empty() {
            return None;
        }
        Some(Self {
            scheme: scheme.to_string(),
            token: token.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_bearer(&self) -> bool {
        self.scheme.eq_ignore_ascii_case(BEARER_SCHEME)
    }
}

/// Caller resolved by a verifier, attached to the request as an extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub issuer: Option<String>,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            issuer: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }
}

#[derive(Clone)]
pub struct TokenGate {
    verifier: Arc<dyn TokenVerifier>,
    auto_reject: bool,
}

impl TokenGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>, auto_reject: bool) -> Self {
        Self {
            verifier,
            auto_reject,
        }
    }

    pub fn verifier_name(&self) -> &'static str {
        self.verifier.name()
    }

    /// An absent header (or one with nothing after the scheme) is a missing
    /// credential. A header that is present but not visible ASCII is malformed
    /// and rejected as forbidden regardless of `auto_reject`.
    pub fn authenticate(&self, header_value: Option<&HeaderValue>) -> Result<Identity> {
        let credential = match header_value {
            Some(value) => {
                let value = value.to_str().map_err(|_| {
                    ClothSegError::forbidden("Invalid authentication credentials.")
                })?;
                Credential::parse(value)
            }
            None => None,
        };

        let Some(credential) = credential else {
            if self.auto_reject {
                return Err(ClothSegError::unauthenticated("Not authenticated"));
            }
            return Ok(Identity::anonymous());
        };

        if !credential.is_bearer() {
            return Err(ClothSegError::forbidden("Invalid authentication scheme."));
        }

        self.verifier.verify(credential.token())
    }
}

/// Runs the gate before every route it is layered on; nothing behind it executes
/// for a rejected request. Accepted requests carry their [`Identity`] and the
/// [`PipelineState`] they reached as extensions.
pub async fn token_gate_middleware(
    State(gate): State<TokenGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let mut state = PipelineState::Received;
    match gate.authenticate(request.headers().get(header::AUTHORIZATION)) {
        Ok(identity) => {
            state.advance(PipelineState::Authenticated);
            debug!(
                %path,
                subject = %identity.subject,
                verifier = gate.verifier_name(),
                "token accepted"
            );
            request.extensions_mut().insert(identity);
            request.extensions_mut().insert(state);
            next.run(request).await
        }
        Err(err) => {
            warn!(
                %path,
                %state,
                error_kind = err.kind().as_str(),
                verifier = gate.verifier_name(),
                "token rejected: {err}"
            );
            err.into_response()
        }
    }
}

/// Accepts every syntactically valid bearer token without checking it.
///
/// This is the behaviour the service historically shipped with; it performs no
/// identity verification at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyBearer;

impl TokenVerifier for AcceptAnyBearer {
    fn verify(&self, _token: &str) -> Result<Identity> {
        Ok(Identity::new("unverified"))
    }

    fn name(&self) -> &'static str {
        "accept-any-bearer"
    }
}

/// Verifies HS256-signed JWTs against a shared secret.
///
/// `exp` is enforced when present, `iss` when an issuer is configured. `sub`
/// becomes the identity's subject.
pub struct Hs256Verifier {
    key: hmac::Key,
    issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: Option<String>,
    iss: Option<String>,
    exp: Option<u64>,
}

impl Hs256Verifier {
    pub fn new(secret: &[u8], issuer: Option<String>) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            issuer,
        }
    }
}

impl TokenVerifier for Hs256Verifier {
    fn verify(&self, token: &str) -> Result<Identity> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(ClothSegError::forbidden("Malformed token."));
        };

        let jwt_header: JwtHeader = decode_segment(header)?;
        if jwt_header.alg != "HS256" {
            return Err(ClothSegError::forbidden("Unsupported token algorithm."));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| ClothSegError::forbidden("Malformed token."))?;
        let signed = &token[..header.len() + 1 + payload.len()];
        hmac::verify(&self.key, signed.as_bytes(), &signature)
            .map_err(|_| ClothSegError::forbidden("Invalid token signature."))?;

        let claims: JwtClaims = decode_segment(payload)?;
        if let Some(exp) = claims.exp {
            if exp <= unix_now_secs() {
                return Err(ClothSegError::forbidden("Token expired."));
            }
        }
        if let Some(expected) = &self.issuer {
            if claims.iss.as_deref() != Some(expected.as_str()) {
                return Err(ClothSegError::forbidden("Unexpected token issuer."));
            }
        }

        Ok(Identity {
            subject: claims.sub.unwrap_or_else(|| "unknown".to_string()),
            issuer: claims.iss,
        })
    }

    fn name(&self) -> &'static str {
        "hs256-jwt"
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| ClothSegError::forbidden("Malformed token."))?;
    serde_json::from_slice(&bytes).map_err(|_| ClothSegError::forbidden("Malformed token."))
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
