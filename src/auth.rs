use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppState, error::AppError, models::Role};

/// Subject id carried by admin tokens. The admin is configuration, not a
/// stored record, so it has no generated id.
pub const ADMIN_SUBJECT_ID: Uuid = Uuid::nil();

/// Claims
///
/// Payload of an identity token, signed with the process-wide secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the account id (nil for the admin).
    pub sub: Uuid,
    /// The role the subject authenticated as.
    pub role: Role,
    /// Expiration Time (exp), seconds since the epoch.
    pub exp: usize,
    /// Issued At (iat), seconds since the epoch.
    pub iat: usize,
}

/// Principal
///
/// The authenticated identity attached to a request after token verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: Uuid,
    pub role: Role,
}

impl Principal {
    /// Guard check against a route's allowed-role set.
    pub fn require(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role '{}' may not access this route",
                self.role
            )))
        }
    }
}

/// TokenError
///
/// Why `verify` rejected a token. Handlers only see `AppError::InvalidToken`;
/// the distinction is kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    BadSignature,
    Malformed,
}

/// TokenService
///
/// Issues and verifies signed, time-limited identity tokens. Pure function of
/// the secret, the payload and the clock: no session store.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").finish_non_exhaustive()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        // An expired token must always fail, so no clock-skew allowance.
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(&self, subject_id: Uuid, role: Role, ttl: Duration) -> Result<String, AppError> {
        let now = now_secs();
        let claims = Claims {
            sub: subject_id,
            role,
            iat: now as usize,
            exp: now.saturating_add(ttl.as_secs()) as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            }
        })?;

        // `validate_exp` uses a strict `exp < now` check; treat the boundary second as expired too.
        if data.claims.exp as u64 <= now_secs() {
            return Err(TokenError::Expired);
        }

        Ok(Principal {
            subject_id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

/// bearer_token
///
/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthenticated)
}

/// authenticate
///
/// Header → verified principal. Missing header is `Unauthenticated`, a token
/// that fails verification is `InvalidToken`.
pub fn authenticate(headers: &HeaderMap, tokens: &TokenService) -> Result<Principal, AppError> {
    let token = bearer_token(headers)?;
    tokens.verify(token).map_err(|reason| {
        tracing::debug!(?reason, "token rejected");
        AppError::InvalidToken
    })
}

/// authorize
///
/// The full guard decision for one request: authenticate, then check the role
/// against the route's allowed set.
pub fn authorize(
    headers: &HeaderMap,
    tokens: &TokenService,
    allowed: &[Role],
) -> Result<Principal, AppError> {
    let principal = authenticate(headers, tokens)?;
    principal.require(allowed)?;
    Ok(principal)
}

/// Principal Extractor Implementation
///
/// Handlers take `Principal` as an argument. The guard middleware has normally
/// already verified the token and stored the principal in the request
/// extensions; otherwise the token is verified here.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
    TokenService: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(principal) = parts.extensions.get::<Principal>() {
            return Ok(*principal);
        }
        let tokens = TokenService::from_ref(state);
        authenticate(&parts.headers, &tokens)
    }
}

// --- Route-group guards ---
//
// One middleware per allowed-role set, applied with `route_layer` in `create_router`.

pub const ANY_ROLE: &[Role] = &[Role::Admin, Role::Mentor, Role::Student];
pub const STAFF: &[Role] = &[Role::Admin, Role::Mentor];
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const MENTOR_ONLY: &[Role] = &[Role::Mentor];
pub const STUDENT_ONLY: &[Role] = &[Role::Student];

async fn guard(
    state: &AppState,
    mut request: Request,
    next: Next,
    allowed: &[Role],
) -> Result<Response, AppError> {
    let principal = authorize(request.headers(), &state.tokens, allowed)?;
    tracing::debug!(subject = %principal.subject_id, role = %principal.role, "request authorized");
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

pub async fn require_any_role(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard(&state, request, next, ANY_ROLE).await
}

pub async fn require_staff(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard(&state, request, next, STAFF).await
}

pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard(&state, request, next, ADMIN_ONLY).await
}

pub async fn require_mentor(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard(&state, request, next, MENTOR_ONLY).await
}

pub async fn require_student(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    guard(&state, request, next, STUDENT_ONLY).await
}
