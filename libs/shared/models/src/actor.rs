use std::fmt;

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Role of the user performing an operation. Authentication happens upstream
/// (API gateway); by the time a request reaches a handler the actor identity
/// and role are already resolved and carried in the `x-actor-id` /
/// `x-actor-role` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Provider,
    Admin,
    System,
}

impl ActorRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "client" => Some(ActorRole::Client),
            "provider" => Some(ActorRole::Provider),
            "admin" => Some(ActorRole::Admin),
            "system" => Some(ActorRole::System),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, ActorRole::Admin)
    }

    pub fn is_client(&self) -> bool {
        matches!(self, ActorRole::Client)
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, ActorRole::Provider)
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Client => write!(f, "client"),
            ActorRole::Provider => write!(f, "provider"),
            ActorRole::Admin => write!(f, "admin"),
            ActorRole::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: Uuid, role: ActorRole) -> Self {
        Self { id, role }
    }

    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: ActorRole::System,
        }
    }
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id_header = parts
            .headers
            .get("x-actor-id")
            .ok_or_else(|| AppError::Forbidden("Missing x-actor-id header".to_string()))?;

        let id = id_header
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .ok_or_else(|| AppError::Forbidden("Invalid x-actor-id header".to_string()))?;

        let role_header = parts
            .headers
            .get("x-actor-role")
            .ok_or_else(|| AppError::Forbidden("Missing x-actor-role header".to_string()))?;

        let role = role_header
            .to_str()
            .ok()
            .and_then(ActorRole::parse)
            .ok_or_else(|| AppError::Forbidden("Invalid x-actor-role header".to_string()))?;

        Ok(Actor { id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!(ActorRole::parse("Provider"), Some(ActorRole::Provider));
        assert_eq!(ActorRole::parse(" ADMIN "), Some(ActorRole::Admin));
        assert_eq!(ActorRole::parse("client"), Some(ActorRole::Client));
        assert_eq!(ActorRole::parse("supervisor"), None);
    }
}
