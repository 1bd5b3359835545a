//! Credential resolution and request authentication.
//!
//! A [`CredentialResolver`] maps a user id (or an opaque `credentials_ref`)
//! to a bag of named credentials. The provider tries each resolver in order
//! and applies the first bag it finds to an outgoing request.

use super::Context;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no user context available for authentication")]
    NoUserContext,
    #[error("no credential resolvers registered")]
    NoCredentialResolvers,
    #[error("no credentials found for user '{0}'")]
    CredentialNotFound(String),
}

pub trait CredentialResolver: Send + Sync {
    /// Returns the credential bag for `user`, or `None` if this resolver
    /// does not recognize the user.
    fn resolve(&self, context: &Context, user: &str) -> Option<Value>;
}

/// Reads credentials declared inline in the PoC document, at
/// `users.<id>.credentials`. This is always registered and is the only
/// resolver the core engine ships; external callers may add others (e.g. a
/// vault-backed resolver keyed on `credentials_ref`) via
/// [`Context::with_resolvers`](super::Context::with_resolvers).
pub struct InlineCredentialResolver;

impl CredentialResolver for InlineCredentialResolver {
    fn resolve(&self, context: &Context, user: &str) -> Option<Value> {
        context
            .resolve(&format!("users.{user}.credentials"))
            .ok()
            .cloned()
    }
}

fn resolve_credentials(context: &Context, user: &str) -> Result<Value, AuthError> {
    if context.resolvers().is_empty() {
        return Err(AuthError::NoCredentialResolvers);
    }
    for resolver in context.resolvers() {
        if let Some(bag) = resolver.resolve(context, user) {
            return Ok(bag);
        }
    }
    Err(AuthError::CredentialNotFound(user.to_string()))
}

/// Applies the resolved credential bag for `user` (or the context's active
/// user) to `builder`, per §4.1's precedence: bearer, basic, api key,
/// cookie, then a raw `headers` bag, any/all of which may be present.
pub fn apply_authentication(
    context: &Context,
    mut builder: reqwest::RequestBuilder,
    user: Option<&str>,
) -> Result<reqwest::RequestBuilder, AuthError> {
    let user = user
        .map(str::to_string)
        .or_else(|| context.active_user.clone())
        .ok_or(AuthError::NoUserContext)?;

    let creds = resolve_credentials(context, &user)?;

    if let Some(token) = creds.get("bearer_token").and_then(Value::as_str) {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }

    if let (Some(username), Some(password)) = (
        creds.get("username").and_then(Value::as_str),
        creds.get("password").and_then(Value::as_str),
    ) {
        builder = builder.basic_auth(username, Some(password));
    }

    if let Some(api_key) = creds.get("api_key").and_then(Value::as_str) {
        let header = creds
            .get("api_key_header")
            .and_then(Value::as_str)
            .unwrap_or("X-API-Key");
        builder = builder.header(header, api_key);
    }

    if let Some(cookie) = creds.get("cookie").and_then(Value::as_str) {
        let cookie_name = creds
            .get("cookie_name")
            .and_then(Value::as_str)
            .unwrap_or("session");
        builder = builder.header("Cookie", format!("{cookie_name}={cookie}"));
    }

    if let Some(Value::Object(headers)) = creds.get("headers") {
        for (key, value) in headers {
            if let Some(value) = value.as_str() {
                builder = builder.header(key, value);
            }
        }
    }

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inline_resolver_reads_declared_user_credentials() {
        let mut ctx = Context::new();
        ctx.set(
            "users.victim.credentials",
            json!({"bearer_token": "abc"}),
        )
        .unwrap();

        let creds = InlineCredentialResolver.resolve(&ctx, "victim").unwrap();
        assert_eq!(creds["bearer_token"], "abc");
    }

    #[test]
    fn apply_authentication_requires_a_user() {
        let ctx = Context::new();
        let builder = ctx.http_client.get("http://example.test");
        let err = apply_authentication(&ctx, builder, None).unwrap_err();
        assert!(matches!(err, AuthError::NoUserContext));
    }

    #[test]
    fn apply_authentication_falls_back_to_credential_not_found() {
        let mut ctx = Context::new();
        ctx.active_user = Some("ghost".to_string());
        let builder = ctx.http_client.get("http://example.test");
        let err = apply_authentication(&ctx, builder, None).unwrap_err();
        assert!(matches!(err, AuthError::CredentialNotFound(_)));
    }
}
