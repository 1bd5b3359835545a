//! The `authenticate` action: exchanges declared credentials for a session
//! token against the target's own auth endpoint, then stores the result as
//! that user's credentials so later `http_request`/`authenticate` steps pick
//! it up automatically.

use super::{optional_str, required_str, ActionError};
use crate::context::Context;
use crate::registries::ActionHandler;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub struct AuthenticateAction;

#[async_trait]
impl ActionHandler for AuthenticateAction {
    fn action_type(&self) -> &'static str {
        "authenticate"
    }

    async fn execute(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let auth_type = required_str(params, "auth_type")?;
        let user = match optional_str(params, "user_context") {
            Some(user) => ctx.substitute(user)?,
            None => ctx
                .active_user
                .clone()
                .ok_or(crate::context::auth::AuthError::NoUserContext)?,
        };

        let credentials = match auth_type {
            "basic" => {
                let username = ctx.substitute(required_str(params, "username")?)?;
                let password = ctx.substitute(required_str(params, "password")?)?;
                json!({"username": username, "password": password, "type": "basic"})
            }
            "api_key" => {
                let api_key = ctx.substitute(required_str(params, "api_key")?)?;
                let header = optional_str(params, "api_key_header").unwrap_or("X-API-Key");
                json!({"api_key": api_key, "api_key_header": header, "type": "api_key"})
            }
            "form" | "oauth2_password" | "oauth2_client_credentials" => {
                self.login_via_http(ctx, auth_type, params).await?
            }
            other => {
                return Err(ActionError::InvalidParam(
                    "auth_type",
                    format!("unsupported auth_type '{other}'"),
                ))
            }
        };

        ctx.set(&format!("users.{user}.credentials"), credentials.clone())?;
        ctx.active_user = Some(user);
        Ok(credentials)
    }
}

impl AuthenticateAction {
    async fn login_via_http(
        &self,
        ctx: &mut Context,
        auth_type: &str,
        params: &Value,
    ) -> Result<Value, ActionError> {
        match auth_type {
            "form" => self.login_via_form(ctx, params).await,
            _ => self.login_via_oauth(ctx, auth_type, params).await,
        }
    }

    async fn login_via_form(&self, ctx: &mut Context, params: &Value) -> Result<Value, ActionError> {
        let login_url = ctx.substitute(required_str(params, "login_url")?)?;
        let username_field = required_str(params, "username_field")?;
        let password_field = required_str(params, "password_field")?;
        let username = ctx.substitute(required_str(params, "username")?)?;
        let password = ctx.substitute(required_str(params, "password")?)?;

        let mut form: Vec<(String, String)> =
            vec![(username_field.to_string(), username), (password_field.to_string(), password)];
        if let Some(Value::Object(additional)) = params.get("additional_fields") {
            for (key, value) in additional {
                form.push((key.clone(), ctx.substitute(&crate::functions::stringify(value))?));
            }
        }

        let response = ctx.http_client.post(&login_url).form(&form).send().await?;
        let status = response.status();

        let mut cookies: Map<String, Value> = Map::new();
        for value in response.headers().get_all(reqwest::header::SET_COOKIE) {
            if let Ok(raw) = value.to_str() {
                if let Some((name, rest)) = raw.split_once('=') {
                    let cookie_value = rest.split(';').next().unwrap_or("").to_string();
                    cookies.insert(name.to_string(), Value::String(cookie_value));
                }
            }
        }

        if !status.is_success() {
            return Err(ActionError::AuthenticationFailed(format!(
                "login to {login_url} returned status {}",
                status.as_u16()
            )));
        }

        let mut credentials = json!({"type": "form"});
        if let Some(map) = credentials.as_object_mut() {
            for (name, value) in cookies {
                map.insert(name, value);
            }
        }
        Ok(credentials)
    }

    async fn login_via_oauth(
        &self,
        ctx: &mut Context,
        auth_type: &str,
        params: &Value,
    ) -> Result<Value, ActionError> {
        let token_url = ctx.substitute(required_str(params, "token_url")?)?;

        let mut form: Vec<(String, String)> = Vec::new();
        match auth_type {
            "oauth2_client_credentials" => {
                form.push(("grant_type".into(), "client_credentials".into()));
                form.push(("client_id".into(), ctx.substitute(required_str(params, "client_id")?)?));
                form.push((
                    "client_secret".into(),
                    ctx.substitute(required_str(params, "client_secret")?)?,
                ));
            }
            "oauth2_password" => {
                form.push(("grant_type".into(), "password".into()));
                form.push(("username".into(), ctx.substitute(required_str(params, "username")?)?));
                form.push(("password".into(), ctx.substitute(required_str(params, "password")?)?));
                if let Some(client_secret) = optional_str(params, "client_secret") {
                    form.push(("client_secret".into(), ctx.substitute(client_secret)?));
                }
            }
            other => {
                return Err(ActionError::InvalidParam(
                    "auth_type",
                    format!("unsupported auth_type '{other}'"),
                ))
            }
        }
        if let Some(scope) = optional_str(params, "scope") {
            form.push(("scope".into(), ctx.substitute(scope)?));
        }

        let response = ctx.http_client.post(&token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::AuthenticationFailed(format!(
                "token request to {token_url} returned status {}",
                status.as_u16()
            )));
        }
        let body: Value = response.json().await?;

        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionError::AuthenticationFailed("response has no access_token".to_string()))?;

        let mut credentials = json!({"bearer_token": access_token, "type": "oauth2"});
        if let Some(refresh_token) = body.get("refresh_token").and_then(Value::as_str) {
            credentials["refresh_token"] = Value::String(refresh_token.to_string());
        }
        if let Some(expires_in) = body.get("expires_in") {
            credentials["expires_in"] = expires_in.clone();
        }
        if let Some(token_type) = body.get("token_type").and_then(Value::as_str) {
            credentials["token_type"] = Value::String(token_type.to_string());
        }
        Ok(credentials)
    }
}
