//! Process-wide handler registries for actions, checks, and extractors.
//!
//! Each registry maps a `type` string from the PoC document to a boxed
//! trait object. Registration happens once, at startup, via
//! [`default_actions`], [`default_checks`], and [`default_extractors`];
//! callers embedding this crate as a library may build their own registry
//! with additional or substitute handlers instead of calling those.

use crate::context::Context;
use crate::errors::ErrorCode;
use crate::protocol::ResponseAction;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no handler registered for type '{0}'")]
    UnknownHandler(String),
    #[error("a handler for type '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownHandler(_) => ErrorCode::UNKNOWN_HANDLER,
            Self::AlreadyRegistered(_) => ErrorCode::HANDLER_ALREADY_REGISTERED,
        }
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> &'static str;
    async fn execute(
        &self,
        ctx: &mut Context,
        params: &Value,
    ) -> Result<Value, crate::actions::ActionError>;
}

#[async_trait]
pub trait CheckHandler: Send + Sync {
    fn check_type(&self) -> &'static str;
    async fn check(
        &self,
        ctx: &mut Context,
        params: &Value,
    ) -> Result<(), crate::checks::CheckError>;
}

pub trait ExtractorHandler: Send + Sync {
    fn extractor_type(&self) -> &'static str;
    fn extract(
        &self,
        ctx: &Context,
        source: &Value,
        action: &ResponseAction,
    ) -> Result<Value, crate::extractors::ExtractError>;
}

pub struct Registry<H: ?Sized> {
    handlers: HashMap<&'static str, Box<H>>,
}

impl<H: ?Sized> Registry<H> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: &'static str, handler: Box<H>) -> Result<(), RegistryError> {
        if self.handlers.contains_key(key) {
            return Err(RegistryError::AlreadyRegistered(key.to_string()));
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&H, RegistryError> {
        self.handlers
            .get(key)
            .map(|b| b.as_ref())
            .ok_or_else(|| RegistryError::UnknownHandler(key.to_string()))
    }
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self::new()
    }
}

pub type ActionRegistry = Registry<dyn ActionHandler>;
pub type CheckRegistry = Registry<dyn CheckHandler>;
pub type ExtractorRegistry = Registry<dyn ExtractorHandler>;

pub fn default_actions() -> ActionRegistry {
    let mut reg = ActionRegistry::new();
    macro_rules! add {
        ($h:expr) => {
            let handler = Box::new($h);
            reg.register(handler.action_type(), handler)
                .expect("default action handlers use distinct type names");
        };
    }
    add!(crate::actions::http_request::HttpRequestAction);
    add!(crate::actions::authenticate::AuthenticateAction);
    add!(crate::actions::check_target_availability::CheckTargetAvailabilityAction);
    add!(crate::actions::ensure_resource_exists::EnsureResourceExistsAction);
    add!(crate::actions::execute_local_commands::ExecuteLocalCommandsAction);
    add!(crate::actions::wait::WaitAction);
    add!(crate::actions::generate_data::GenerateDataAction);
    add!(crate::actions::manual_action::ManualAction);
    reg
}

pub fn default_checks() -> CheckRegistry {
    let mut reg = CheckRegistry::new();
    macro_rules! add {
        ($h:expr) => {
            let handler = Box::new($h);
            reg.register(handler.check_type(), handler)
                .expect("default check handlers use distinct type names");
        };
    }
    add!(crate::checks::http_checks::HttpResponseStatus);
    add!(crate::checks::http_checks::HttpResponseBody);
    add!(crate::checks::http_checks::HttpResponseHeader);
    add!(crate::checks::variable_checks::VariableEquals);
    add!(crate::checks::variable_checks::VariableContains);
    add!(crate::checks::variable_checks::VariableRegex);
    add!(crate::checks::json_checks::JsonPath);
    add!(crate::checks::json_checks::JsonSchemaValidation);
    add!(crate::checks::resource_checks::CheckRemoteResource);
    add!(crate::checks::expected_error::ExpectedError);
    reg
}

pub fn default_extractors() -> ExtractorRegistry {
    let mut reg = ExtractorRegistry::new();
    macro_rules! add {
        ($h:expr) => {
            let handler = Box::new($h);
            reg.register(handler.extractor_type(), handler)
                .expect("default extractor handlers use distinct type names");
        };
    }
    add!(crate::extractors::JsonPathExtractor);
    add!(crate::extractors::RegexExtractor);
    add!(crate::extractors::HeaderExtractor);
    add!(crate::extractors::HtmlExtractor);
    add!(crate::extractors::XmlExtractor);
    reg
}
