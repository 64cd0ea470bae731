//! Ambient identifiers carried in the OpenTelemetry [`Context`].
//!
//! The host runtime hands the plugin an invocation context when a run starts
//! and a callback context around every step. Their identifiers are captured as
//! [`RuntimeScope`] values and stored in the OpenTelemetry context the host
//! uses as the parent of its spans, so the enrichment processor can read them
//! back in `on_start`.
//!
//! Resolution order for each field: callback scope, invocation scope,
//! configuration, environment variable, sentinel.

use crate::attributes::*;
use agentlens_core::{CallbackContext, InvocationContext, LensConfig};
use opentelemetry::Context;
use std::fmt;
use std::sync::Arc;

/// Identifiers a runtime context may supply. Empty strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFields {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub app_name: Option<String>,
    pub invocation_id: Option<String>,
    pub agent_name: Option<String>,
    pub model_provider: Option<String>,
    pub call_type: Option<String>,
}

impl ScopeFields {
    pub fn from_invocation(ctx: &dyn InvocationContext) -> Self {
        Self {
            session_id: non_empty(ctx.session_id()),
            user_id: non_empty(ctx.user_id()),
            app_name: non_empty(ctx.app_name()),
            invocation_id: non_empty(ctx.invocation_id()),
            agent_name: non_empty(ctx.agent_name()),
            ..Default::default()
        }
    }

    pub fn from_callback(ctx: &dyn CallbackContext) -> Self {
        Self {
            session_id: non_empty(ctx.session_id()),
            user_id: non_empty(ctx.user_id()),
            app_name: non_empty(ctx.app_name()),
            invocation_id: non_empty(ctx.invocation_id()),
            agent_name: non_empty(ctx.agent_name()),
            ..Default::default()
        }
    }

    pub fn with_model_provider(mut self, provider: impl Into<String>) -> Self {
        self.model_provider = non_empty(&provider.into());
        self
    }

    pub fn with_call_type(mut self, call_type: impl Into<String>) -> Self {
        self.call_type = non_empty(&call_type.into());
        self
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// A runtime context captured at one of the two granularities the host offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeScope {
    Invocation(ScopeFields),
    Callback(ScopeFields),
}

impl RuntimeScope {
    pub fn fields(&self) -> &ScopeFields {
        match self {
            RuntimeScope::Invocation(fields) | RuntimeScope::Callback(fields) => fields,
        }
    }
}

/// The scopes active for a context, at most one of each variant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveScopes {
    callback: Option<ScopeFields>,
    invocation: Option<ScopeFields>,
}

impl ActiveScopes {
    /// Returns a copy with `scope` replacing any scope of the same variant.
    pub fn with(&self, scope: RuntimeScope) -> Self {
        let mut next = self.clone();
        match scope {
            RuntimeScope::Invocation(fields) => next.invocation = Some(fields),
            RuntimeScope::Callback(fields) => next.callback = Some(fields),
        }
        next
    }

    /// Scopes in preference order: callback first, then invocation.
    pub fn preferred(&self) -> impl Iterator<Item = &ScopeFields> {
        self.callback.iter().chain(self.invocation.iter())
    }

    fn first<F>(&self, field: F) -> Option<String>
    where
        F: Fn(&ScopeFields) -> Option<&String>,
    {
        self.preferred().find_map(|fields| field(fields).cloned())
    }
}

/// Attaches and reads [`RuntimeScope`]s on an OpenTelemetry [`Context`]
pub trait ScopeContextExt {
    fn with_runtime_scope(&self, scope: RuntimeScope) -> Context;

    fn runtime_scopes(&self) -> Option<&ActiveScopes>;
}

impl ScopeContextExt for Context {
    fn with_runtime_scope(&self, scope: RuntimeScope) -> Context {
        let scopes = self
            .get::<ActiveScopes>()
            .cloned()
            .unwrap_or_default()
            .with(scope);
        self.with_value(scopes)
    }

    fn runtime_scopes(&self) -> Option<&ActiveScopes> {
        self.get::<ActiveScopes>()
    }
}

/// Fully resolved identifiers stamped on every span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedScope {
    pub session_id: String,
    pub user_id: String,
    pub app_name: String,
    pub invocation_id: String,
    pub agent_name: String,
    pub model_provider: String,
    pub call_type: String,
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves [`ResolvedScope`] from a context, the loaded configuration and the environment.
#[derive(Clone)]
pub struct AmbientResolver {
    app_name: Option<String>,
    model_provider: Option<String>,
    env: EnvLookup,
}

impl fmt::Debug for AmbientResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientResolver")
            .field("app_name", &self.app_name)
            .field("model_provider", &self.model_provider)
            .finish_non_exhaustive()
    }
}

impl Default for AmbientResolver {
    fn default() -> Self {
        Self {
            app_name: None,
            model_provider: None,
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }
}

impl AmbientResolver {
    pub fn from_config(config: &LensConfig) -> Self {
        Self {
            app_name: config
                .observability
                .effective_app_name()
                .map(str::to_string),
            model_provider: config
                .model
                .provider
                .clone()
                .filter(|provider| !provider.is_empty()),
            ..Default::default()
        }
    }

    /// Replaces the environment lookup, mostly so tests do not touch the process env.
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    pub fn resolve(&self, cx: &Context) -> ResolvedScope {
        let scopes = cx.runtime_scopes().cloned().unwrap_or_default();

        ResolvedScope {
            session_id: scopes
                .first(|f| f.session_id.as_ref())
                .or_else(|| self.env_var(ENV_SESSION_ID))
                .unwrap_or_else(|| FALLBACK_SESSION_ID.to_string()),
            user_id: scopes
                .first(|f| f.user_id.as_ref())
                .or_else(|| self.env_var(ENV_USER_ID))
                .unwrap_or_else(|| FALLBACK_USER_ID.to_string()),
            app_name: scopes
                .first(|f| f.app_name.as_ref())
                .or_else(|| self.app_name.clone())
                .or_else(|| self.env_var(ENV_APP_NAME))
                .unwrap_or_else(|| FALLBACK_APP_NAME.to_string()),
            invocation_id: scopes
                .first(|f| f.invocation_id.as_ref())
                .unwrap_or_else(|| FALLBACK_INVOCATION_ID.to_string()),
            agent_name: scopes
                .first(|f| f.agent_name.as_ref())
                .unwrap_or_else(|| FALLBACK_AGENT_NAME.to_string()),
            model_provider: scopes
                .first(|f| f.model_provider.as_ref())
                .or_else(|| self.model_provider.clone())
                .or_else(|| self.env_var(ENV_MODEL_PROVIDER))
                .unwrap_or_else(|| FALLBACK_MODEL_PROVIDER.to_string()),
            call_type: scopes
                .first(|f| f.call_type.as_ref())
                .or_else(|| self.env_var(ENV_CALL_TYPE))
                .unwrap_or_else(|| DEFAULT_CALL_TYPE.to_string()),
        }
    }

    /// Model provider alone, for metric dimensions recorded outside span start.
    pub fn model_provider(&self, cx: &Context) -> String {
        self.resolve(cx).model_provider
    }

    fn env_var(&self, key: &str) -> Option<String> {
        (self.env)(key).filter(|value| !value.is_empty())
    }
}
