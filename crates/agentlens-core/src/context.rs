use super::Content;

/// Read-only identifiers shared by every context the host runtime hands out
pub trait ReadonlyContext: Send + Sync {
    /// Returns the app name
    fn app_name(&self) -> &str;

    /// Returns the user ID
    fn user_id(&self) -> &str;

    /// Returns the session ID
    fn session_id(&self) -> &str;
}

/// Per-run context provided by the host runtime when an invocation starts and ends
pub trait InvocationContext: ReadonlyContext {
    /// Returns a unique ID for this invocation
    fn invocation_id(&self) -> &str;

    /// Returns the name of the root agent handling the invocation
    fn agent_name(&self) -> &str;

    /// Returns the user content that triggered this invocation
    fn user_content(&self) -> Option<&Content>;
}

/// Per-callback context provided around each agent step, model call and tool call
pub trait CallbackContext: ReadonlyContext {
    fn invocation_id(&self) -> &str;

    /// Returns the name of the agent currently executing
    fn agent_name(&self) -> &str;
}

/// Plain invocation context, mostly useful for hosts that do not carry their own
#[derive(Debug, Clone, Default)]
pub struct DefaultInvocationContext {
    invocation_id: String,
    app_name: String,
    user_id: String,
    session_id: String,
    agent_name: String,
    user_content: Option<Content>,
}

impl DefaultInvocationContext {
    pub fn new(
        invocation_id: impl Into<String>,
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            agent_name: agent_name.into(),
            user_content: None,
        }
    }

    pub fn with_user_content(mut self, content: Content) -> Self {
        self.user_content = Some(content);
        self
    }

    /// Derives the callback context for a step executed by `agent_name`.
    pub fn callback(&self, agent_name: impl Into<String>) -> DefaultCallbackContext {
        DefaultCallbackContext {
            invocation_id: self.invocation_id.clone(),
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            agent_name: agent_name.into(),
        }
    }
}

impl InvocationContext for DefaultInvocationContext {
    fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    fn agent_name(&self) -> &str {
        &self.agent_name
    }

    fn user_content(&self) -> Option<&Content> {
        self.user_content.as_ref()
    }
}

impl ReadonlyContext for DefaultInvocationContext {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefaultCallbackContext {
    invocation_id: String,
    app_name: String,
    user_id: String,
    session_id: String,
    agent_name: String,
}

impl CallbackContext for DefaultCallbackContext {
    fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

impl ReadonlyContext for DefaultCallbackContext {
    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }
}
