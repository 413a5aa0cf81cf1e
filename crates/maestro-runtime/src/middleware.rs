//! Agent middleware chain.
//!
//! Built-in order is sanitizer, then event-emitter, then user-declared
//! middleware, with the step template applied last.

use maestro_core::ChatMessage;

/// Hook run over an agent's inbound messages before each invocation.
pub trait AgentMiddleware: Send + Sync {
    fn name(&self) -> &str;

    fn on_invoking(&self, messages: &mut Vec<ChatMessage>);
}

/// Drops null/empty messages before they reach the model.
pub struct MessageSanitizer;

impl AgentMiddleware for MessageSanitizer {
    fn name(&self) -> &str {
        "message_sanitizer"
    }

    fn on_invoking(&self, messages: &mut Vec<ChatMessage>) {
        messages.retain(|m| !m.is_empty());
    }
}

/// Reserved for per-agent observability.
///
/// Events are emitted by the engine around executor invocations; this stays a
/// pass-through so agent responses are not reported twice.
pub struct EventEmitter {
    agent_name: String,
}

impl EventEmitter {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }
}

impl AgentMiddleware for EventEmitter {
    fn name(&self) -> &str {
        "event_emitter"
    }

    fn on_invoking(&self, _messages: &mut Vec<ChatMessage>) {}
}

/// Rewrites the latest inbound message through a step template.
///
/// `{{user_input}}` and `{{previous_output}}` are both replaced with the text
/// of the latest inbound message; the two names are equivalent. A template
/// without either placeholder is prepended to that text. The message role is
/// preserved.
pub struct TemplateMiddleware {
    template: String,
}

impl TemplateMiddleware {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl AgentMiddleware for TemplateMiddleware {
    fn name(&self) -> &str {
        "template"
    }

    fn on_invoking(&self, messages: &mut Vec<ChatMessage>) {
        let Some(last) = messages.last_mut() else { return };
        let inbound = last.text.clone();

        let has_placeholder =
            self.template.contains("{{user_input}}") || self.template.contains("{{previous_output}}");

        last.text = if has_placeholder {
            self.template
                .replace("{{user_input}}", &inbound)
                .replace("{{previous_output}}", &inbound)
        } else {
            format!("{}\n\nUser input: {}", self.template, inbound)
        };
    }
}
