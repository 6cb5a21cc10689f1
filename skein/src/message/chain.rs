//! Ordered message chain: builder, filters, token estimate, validators.
//!
//! The chain is immutable-style: [`MessageChain::push`] returns a new chain and
//! leaves the receiver untouched, so loop code can hand snapshots to middleware
//! without aliasing the authoritative history.
//!
//! Two validators guard different boundaries. [`MessageChain::validate`] checks
//! the history invariants that must hold on any persisted state.
//! [`MessageChain::validate_user_input`] is stricter and applies only to
//! externally submitted messages: a caller must not be able to inject
//! fabricated assistant output or tool results into a thread.

use std::collections::HashSet;

use crate::error::AgentError;
use crate::message::{Message, Role};

/// Ordered sequence of messages with a fluent, non-mutating builder.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageChain {
    messages: Vec<Message>,
}

impl MessageChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new chain with `message` appended. The receiver is unchanged.
    pub fn push(&self, message: Message) -> Self {
        let mut messages = self.messages.clone();
        messages.push(message);
        Self { messages }
    }

    /// Returns a new chain with all of `tail` appended.
    pub fn extend(&self, tail: impl IntoIterator<Item = Message>) -> Self {
        let mut messages = self.messages.clone();
        messages.extend(tail);
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Messages of the given role, in order.
    pub fn by_role(&self, role: Role) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.role == role)
    }

    /// Sum of per-message token estimates.
    pub fn estimate_tokens(&self) -> usize {
        estimate_tokens(&self.messages)
    }

    /// Checks the history invariants; fails on the first offending message.
    pub fn validate(&self) -> Result<(), AgentError> {
        validate(&self.messages)
    }

    /// Trust-boundary check for externally submitted messages.
    pub fn validate_user_input(&self) -> Result<(), AgentError> {
        validate_user_input(&self.messages)
    }
}

impl From<Vec<Message>> for MessageChain {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl FromIterator<Message> for MessageChain {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().collect(),
        }
    }
}

/// Sum of per-message token estimates over a slice.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(Message::estimate_tokens).sum()
}

/// Checks the history invariants over a slice; fails on the first offender.
///
/// Invariants: tool messages carry correlation id and tool name; assistant
/// messages have content or at least one call; every call has id and name;
/// every tool message answers a prior assistant call in the same sequence;
/// system and user messages have non-empty content.
pub fn validate(messages: &[Message]) -> Result<(), AgentError> {
    let mut seen_call_ids: HashSet<&str> = HashSet::new();
    for (index, m) in messages.iter().enumerate() {
        match m.role {
            Role::System | Role::User => {
                if m.content.is_empty() {
                    return Err(AgentError::InvalidMessage {
                        index,
                        reason: format!("{} message has empty content", m.role),
                    });
                }
            }
            Role::Assistant => {
                if m.content.is_empty() && m.tool_calls.is_empty() {
                    return Err(AgentError::InvalidMessage {
                        index,
                        reason: "assistant message has neither content nor tool calls".into(),
                    });
                }
                for call in &m.tool_calls {
                    if call.id.is_empty() || call.name.is_empty() {
                        return Err(AgentError::InvalidMessage {
                            index,
                            reason: "tool call missing id or name".into(),
                        });
                    }
                    seen_call_ids.insert(call.id.as_str());
                }
            }
            Role::Tool => {
                let id = match m.tool_call_id.as_deref() {
                    Some(id) if !id.is_empty() => id,
                    _ => {
                        return Err(AgentError::InvalidMessage {
                            index,
                            reason: "tool message missing tool_call_id".into(),
                        })
                    }
                };
                if m.name.as_deref().unwrap_or("").is_empty() {
                    return Err(AgentError::InvalidMessage {
                        index,
                        reason: "tool message missing tool name".into(),
                    });
                }
                if !seen_call_ids.contains(id) {
                    return Err(AgentError::InvalidMessage {
                        index,
                        reason: format!("tool message answers unknown call id '{}'", id),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Trust-boundary check for externally submitted messages: at least one
/// message, roles restricted to user/system, content non-empty.
pub fn validate_user_input(messages: &[Message]) -> Result<(), AgentError> {
    if messages.is_empty() {
        return Err(AgentError::InvalidMessage {
            index: 0,
            reason: "no messages submitted".into(),
        });
    }
    for (index, m) in messages.iter().enumerate() {
        match m.role {
            Role::User | Role::System => {}
            other => {
                return Err(AgentError::InvalidMessage {
                    index,
                    reason: format!("submitted message has role '{}'", other),
                })
            }
        }
        if m.content.is_empty() {
            return Err(AgentError::InvalidMessage {
                index,
                reason: "submitted message has empty content".into(),
            });
        }
    }
    Ok(())
}
