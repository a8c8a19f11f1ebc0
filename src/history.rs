use serde::{Deserialize, Serialize};

/// Speaker of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One message in a conversation. Identity is positional, not
/// content-addressed; `metadata` carries dialect-specific annotations
/// (tool declarations on a system turn, tool names on an assistant turn).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Turn {
            role,
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// Ordered turn history, owned by the caller's session.
///
/// Append-only for the session's lifetime: only a completed assistant turn is
/// pushed after a generation round, except the token-native dialect which
/// rewrites an in-progress assistant placeholder in place until finalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from completed (user, assistant) exchanges.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut history = Self::new();
        for (query, reply) in pairs {
            history.push_user(*query);
            history.push_assistant(*reply);
        }
        history
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn first(&self) -> Option<&Turn> {
        self.turns.first()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::new(Role::System, content));
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::new(Role::User, content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::new(Role::Assistant, content));
    }

    /// Rewrite the trailing turn in place. Used by the token-native dialect
    /// to maintain its in-progress assistant placeholder.
    pub fn replace_last(&mut self, turn: Turn) {
        if let Some(last) = self.turns.last_mut() {
            *last = turn;
        }
    }

    /// Drop a trailing unfinalized assistant placeholder, if present.
    pub fn pop_placeholder(&mut self) {
        if matches!(
            self.turns.last(),
            Some(turn) if turn.role == Role::Assistant && turn.content.is_empty()
        ) {
            self.turns.pop();
        }
    }

    /// Iterate completed (user, assistant) exchanges in order, skipping
    /// system/tool turns. An unanswered trailing user turn is not yielded.
    pub fn exchanges(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut pairs = Vec::new();
        let mut pending_user: Option<&str> = None;
        for turn in &self.turns {
            match turn.role {
                Role::User => pending_user = Some(turn.content.as_str()),
                Role::Assistant => {
                    if let Some(user) = pending_user.take() {
                        pairs.push((user, turn.content.as_str()));
                    }
                }
                Role::System | Role::Tool => {}
            }
        }
        pairs.into_iter()
    }

    /// Content of the first system turn, if any.
    pub fn system(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
    }

    /// Whether the leading system turn declares available tools.
    pub fn declares_tools(&self) -> bool {
        matches!(
            self.turns.first(),
            Some(turn) if turn.role == Role::System && turn.metadata.as_deref().is_some_and(|m| m.contains("tools"))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pairs_builds_alternating_turns() {
        let history = ConversationHistory::from_pairs(&[("hi", "hello"), ("how?", "fine")]);
        assert_eq!(history.len(), 4);
        assert_eq!(history.turns()[0].role, Role::User);
        assert_eq!(history.turns()[1].role, Role::Assistant);
        assert_eq!(history.turns()[3].content, "fine");
    }

    #[test]
    fn test_exchanges_skips_system_and_unanswered() {
        let mut history = ConversationHistory::new();
        history.push_system("be brief");
        history.push_user("hi");
        history.push_assistant("hello");
        history.push_user("unanswered");

        let pairs: Vec<_> = history.exchanges().collect();
        assert_eq!(pairs, vec![("hi", "hello")]);
    }

    #[test]
    fn test_pop_placeholder_only_removes_empty_assistant() {
        let mut history = ConversationHistory::from_pairs(&[("hi", "hello")]);
        history.pop_placeholder();
        assert_eq!(history.len(), 2);

        history.push_assistant("");
        history.pop_placeholder();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_declares_tools_requires_leading_system_metadata() {
        let mut history = ConversationHistory::new();
        history.push(Turn::new(Role::System, "answer tool calls").with_metadata("tools"));
        assert!(history.declares_tools());

        let plain = ConversationHistory::from_pairs(&[("hi", "hello")]);
        assert!(!plain.declares_tools());
    }

    #[test]
    fn test_role_round_trips_through_serde() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let back: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Role::Assistant);
    }
}
