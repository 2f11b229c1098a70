use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Every node type the engine knows how to execute.
///
/// The set is closed: a tag that is not listed here cannot be constructed,
/// so an unknown type surfaces only while parsing a stored workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeType {
    Initial,
    ManualTrigger,
    GoogleFormTrigger,
    StripeTrigger,
    HttpRequest,
    Gemini,
    Anthropic,
    OpenAi,
    Discord,
    Slack,
}

impl NodeType {
    pub const ALL: [NodeType; 10] = [
        NodeType::Initial,
        NodeType::ManualTrigger,
        NodeType::GoogleFormTrigger,
        NodeType::StripeTrigger,
        NodeType::HttpRequest,
        NodeType::Gemini,
        NodeType::Anthropic,
        NodeType::OpenAi,
        NodeType::Discord,
        NodeType::Slack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Initial => "INITIAL",
            NodeType::ManualTrigger => "MANUAL_TRIGGER",
            NodeType::GoogleFormTrigger => "GOOGLE_FORM_TRIGGER",
            NodeType::StripeTrigger => "STRIPE_TRIGGER",
            NodeType::HttpRequest => "HTTP_REQUEST",
            NodeType::Gemini => "GEMINI",
            NodeType::Anthropic => "ANTHROPIC",
            NodeType::OpenAi => "OPENAI",
            NodeType::Discord => "DISCORD",
            NodeType::Slack => "SLACK",
        }
    }

    /// Realtime topic carrying status updates for nodes of this type.
    ///
    /// `INITIAL` executes as a manual trigger and shares its topic.
    pub fn topic(&self) -> &'static str {
        match self {
            NodeType::Initial | NodeType::ManualTrigger => "manual-trigger-execution",
            NodeType::GoogleFormTrigger => "google-form-trigger-execution",
            NodeType::StripeTrigger => "stripe-trigger-execution",
            NodeType::HttpRequest => "http-request-execution",
            NodeType::Gemini => "gemini-execution",
            NodeType::Anthropic => "anthropic-execution",
            NodeType::OpenAi => "openai-execution",
            NodeType::Discord => "discord-execution",
            NodeType::Slack => "slack-execution",
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            NodeType::Initial
                | NodeType::ManualTrigger
                | NodeType::GoogleFormTrigger
                | NodeType::StripeTrigger
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownNodeType(s.to_string()))
    }
}

impl TryFrom<String> for NodeType {
    type Error = WorkflowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip_through_serde() {
        for node_type in NodeType::ALL {
            let json = serde_json::to_string(&node_type).unwrap();
            assert_eq!(json, format!("\"{}\"", node_type.as_str()));
            let back: NodeType = serde_json::from_str(&json).unwrap();
            assert_eq!(back, node_type);
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = "TELEGRAM".parse::<NodeType>().unwrap_err();
        assert_eq!(err, WorkflowError::UnknownNodeType("TELEGRAM".into()));

        let parsed: Result<NodeType, _> = serde_json::from_str("\"TELEGRAM\"");
        let message = parsed.unwrap_err().to_string();
        assert!(message.contains("Unknown node type: TELEGRAM"));
    }

    #[test]
    fn test_initial_shares_manual_topic() {
        assert_eq!(NodeType::Initial.topic(), NodeType::ManualTrigger.topic());
        assert_eq!(NodeType::HttpRequest.topic(), "http-request-execution");
    }
}
