// feedforward-core/src/domain/conversation.rs
// ============================================================================
// Module: Conversation
// Description: A single support conversation as fetched from the ticketing
//              source, prior to any classification.
// Purpose: Carry the raw customer/support exchange through the pipeline.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ConversationId;
use crate::core::time::Timestamp;

/// A single support conversation as fetched from the ticketing source.
///
/// # Invariants
/// - `customer_messages` is never empty; a conversation with no customer
///   message cannot be fetched in the first place.
/// - `has_support_response` is `true` iff `support_messages` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// External identifier from the ticketing source.
    pub id: ConversationId,
    /// URL back to the conversation in the ticketing source, used for
    /// disambiguating product area when facets alone are ambiguous.
    pub source_url: String,
    /// When the conversation was opened in the ticketing source.
    pub opened_at: Timestamp,
    /// Customer-authored message bodies, in chronological order.
    pub customer_messages: Vec<String>,
    /// Support-authored message bodies, in chronological order.
    pub support_messages: Vec<String>,
}

impl Conversation {
    /// Returns whether this conversation has at least one support response.
    #[must_use]
    pub fn has_support_response(&self) -> bool {
        !self.support_messages.is_empty()
    }

    /// Joins the customer messages into a single block, the input to
    /// stage-1 classification.
    #[must_use]
    pub fn customer_facing_text(&self) -> String {
        self.customer_messages.join("\n\n")
    }

    /// Joins the full transcript in chronological speaking order, the input
    /// to stage-2 classification and facet extraction.
    #[must_use]
    pub fn full_transcript(&self) -> String {
        let mut lines = Vec::with_capacity(self.customer_messages.len() + self.support_messages.len());
        lines.extend(self.customer_messages.iter().map(|m| format!("customer: {m}")));
        lines.extend(self.support_messages.iter().map(|m| format!("support: {m}")));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::Conversation;
    use crate::core::identifiers::ConversationId;
    use crate::core::time::Timestamp;

    fn sample(support: Vec<String>) -> Conversation {
        Conversation {
            id: ConversationId::new("c1"),
            source_url: "https://support.example.com/c1".to_string(),
            opened_at: Timestamp::from_millis(0),
            customer_messages: vec!["my export is missing pins".to_string()],
            support_messages: support,
        }
    }

    #[test]
    fn has_support_response_tracks_support_messages() {
        assert!(!sample(vec![]).has_support_response());
        assert!(sample(vec!["looking into it".to_string()]).has_support_response());
    }
}
