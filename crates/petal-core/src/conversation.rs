//! Optimistic conversation view
//!
//! Outbound chat messages are shown immediately under a provisional id
//! (`temp_<n>`) and swapped for the server's copy once it is echoed back.
//! Server-confirmed messages are de-duplicated by id, so a message delivered
//! both on the session topic and on a broader notification appears once.

use core::fmt;

use hashbrown::HashSet;

use crate::event::{ChatMessage, MessageKind, SenderType};

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Reserved prefix distinguishing provisional ids from server ids
pub const PROVISIONAL_PREFIX: &str = "temp_";

/// Client-generated placeholder id for an unconfirmed outbound message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProvisionalId(String);

impl ProvisionalId {
    fn from_sequence(sequence: u64) -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a raw id string uses the provisional prefix
    pub fn is_provisional(raw: &str) -> bool {
        raw.starts_with(PROVISIONAL_PREFIX)
    }
}

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a displayed entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Sent locally, not yet confirmed
    Provisional(ProvisionalId),
    /// Server-issued id
    Confirmed(i64),
    /// Server copy that arrived without an id (system notices)
    Unidentified,
}

/// One row of the conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedMessage {
    pub key: MessageKey,
    pub message: ChatMessage,
}

impl DisplayedMessage {
    pub fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Provisional(_))
    }
}

/// Outcome of applying a server-confirmed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Took the place of a pending provisional entry
    Replaced(ProvisionalId),
    /// Added as a new entry
    Appended,
    /// Already displayed; ignored
    Duplicate,
    /// Belongs to another session
    Ignored,
}

// ----------------------------------------------------------------------------
// Conversation View
// ----------------------------------------------------------------------------

/// Ordered, de-duplicated message list for one chat session
#[derive(Debug, Clone)]
pub struct ConversationView {
    session_id: String,
    entries: Vec<DisplayedMessage>,
    confirmed_ids: HashSet<i64>,
    next_sequence: u64,
}

impl ConversationView {
    pub fn new<S: Into<String>>(session_id: S) -> Self {
        Self {
            session_id: session_id.into(),
            entries: Vec::new(),
            confirmed_ids: HashSet::new(),
            next_sequence: 1,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[DisplayedMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.confirmed_ids.contains(&id)
    }

    pub fn contains_provisional(&self, provisional: &ProvisionalId) -> bool {
        self.position_of(provisional).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    /// Display an outbound message before the server has seen it
    pub fn push_provisional(
        &mut self,
        sender_type: SenderType,
        sender_name: Option<String>,
        content: String,
    ) -> ProvisionalId {
        let provisional = ProvisionalId::from_sequence(self.next_sequence);
        self.next_sequence += 1;

        self.entries.push(DisplayedMessage {
            key: MessageKey::Provisional(provisional.clone()),
            message: ChatMessage {
                id: None,
                session_id: self.session_id.clone(),
                sender_type,
                sender_name,
                content,
                message_type: MessageKind::Text,
                created_at: None,
                client_id: Some(provisional.to_string()),
            },
        });
        provisional
    }

    /// Merge a server-confirmed message
    ///
    /// An echoed `clientId` picks its provisional entry directly; otherwise
    /// the oldest pending entry with the same sender class and content is
    /// replaced. Anything else is appended unless its id is already shown,
    /// in which case a matching pending entry is dropped instead.
    pub fn apply_confirmed(&mut self, message: ChatMessage) -> Applied {
        if message.session_id != self.session_id {
            tracing::debug!(
                "Ignoring message for session {} in view of {}",
                message.session_id,
                self.session_id
            );
            return Applied::Ignored;
        }
        if let Some(id) = message.id {
            if self.confirmed_ids.contains(&id) {
                // Already shown (e.g. from history); its provisional twin goes
                if let Some(index) = self.matching_pending(&message) {
                    self.entries.remove(index);
                }
                return Applied::Duplicate;
            }
        }

        let key = message
            .id
            .map(MessageKey::Confirmed)
            .unwrap_or(MessageKey::Unidentified);
        if let Some(id) = message.id {
            self.confirmed_ids.insert(id);
        }

        if let Some(index) = self.matching_pending(&message) {
            let entry = &mut self.entries[index];
            let replaced = match core::mem::replace(&mut entry.key, key) {
                MessageKey::Provisional(provisional) => provisional,
                // matching_pending only returns provisional entries
                _ => return Applied::Appended,
            };
            entry.message = message;
            return Applied::Replaced(replaced);
        }

        self.entries.push(DisplayedMessage { key, message });
        Applied::Appended
    }

    /// Drop a provisional entry whose send failed, returning its draft text
    pub fn fail(&mut self, provisional: &ProvisionalId) -> Option<String> {
        let index = self.position_of(provisional)?;
        Some(self.entries.remove(index).message.content)
    }

    /// Seed the view with history fetched over request/response
    ///
    /// History precedes anything already displayed; messages already shown
    /// are skipped.
    pub fn load_history(&mut self, history: Vec<ChatMessage>) -> usize {
        let mut older = Vec::with_capacity(history.len());
        for message in history {
            if message.session_id != self.session_id {
                continue;
            }
            match message.id {
                Some(id) if !self.confirmed_ids.insert(id) => continue,
                Some(id) => older.push(DisplayedMessage {
                    key: MessageKey::Confirmed(id),
                    message,
                }),
                None => older.push(DisplayedMessage {
                    key: MessageKey::Unidentified,
                    message,
                }),
            }
        }
        let added = older.len();
        self.entries.splice(0..0, older);
        added
    }

    fn position_of(&self, provisional: &ProvisionalId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(&e.key, MessageKey::Provisional(p) if p == provisional))
    }

    fn matching_pending(&self, message: &ChatMessage) -> Option<usize> {
        if let Some(client_id) = message.client_id.as_deref() {
            if let Some(index) = self.entries.iter().position(
                |e| matches!(&e.key, MessageKey::Provisional(p) if p.as_str() == client_id),
            ) {
                return Some(index);
            }
        }
        self.entries.iter().position(|e| {
            e.is_pending()
                && e.message.sender_type == message.sender_type
                && e.message.content == message.content
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed(id: i64, sender_type: SenderType, content: &str) -> ChatMessage {
        ChatMessage {
            id: Some(id),
            session_id: "S".into(),
            sender_type,
            sender_name: None,
            content: content.into(),
            message_type: MessageKind::Text,
            created_at: None,
            client_id: None,
        }
    }

    #[test]
    fn test_provisional_ids_are_prefixed() {
        let mut view = ConversationView::new("S");
        let first = view.push_provisional(SenderType::Customer, None, "a".into());
        let second = view.push_provisional(SenderType::Customer, None, "b".into());

        assert_eq!(first.as_str(), "temp_1");
        assert_eq!(second.as_str(), "temp_2");
        assert!(ProvisionalId::is_provisional(first.as_str()));
        assert!(!ProvisionalId::is_provisional("42"));
        assert_eq!(view.pending_count(), 2);
    }

    #[test]
    fn test_echo_replaces_provisional() {
        let mut view = ConversationView::new("S");
        let provisional = view.push_provisional(SenderType::Customer, None, "hello".into());

        let applied = view.apply_confirmed(confirmed(42, SenderType::Customer, "hello"));

        assert_eq!(applied, Applied::Replaced(provisional.clone()));
        assert_eq!(view.len(), 1);
        assert_eq!(view.messages()[0].key, MessageKey::Confirmed(42));
        assert!(!view.contains_provisional(&provisional));
        assert!(view.contains_id(42));
    }

    #[test]
    fn test_duplicate_delivery_is_ignored() {
        let mut view = ConversationView::new("S");
        assert_eq!(
            view.apply_confirmed(confirmed(7, SenderType::Staff, "hi")),
            Applied::Appended
        );
        assert_eq!(
            view.apply_confirmed(confirmed(7, SenderType::Staff, "hi")),
            Applied::Duplicate
        );
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_other_sender_does_not_replace() {
        let mut view = ConversationView::new("S");
        view.push_provisional(SenderType::Customer, None, "ok".into());

        let applied = view.apply_confirmed(confirmed(3, SenderType::Staff, "ok"));

        assert_eq!(applied, Applied::Appended);
        assert_eq!(view.len(), 2);
        assert_eq!(view.pending_count(), 1);
    }

    #[test]
    fn test_client_id_echo_wins_over_content_match() {
        let mut view = ConversationView::new("S");
        let first = view.push_provisional(SenderType::Customer, None, "same".into());
        let second = view.push_provisional(SenderType::Customer, None, "same".into());

        let mut echo = confirmed(11, SenderType::Customer, "same");
        echo.client_id = Some(second.to_string());

        assert_eq!(view.apply_confirmed(echo), Applied::Replaced(second));
        assert!(view.contains_provisional(&first));
    }

    #[test]
    fn test_failed_send_restores_draft() {
        let mut view = ConversationView::new("S");
        let provisional = view.push_provisional(SenderType::Customer, None, "draft".into());

        assert_eq!(view.fail(&provisional), Some("draft".to_string()));
        assert!(view.is_empty());
        assert_eq!(view.fail(&provisional), None);
    }

    #[test]
    fn test_history_precedes_live_messages() {
        let mut view = ConversationView::new("S");
        view.apply_confirmed(confirmed(5, SenderType::Staff, "live"));

        let added = view.load_history(vec![
            confirmed(1, SenderType::Customer, "old"),
            confirmed(5, SenderType::Staff, "live"),
            confirmed(2, SenderType::Staff, "older reply"),
        ]);

        assert_eq!(added, 2);
        let keys: Vec<_> = view.messages().iter().map(|e| e.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                MessageKey::Confirmed(1),
                MessageKey::Confirmed(2),
                MessageKey::Confirmed(5)
            ]
        );
    }

    #[test]
    fn test_echo_after_history_drops_provisional() {
        let mut view = ConversationView::new("S");
        view.push_provisional(SenderType::Customer, None, "hello".into());
        assert_eq!(
            view.load_history(vec![confirmed(42, SenderType::Customer, "hello")]),
            1
        );

        let applied = view.apply_confirmed(confirmed(42, SenderType::Customer, "hello"));

        assert_eq!(applied, Applied::Duplicate);
        assert_eq!(view.len(), 1);
        assert_eq!(view.pending_count(), 0);
        assert_eq!(view.messages()[0].key, MessageKey::Confirmed(42));
    }

    #[test]
    fn test_other_session_ignored() {
        let mut view = ConversationView::new("S");
        let mut message = confirmed(1, SenderType::Staff, "elsewhere");
        message.session_id = "T".into();
        assert_eq!(view.apply_confirmed(message), Applied::Ignored);
        assert!(view.is_empty());
    }
}
