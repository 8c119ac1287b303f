//! The room: participant set, presenter arbitration, bounded chat log.
//!
//! All mutations go through the typed operations below; the `presenter`
//! field is the single source of truth for the role, so there can never be
//! two presenters at once.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use uuid::Uuid;

use crate::protocol::unix_now;

/// Chat entries kept in memory; oldest dropped first beyond this.
pub const CHAT_LOG_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    /// Unix timestamp (seconds) of the join.
    pub joined_at: f64,
    /// Monotonic insertion counter, tie-breaker for equal timestamps.
    joined_seq: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub author: String,
    pub text: String,
    pub timestamp: f64,
}

pub struct JoinOutcome {
    pub participant: Participant,
    /// True when the joiner walked into a presenter-less room.
    pub granted_presenter: bool,
}

pub struct LeaveOutcome {
    pub participant: Participant,
    pub was_presenter: bool,
    /// Deterministic handoff target: earliest joined remaining participant.
    pub new_presenter: Option<Participant>,
}

pub struct Room {
    pub id: String,
    participants: HashMap<Uuid, Participant>,
    presenter: Option<Uuid>,
    chat: VecDeque<ChatEntry>,
    next_seq: u64,
}

impl Room {
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            id,
            participants: HashMap::new(),
            presenter: None,
            chat: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Add a participant. The first one in (or anyone joining a room whose
    /// presenter has left) is granted the presenter role.
    pub fn join(&mut self, name: Option<String>) -> JoinOutcome {
        let id = Uuid::new_v4();
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("User {}", &id.simple().to_string()[..8]));

        let participant = Participant {
            id,
            name,
            joined_at: unix_now(),
            joined_seq: self.next_seq,
        };
        self.next_seq += 1;
        self.participants.insert(id, participant.clone());

        let granted_presenter = self.presenter.is_none();
        if granted_presenter {
            self.presenter = Some(id);
        }

        JoinOutcome {
            participant,
            granted_presenter,
        }
    }

    /// Remove a participant. Returns `None` for unknown ids. When the
    /// presenter leaves, the remaining participant with the earliest join
    /// (insertion order on ties) inherits the role.
    pub fn leave(&mut self, id: Uuid) -> Option<LeaveOutcome> {
        let participant = self.participants.remove(&id)?;

        let was_presenter = self.presenter == Some(id);
        let mut new_presenter = None;
        if was_presenter {
            self.presenter = None;
            if let Some(next) = self
                .participants
                .values()
                .min_by(|a, b| {
                    a.joined_at
                        .total_cmp(&b.joined_at)
                        .then(a.joined_seq.cmp(&b.joined_seq))
                })
                .cloned()
            {
                self.presenter = Some(next.id);
                new_presenter = Some(next);
            }
        }

        Some(LeaveOutcome {
            participant,
            was_presenter,
            new_presenter,
        })
    }

    /// Unconditional takeover: revokes the current presenter (if any) and
    /// grants the role to the requester. No consent step.
    pub fn request_presenter(&mut self, id: Uuid) -> Option<Participant> {
        let participant = self.participants.get(&id)?.clone();
        self.presenter = Some(id);
        Some(participant)
    }

    pub fn is_presenter(&self, id: Uuid) -> bool {
        self.presenter == Some(id)
    }

    pub fn presenter_id(&self) -> Option<Uuid> {
        self.presenter
    }

    pub fn participant(&self, id: Uuid) -> Option<&Participant> {
        self.participants.get(&id)
    }

    /// Participants in join order (stable listing for the UI side).
    pub fn participants(&self) -> Vec<&Participant> {
        let mut all: Vec<&Participant> = self.participants.values().collect();
        all.sort_by_key(|p| p.joined_seq);
        all
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Append a chat entry, pruning the oldest beyond [`CHAT_LOG_CAP`].
    pub fn push_chat(&mut self, author: String, text: String) -> ChatEntry {
        let entry = ChatEntry {
            author,
            text,
            timestamp: unix_now(),
        };
        self.chat.push_back(entry.clone());
        while self.chat.len() > CHAT_LOG_CAP {
            self.chat.pop_front();
        }
        entry
    }

    pub fn chat(&self) -> &VecDeque<ChatEntry> {
        &self.chat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presenter_count(room: &Room) -> usize {
        room.participants()
            .iter()
            .filter(|p| room.is_presenter(p.id))
            .count()
    }

    #[test]
    fn test_first_join_becomes_presenter() {
        let mut room = Room::new();
        let a = room.join(Some("alice".into()));
        let b = room.join(Some("bob".into()));

        assert!(a.granted_presenter);
        assert!(!b.granted_presenter);
        assert!(room.is_presenter(a.participant.id));
        assert!(!room.is_presenter(b.participant.id));
        assert_eq!(presenter_count(&room), 1);
    }

    #[test]
    fn test_blank_name_gets_generated_one() {
        let mut room = Room::new();
        let joined = room.join(Some("   ".into()));
        assert!(joined.participant.name.starts_with("User "));
    }

    #[test]
    fn test_presenter_leave_hands_off_to_earliest_joined() {
        let mut room = Room::new();
        let a = room.join(Some("a".into())).participant.id;
        let b = room.join(Some("b".into())).participant.id;
        let c = room.join(Some("c".into())).participant.id;

        let outcome = room.leave(a).unwrap();
        assert!(outcome.was_presenter);
        assert_eq!(outcome.new_presenter.unwrap().id, b);
        assert!(room.is_presenter(b));
        assert!(!room.is_presenter(c));
        assert_eq!(presenter_count(&room), 1);
    }

    #[test]
    fn test_handoff_tie_break_is_insertion_order() {
        let mut room = Room::new();
        let a = room.join(Some("a".into())).participant.id;
        let b = room.join(Some("b".into())).participant.id;
        let c = room.join(Some("c".into())).participant.id;

        // Force identical join timestamps; insertion order must decide.
        let t = 1000.0;
        for id in [b, c] {
            room.participants.get_mut(&id).unwrap().joined_at = t;
        }

        let outcome = room.leave(a).unwrap();
        assert_eq!(outcome.new_presenter.unwrap().id, b);
    }

    #[test]
    fn test_last_leave_clears_presenter() {
        let mut room = Room::new();
        let a = room.join(None).participant.id;
        let outcome = room.leave(a).unwrap();

        assert!(outcome.was_presenter);
        assert!(outcome.new_presenter.is_none());
        assert!(room.presenter_id().is_none());
        assert!(room.is_empty());
    }

    #[test]
    fn test_viewer_leave_keeps_presenter() {
        let mut room = Room::new();
        let a = room.join(None).participant.id;
        let b = room.join(None).participant.id;

        let outcome = room.leave(b).unwrap();
        assert!(!outcome.was_presenter);
        assert!(outcome.new_presenter.is_none());
        assert!(room.is_presenter(a));
    }

    #[test]
    fn test_request_presenter_revokes_and_grants() {
        let mut room = Room::new();
        let a = room.join(None).participant.id;
        let b = room.join(None).participant.id;

        let new = room.request_presenter(b).unwrap();
        assert_eq!(new.id, b);
        assert!(room.is_presenter(b));
        assert!(!room.is_presenter(a));
        assert_eq!(presenter_count(&room), 1);
    }

    #[test]
    fn test_request_presenter_unknown_id_is_noop() {
        let mut room = Room::new();
        let a = room.join(None).participant.id;
        assert!(room.request_presenter(Uuid::new_v4()).is_none());
        assert!(room.is_presenter(a));
    }

    #[test]
    fn test_join_after_everyone_left_regains_presenter() {
        let mut room = Room::new();
        let a = room.join(None).participant.id;
        room.leave(a);

        let b = room.join(None);
        assert!(b.granted_presenter);
    }

    #[test]
    fn test_chat_log_caps_at_fifty_oldest_first() {
        let mut room = Room::new();
        for i in 0..51 {
            room.push_chat("a".into(), format!("msg {i}"));
        }

        assert_eq!(room.chat().len(), CHAT_LOG_CAP);
        assert_eq!(room.chat().front().unwrap().text, "msg 1");
        assert_eq!(room.chat().back().unwrap().text, "msg 50");
    }

    #[test]
    fn test_participants_listed_in_join_order() {
        let mut room = Room::new();
        room.join(Some("first".into()));
        room.join(Some("second".into()));
        room.join(Some("third".into()));

        let names: Vec<&str> = room.participants().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
