use serde::{Deserialize, Serialize};
use std::fmt;

/// Short hex id for correlating a request with its log lines.
pub fn new_correlation_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3]
    )
}

/// Globally unique id of one collaboration session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session-scoped participant number. The host is always participant 1
/// (first to connect); guests count upward from there in connect order.
/// Ids are never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    /// The host's own id, always the first participant to connect.
    pub const HOST: ParticipantId = ParticipantId(1);

    pub fn is_host(self) -> bool {
        self == Self::HOST
    }

    /// The id a guest assigned after this one would receive.
    pub fn next(self) -> ParticipantId {
        ParticipantId(self.0 + 1)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_valid_uuid() {
        let sid = SessionId::new();
        let parsed = uuid::Uuid::parse_str(sid.as_str());
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap().get_version_num(), 4);
    }

    #[test]
    fn session_id_is_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn session_id_round_trips_through_json() {
        let sid = SessionId::new();
        let json = serde_json::to_string(&sid).unwrap();
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(sid, back);
    }

    #[test]
    fn correlation_id_is_short_hex() {
        let cid = new_correlation_id();
        assert_eq!(cid.len(), 8);
        assert!(cid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn host_sentinel_is_participant_one() {
        assert_eq!(ParticipantId::HOST, ParticipantId(1));
        assert!(ParticipantId(1).is_host());
        assert!(!ParticipantId(2).is_host());
    }

    #[test]
    fn participant_id_ordering_follows_connect_order() {
        let host = ParticipantId::HOST;
        let first_guest = host.next();
        assert_eq!(first_guest, ParticipantId(2));
        assert!(host < first_guest);
    }

    #[test]
    fn participant_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&ParticipantId(3)).unwrap();
        assert_eq!(json, "3");
        let back: ParticipantId = serde_json::from_str("3").unwrap();
        assert_eq!(back, ParticipantId(3));
    }

    #[test]
    fn participant_id_display() {
        assert_eq!(ParticipantId(2).to_string(), "participant-2");
    }
}
