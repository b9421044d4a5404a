use serde::{Deserialize, Serialize};

/// A progress event broadcast to subscribers of an upload (section 9). Every
/// variant is serializable as-is since it crosses the WebSocket boundary
/// verbatim; `tag = "type"` keeps the wire shape stable as variants grow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    Initial {
        upload_id: String,
        state: String,
        uploaded_chunks_count: u32,
        total_chunks: u32,
    },
    Progress {
        upload_id: String,
        uploaded_chunks_count: u32,
        total_chunks: u32,
    },
    Processing {
        upload_id: String,
    },
    Completed {
        upload_id: String,
        entry_id: String,
    },
    Failed {
        upload_id: String,
        kind: String,
        detail: String,
    },
    Cancelled {
        upload_id: String,
    },
}

impl Event {
    pub fn upload_id(&self) -> &str {
        match self {
            Self::Initial { upload_id, .. }
            | Self::Progress { upload_id, .. }
            | Self::Processing { upload_id }
            | Self::Completed { upload_id, .. }
            | Self::Failed { upload_id, .. }
            | Self::Cancelled { upload_id } => upload_id,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_variants_are_flagged() {
        assert!(Event::Completed { upload_id: "u".into(), entry_id: "e".into() }.is_terminal());
        assert!(Event::Failed { upload_id: "u".into(), kind: "k".into(), detail: "d".into() }.is_terminal());
        assert!(Event::Cancelled { upload_id: "u".into() }.is_terminal());
        assert!(!Event::Processing { upload_id: "u".into() }.is_terminal());
    }

    #[test]
    fn serializes_with_type_tag() {
        let event = Event::Processing { upload_id: "u1".into() };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "processing");
        assert_eq!(json["uploadId"], "u1");
    }
}
