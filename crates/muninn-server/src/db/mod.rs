// crates/muninn-server/src/db/mod.rs
// Shared entity operations over the store primitives

mod files;
mod project;
mod relationships;
mod sessions;

pub use files::{FileInfo, get_file, list_project_files, touch_file_for_commit, mark_referenced};
pub use project::{ProjectInfo, get_or_create_project, get_project_by_id};
pub use relationships::{Relationship, relate, relations_for, unrelate};
pub use sessions::{
    SessionInfo, close_session, count_sessions, current_session, open_session, session_by_id,
};

/// Serialize a list of strings as the JSON array stored in TEXT columns.
pub fn to_json_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a JSON array column, tolerating NULL and malformed text.
pub fn from_json_array(text: Option<&str>) -> Vec<String> {
    text.and_then(|t| serde_json::from_str(t).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_array_round_trip() {
        let items = vec!["src/a.ts".to_string(), "src/b.ts".to_string()];
        let encoded = to_json_array(&items);
        assert_eq!(from_json_array(Some(&encoded)), items);
    }

    #[test]
    fn test_json_array_tolerates_garbage() {
        assert!(from_json_array(None).is_empty());
        assert!(from_json_array(Some("not json")).is_empty());
    }
}
