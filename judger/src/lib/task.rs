use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::TaskError;

/// Longest capture a task may ask for, one day.
pub const MAX_TIME_LIMIT: u64 = 24 * 60 * 60;

/// A single grading job: boot `image_path` on the board and capture its
/// console for at most `time_limit` seconds.
///
/// The id is the correlation key for the queue entry, the staged image and
/// the result channel. Tasks are immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTask")]
pub struct Task {
    id: String,
    image_path: PathBuf,
    time_limit: u64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTask {
    id: String,
    image_path: PathBuf,
    time_limit: u64,
}

impl TryFrom<RawTask> for Task {
    type Error = TaskError;

    fn try_from(raw: RawTask) -> Result<Self, Self::Error> {
        Task::new(raw.id, raw.image_path, raw.time_limit)
    }
}

impl Task {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(
        id: S,
        image_path: P,
        time_limit: u64,
    ) -> Result<Task, TaskError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TaskError::EmptyId);
        }
        if !(1..=MAX_TIME_LIMIT).contains(&time_limit) {
            return Err(TaskError::TimeLimit(time_limit));
        }

        Ok(Task {
            id,
            image_path: image_path.into(),
            time_limit,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Capture budget in seconds, between 1 and [`MAX_TIME_LIMIT`].
    pub fn time_limit(&self) -> u64 {
        self.time_limit
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Bytes that are not UTF-8 fail like any other malformed payload.
    pub fn decode<B: AsRef<[u8]>>(payload: B) -> Result<Task, serde_json::Error> {
        serde_json::from_slice(payload.as_ref())
    }
}

/// Fresh submission id of the form `yymmdd-HHMMSS-xxxxxxxx`.
pub fn new_submission_id() -> String {
    let ts = Utc::now().format("%y%m%d-%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", ts, &suffix[..8])
}

/// Ids end up in file names, anything beyond `[A-Za-z0-9._-]` is refused.
pub fn is_plain_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_wire_roundtrip_keeps_fields() {
        let task = Task::new("a1", "/srv/uploads/a1.img", 2).unwrap();
        let decoded = Task::decode(&task.encode().unwrap()).unwrap();

        assert_eq!(decoded.id(), "a1");
        assert_eq!(decoded.image_path(), Path::new("/srv/uploads/a1.img"));
        assert_eq!(decoded.time_limit(), 2);
    }

    #[test]
    fn task_wire_format_field_names() {
        let task = Task::new("x", "k.img", 7).unwrap();
        let value: serde_json::Value = serde_json::from_str(&task.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({ "id": "x", "image_path": "k.img", "time_limit": 7 })
        );
    }

    #[test]
    fn task_decode_rejects_bad_shapes() {
        assert!(Task::decode(r#"{"id":"","image_path":"a","time_limit":1}"#).is_err());
        assert!(Task::decode(r#"{"id":"a","image_path":"a","time_limit":0}"#).is_err());
        assert!(Task::decode(r#"{"id":"a","image_path":"a","time_limit":-3}"#).is_err());
        assert!(Task::decode(r#"{"id":"a","image_path":"a"}"#).is_err());
        assert!(Task::decode(r#"{"id":"a","file_path":"a","time_limit":1}"#).is_err());
        assert!(
            Task::decode(r#"{"id":"a","image_path":"a","time_limit":1,"extra":true}"#).is_err()
        );
        assert!(Task::decode("not json").is_err());
        assert!(Task::decode(b"{\"id\":\"a\xff\"}".as_slice()).is_err());
        assert!(Task::decode(r#"{"id":"a","image_path":"a","time_limit":86401}"#).is_err());
        assert!(Task::decode(format!(
            r#"{{"id":"a","image_path":"a","time_limit":{}}}"#,
            u64::MAX
        ))
        .is_err());
    }

    #[test]
    fn task_new_validates() {
        assert!(matches!(Task::new("", "a", 1), Err(TaskError::EmptyId)));
        assert!(matches!(Task::new("a", "a", 0), Err(TaskError::TimeLimit(0))));
        assert!(matches!(
            Task::new("a", "a", u64::MAX),
            Err(TaskError::TimeLimit(u64::MAX))
        ));
        assert!(Task::new("a", "a", MAX_TIME_LIMIT).is_ok());
    }

    #[test]
    fn plain_ids() {
        assert!(is_plain_id("241014-101500-1a2b3c4d"));
        assert!(is_plain_id(&new_submission_id()));
        assert!(!is_plain_id(""));
        assert!(!is_plain_id(".."));
        assert!(!is_plain_id("a/b"));
        assert!(!is_plain_id("a b"));
    }

    #[test]
    fn submission_ids_are_unique_and_shaped() {
        let a = new_submission_id();
        let b = new_submission_id();

        assert_ne!(a, b);
        let parts: Vec<&str> = a.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 6);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 8);
    }
}
