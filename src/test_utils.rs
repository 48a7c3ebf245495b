//! Test utilities for Chatkeep
//!
//! Snapshot builders and assertion helpers shared by unit tests.

use crate::chat::Message;
use crate::config::Config;
use crate::error::Result;
use crate::storage::Snapshot;

/// Build a stored-looking snapshot with `last_message_id + 1` messages
pub fn sample_snapshot(chat_key: &str, timestamp: i64, last_message_id: usize) -> Snapshot {
    let chat: Vec<Message> = (0..=last_message_id)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(format!("message {}", i))
            } else {
                Message::assistant(format!("message {}", i))
            }
        })
        .collect();
    Snapshot {
        chat_key: chat_key.to_string(),
        timestamp,
        entity_name: "Alice".to_string(),
        chat_name: "main".to_string(),
        last_message_id,
        last_message_preview: format!("message {}", last_message_id),
        chat,
        metadata: Default::default(),
    }
}

/// Assert that an error's full chain contains the expected message
///
/// # Panics
///
/// Panics if the result is Ok or if the error doesn't contain the expected message
pub fn assert_error_contains<T: std::fmt::Debug>(result: Result<T>, expected: &str) {
    match result {
        Ok(value) => panic!("Expected error containing '{}' but got Ok({:?})", expected, value),
        Err(e) => {
            let error_msg = format!("{:#}", e);
            assert!(
                error_msg.contains(expected),
                "Error message '{}' does not contain '{}'",
                error_msg,
                expected
            );
        }
    }
}

/// A configuration YAML exercising every section
pub fn test_config_yaml() -> String {
    r#"
backup:
  max_total_backups: 4
  debounce_delay_ms: 800
  offload_timeout_ms: 2000
  preview_length: 40
  debug: true
storage:
  db_path: /tmp/chatkeep-test.db
"#
    .to_string()
}

/// Parsed and normalized [`test_config_yaml`]
pub fn test_config() -> Config {
    let mut config = match Config::from_yaml(&test_config_yaml()) {
        Ok(config) => config,
        Err(e) => panic!("test config must parse: {:#}", e),
    };
    config.normalize();
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatkeepError;

    #[test]
    fn test_sample_snapshot_shape() {
        let snapshot = sample_snapshot("character:0:main", 5, 2);
        assert_eq!(snapshot.message_count(), 3);
        assert_eq!(snapshot.chat[1].role, "assistant");
    }

    #[test]
    fn test_assert_error_contains_success() {
        let result: Result<()> = Err(ChatkeepError::Config("test error message".to_string()).into());
        assert_error_contains(result, "test error");
    }

    #[test]
    #[should_panic(expected = "Expected error containing")]
    fn test_assert_error_contains_ok() {
        assert_error_contains(Ok(()), "error");
    }

    #[test]
    fn test_test_config() {
        let config = test_config();
        assert_eq!(config.backup.max_total_backups, 4);
        assert_eq!(config.backup.debounce_delay_ms, 800);
        assert!(config.backup.debug);
    }
}
