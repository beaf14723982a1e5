//! Application configuration
//!
//! Centralized configuration with environment variable support and sensible
//! defaults.

use std::env;
use std::path::PathBuf;

/// Configuration for the streaming chat core
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the conversation endpoint (no trailing slash)
    pub endpoint: String,
    /// Study program identifier sent with every exchange
    pub study_program: String,
    /// Path of the transcript file
    pub transcript_path: PathBuf,
}

impl ChatConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("CHAT_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            study_program: env::var("STUDY_PROGRAM").unwrap_or_default(),
            transcript_path: env::var("TRANSCRIPT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| Self::default_transcript_path()),
        }
    }

    /// Default path for the transcript file
    ///
    /// Lives under the user's home directory, falling back to the current
    /// directory when `HOME` is unset.
    pub fn default_transcript_path() -> PathBuf {
        if let Some(home) = env::var_os("HOME") {
            let mut path = PathBuf::from(home);
            path.push(".copilot-chat");
            path.push("transcripts.json");
            path
        } else {
            PathBuf::from("transcripts.json")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        env::remove_var("CHAT_ENDPOINT");
        env::remove_var("STUDY_PROGRAM");
        env::remove_var("TRANSCRIPT_PATH");

        let config = ChatConfig::from_env();
        assert_eq!(config.endpoint, "http://localhost:8000");
        assert_eq!(config.study_program, "");
        assert_eq!(config.transcript_path, ChatConfig::default_transcript_path());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        env::set_var("CHAT_ENDPOINT", "https://example.test");
        env::set_var("STUDY_PROGRAM", "BMT");
        env::set_var("TRANSCRIPT_PATH", "/tmp/custom.json");

        let config = ChatConfig::from_env();
        assert_eq!(config.endpoint, "https://example.test");
        assert_eq!(config.study_program, "BMT");
        assert_eq!(config.transcript_path, PathBuf::from("/tmp/custom.json"));

        env::remove_var("CHAT_ENDPOINT");
        env::remove_var("STUDY_PROGRAM");
        env::remove_var("TRANSCRIPT_PATH");
    }
}
