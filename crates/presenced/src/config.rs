use presence_core::EnginePolicy;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Descriptor distance below which two faces are the same person.
    pub match_tolerance: f32,
    /// Minimum confidence for a match to count as identified.
    pub min_confidence: f32,
    /// Cooldown between accepted re-logs of a known (person, camera role).
    pub known_cooldown_secs: u64,
    /// Cooldown between accepted re-logs of the same unknown face.
    pub unknown_cooldown_secs: u64,
}

impl Config {
    /// Load configuration from `PRESENCED_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presenced");

        let db_path = std::env::var("PRESENCED_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("presence.db"));

        Self {
            db_path,
            match_tolerance: env_f32("PRESENCED_MATCH_TOLERANCE", 0.6),
            min_confidence: env_f32("PRESENCED_MIN_CONFIDENCE", 0.8),
            known_cooldown_secs: env_u64("PRESENCED_KNOWN_COOLDOWN_SECS", 300),
            unknown_cooldown_secs: env_u64("PRESENCED_UNKNOWN_COOLDOWN_SECS", 3600),
        }
    }

    /// Engine policy derived from the configured knobs.
    pub fn policy(&self) -> EnginePolicy {
        EnginePolicy {
            match_tolerance: self.match_tolerance,
            min_confidence: self.min_confidence,
            known_cooldown: chrono::Duration::seconds(self.known_cooldown_secs as i64),
            unknown_cooldown: chrono::Duration::seconds(self.unknown_cooldown_secs as i64),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_config() {
        let config = Config {
            db_path: PathBuf::from("/tmp/presence.db"),
            match_tolerance: 0.5,
            min_confidence: 0.9,
            known_cooldown_secs: 120,
            unknown_cooldown_secs: 600,
        };
        let policy = config.policy();
        assert_eq!(policy.match_tolerance, 0.5);
        assert_eq!(policy.min_confidence, 0.9);
        assert_eq!(policy.known_cooldown, chrono::Duration::seconds(120));
        assert_eq!(policy.unknown_cooldown, chrono::Duration::seconds(600));
    }
}
