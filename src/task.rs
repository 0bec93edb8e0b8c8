// Task record and helpers

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Related-site URLs accepted by the edit flow: http(s)/ftp scheme, a host, no whitespace.
static SITE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(https?|ftp)://[^\s/$.?#].[^\s]*$").unwrap());

/// A single to-do entry
///
/// Serialized with the field names the dashboard has always used
/// (`id`, `text`, `completed`, `createdAt`, `description`, `relatedSites`, `priority`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_sites: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Priority,
}

impl Task {
    /// Create a fresh, incomplete task stamped with the current time
    ///
    /// The text is stored trimmed. Callers reject empty text before getting here.
    pub fn new(text: &str, priority: Priority) -> Self {
        Self {
            id: new_id(),
            text: text.trim().to_string(),
            completed: false,
            created_at: now_ms(),
            description: None,
            related_sites: None,
            priority,
        }
    }

    /// Related sites as a slice, empty when none were ever set
    pub fn sites(&self) -> &[String] {
        self.related_sites.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Invalid priority: {} (expected low, medium or high)", s))
    }
}

/// Trim every related site and drop the ones left empty
pub fn clean_related_sites(sites: Vec<String>) -> Vec<String> {
    sites
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Check a candidate related-site URL before it is added to a task
pub fn is_valid_site_url(url: &str) -> bool {
    SITE_URL.is_match(url)
}

/// Generate a new task id (UUIDv7: time-ordered, never reissued)
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Helper function to get current timestamp in milliseconds
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before Unix epoch")
        .as_millis() as i64
}

// Older dashboards keyed tasks by `Date.now()`, so ids may arrive as numbers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
