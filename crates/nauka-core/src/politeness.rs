//! robots.txt gate, loaded once per worker.

use robotstxt::DefaultMatcher;
use serde::{Deserialize, Serialize};

/// What to do when robots.txt cannot be retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RobotsFallback {
    /// Fail closed: refuse every URL.
    #[default]
    Deny,
    /// Fail open: allow every URL.
    Allow,
}

impl std::str::FromStr for RobotsFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deny" => Ok(RobotsFallback::Deny),
            "allow" => Ok(RobotsFallback::Allow),
            other => Err(format!("unknown robots fallback '{}' (expected deny or allow)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Policy {
    Rules(String),
    AllowAll,
    DenyAll,
}

/// Site exclusion rules evaluated before every download.
#[derive(Debug, Clone)]
pub struct PolitenessGate {
    policy: Policy,
    user_agent: String,
}

/// `{base}/robots.txt`.
pub fn robots_url(base_url: &str) -> String {
    format!("{}/robots.txt", base_url.trim_end_matches('/'))
}

impl PolitenessGate {
    /// Fetch robots.txt and build a gate from it.
    ///
    /// A 4xx response means the site publishes no rules and everything is
    /// allowed. A transport error or 5xx leaves the policy unknown and
    /// `fallback` decides.
    pub async fn load(
        client: &reqwest::Client,
        robots_url: &str,
        user_agent: &str,
        fallback: RobotsFallback,
    ) -> Self {
        let unavailable = |reason: String| {
            tracing::warn!(url = robots_url, reason, ?fallback, "robots.txt unavailable");
            Self::from_fallback(user_agent, fallback)
        };

        let response = match client.get(robots_url).send().await {
            Ok(resp) => resp,
            Err(e) => return unavailable(e.to_string()),
        };

        let status = response.status();
        if status.is_client_error() {
            tracing::debug!(url = robots_url, %status, "no robots.txt, allowing all");
            return Self::allow_all(user_agent);
        }
        if !status.is_success() {
            return unavailable(format!("HTTP {}", status));
        }

        match response.text().await {
            Ok(body) => {
                tracing::debug!(url = robots_url, bytes = body.len(), "loaded robots.txt");
                Self::from_robots_txt(body, user_agent)
            }
            Err(e) => unavailable(e.to_string()),
        }
    }

    pub fn from_robots_txt(body: impl Into<String>, user_agent: &str) -> Self {
        Self {
            policy: Policy::Rules(body.into()),
            user_agent: user_agent.to_string(),
        }
    }

    pub fn allow_all(user_agent: &str) -> Self {
        Self {
            policy: Policy::AllowAll,
            user_agent: user_agent.to_string(),
        }
    }

    pub fn deny_all(user_agent: &str) -> Self {
        Self {
            policy: Policy::DenyAll,
            user_agent: user_agent.to_string(),
        }
    }

    fn from_fallback(user_agent: &str, fallback: RobotsFallback) -> Self {
        match fallback {
            RobotsFallback::Allow => Self::allow_all(user_agent),
            RobotsFallback::Deny => Self::deny_all(user_agent),
        }
    }

    /// Whether `url` may be fetched.
    pub fn allowed(&self, url: &str) -> bool {
        match &self.policy {
            Policy::AllowAll => true,
            Policy::DenyAll => false,
            Policy::Rules(body) => {
                let mut matcher = DefaultMatcher::default();
                matcher.one_agent_allowed_by_robots(body, agent_token(&self.user_agent), url)
            }
        }
    }
}

/// Product token of a user agent string (`nauka-harvester/0.1.0` → `nauka-harvester`).
fn agent_token(user_agent: &str) -> &str {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
}
