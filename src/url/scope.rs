use crate::config::ScopeConfig;
use crate::robots::ParsedRobots;
use crate::ConfigError;
use regex::Regex;
use thiserror::Error;
use url::{Position, Url};

/// Why a URL was kept out of the crawl
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeViolation {
    #[error("different origin than the seed")]
    OtherOrigin,

    #[error("matches deny pattern '{0}'")]
    Denied(String),

    #[error("matches no allow pattern")]
    NotAllowed,

    #[error("depth {depth} exceeds max depth {max}")]
    TooDeep { depth: u32, max: u32 },

    #[error("disallowed by robots.txt")]
    Robots,
}

/// The rule deciding whether a canonical URL is in scope
///
/// Built once at startup from the seed and the scope configuration. The check
/// is pure: the robots rules are fetched beforehand and attached with
/// [`ScopePolicy::with_robots`].
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    origin: Option<url::Origin>,
    allow: Vec<Regex>,
    deny: Vec<Regex>,
    max_depth: u32,
    robots: Option<(ParsedRobots, String)>,
}

impl ScopePolicy {
    /// Compiles the scope rules for a crawl rooted at `seed`
    pub fn new(seed: &Url, config: &ScopeConfig, max_depth: u32) -> Result<Self, ConfigError> {
        Ok(Self {
            origin: config.same_origin.then(|| seed.origin()),
            allow: compile_patterns(&config.allow)?,
            deny: compile_patterns(&config.deny)?,
            max_depth,
            robots: None,
        })
    }

    /// Attaches the seed origin's robots rules, checked for `user_agent`
    pub fn with_robots(mut self, robots: ParsedRobots, user_agent: &str) -> Self {
        self.robots = Some((robots, user_agent.to_string()));
        self
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Checks a canonical URL that would be crawled at `depth`
    ///
    /// Patterns are matched against the path plus query string.
    pub fn check(&self, url: &Url, depth: u32) -> Result<(), ScopeViolation> {
        if depth > self.max_depth {
            return Err(ScopeViolation::TooDeep {
                depth,
                max: self.max_depth,
            });
        }

        if let Some(origin) = &self.origin {
            if url.origin() != *origin {
                return Err(ScopeViolation::OtherOrigin);
            }
        }

        let target = &url[Position::BeforePath..Position::AfterQuery];

        if let Some(pattern) = self.deny.iter().find(|re| re.is_match(target)) {
            return Err(ScopeViolation::Denied(pattern.as_str().to_string()));
        }

        if !self.allow.is_empty() && !self.allow.iter().any(|re| re.is_match(target)) {
            return Err(ScopeViolation::NotAllowed);
        }

        if let Some((robots, user_agent)) = &self.robots {
            if !robots.is_allowed(url.as_str(), user_agent) {
                return Err(ScopeViolation::Robots);
            }
        }

        Ok(())
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                ConfigError::InvalidPattern(format!("'{}' is not a valid regex: {}", p, e))
            })
        })
        .collect()
}
