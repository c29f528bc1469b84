//! Cache key definitions.
//!
//! `CacheKey` renders the colon-separated key grammar shared by every
//! server-side cache; `KeyPattern` selects keys for bulk invalidation.

use std::fmt;

use time::Duration;

use crate::domain::{ItemId, UserId};

/// Identifies a cached server-side resource.
///
/// Optional components render as empty strings, so `sort = None` and
/// `sort = Some("")` address the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ChallengeList {
        page: u32,
        limit: u32,
        sort: Option<String>,
        status: Option<String>,
        term: Option<String>,
    },
    ChallengeBest {
        page: u32,
    },
    Challenge {
        id: ItemId,
    },
    Emotions,
    PopularTags {
        limit: u32,
    },
    UserProfile {
        user_id: UserId,
    },
    /// Daily stats; `date = None` is today's bucket.
    Stats {
        user_id: UserId,
        date: Option<String>,
    },
    Notifications {
        user_id: UserId,
        page: u32,
    },
    PostsFeed {
        user_id: UserId,
        page: u32,
        filter: Option<String>,
    },
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

impl CacheKey {
    pub fn render(&self) -> String {
        self.to_string()
    }

    /// Lifetime of an entry stored under this key.
    pub fn ttl(&self) -> Duration {
        match self {
            CacheKey::Emotions => Duration::seconds(3600),
            CacheKey::PopularTags { .. } => Duration::seconds(1800),
            CacheKey::ChallengeList { .. } | CacheKey::Challenge { .. } => Duration::seconds(300),
            CacheKey::ChallengeBest { .. } => Duration::seconds(600),
            CacheKey::UserProfile { .. } => Duration::seconds(900),
            CacheKey::Stats { .. } => Duration::seconds(1800),
            CacheKey::Notifications { .. } => Duration::seconds(60),
            CacheKey::PostsFeed { .. } => Duration::seconds(180),
        }
    }

    /// Resource family, used as a metrics label.
    pub fn family(&self) -> &'static str {
        match self {
            CacheKey::ChallengeList { .. } => "challenge_list",
            CacheKey::ChallengeBest { .. } => "challenge_best",
            CacheKey::Challenge { .. } => "challenge",
            CacheKey::Emotions => "emotions",
            CacheKey::PopularTags { .. } => "tags",
            CacheKey::UserProfile { .. } => "user_profile",
            CacheKey::Stats { .. } => "stats",
            CacheKey::Notifications { .. } => "notifications",
            CacheKey::PostsFeed { .. } => "posts_feed",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::ChallengeList {
                page,
                limit,
                sort,
                status,
                term,
            } => write!(
                f,
                "challenges:list:{page}:{limit}:{}:{}:{}",
                opt(sort),
                opt(status),
                opt(term)
            ),
            CacheKey::ChallengeBest { page } => write!(f, "challenges:best:{page}"),
            CacheKey::Challenge { id } => write!(f, "challenge:{id}"),
            CacheKey::Emotions => f.write_str("emotions:all"),
            CacheKey::PopularTags { limit } => write!(f, "tags:popular:{limit}"),
            CacheKey::UserProfile { user_id } => write!(f, "user:profile:{user_id}"),
            CacheKey::Stats { user_id, date } => {
                write!(f, "stats:{user_id}:{}", date.as_deref().unwrap_or("today"))
            }
            CacheKey::Notifications { user_id, page } => {
                write!(f, "notifications:{user_id}:{page}")
            }
            CacheKey::PostsFeed {
                user_id,
                page,
                filter,
            } => write!(f, "posts:feed:{user_id}:{page}:{}", opt(filter)),
        }
    }
}

/// Selects cache keys for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    Exact(String),
    /// `*` matches any run of characters, including none.
    Glob(String),
}

impl KeyPattern {
    /// Reads `raw` as a glob when it contains `*`, otherwise as an exact key.
    ///
    /// Only for hand-written patterns. A rendered key can carry a literal `*`
    /// (a search term, for one), so target a rendered key with
    /// [`KeyPattern::exact`] instead.
    pub fn parse(raw: &str) -> Self {
        if raw.contains('*') {
            KeyPattern::Glob(raw.to_string())
        } else {
            KeyPattern::Exact(raw.to_string())
        }
    }

    pub fn exact(key: &CacheKey) -> Self {
        KeyPattern::Exact(key.render())
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyPattern::Exact(raw) | KeyPattern::Glob(raw) => raw,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(raw) => raw == key,
            KeyPattern::Glob(raw) => glob_match(raw.as_bytes(), key.as_bytes()),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Linear-time wildcard match with single-star backtracking. Works on bytes:
// `*` is ASCII, so it can never match inside a multi-byte UTF-8 sequence.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|byte| *byte == b'*')
}
