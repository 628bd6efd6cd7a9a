//! Platform classification
//!
//! Maps a meeting URL onto one of the supported meeting services using a fixed
//! host table. Classification is pure: no network access, no side effects.

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Supported meeting service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    GoogleMeet,
    Zoom,
    YandexTelemost,
    KonturTalk,
    MicrosoftTeams,
}

/// Outcome of classifying a URL. `Unknown` is a normal result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Known(PlatformKind),
    Unknown,
}

struct PlatformEntry {
    kind: PlatformKind,
    meeting_hosts: &'static [&'static str],
    /// Host (optionally host + path prefix) patterns of sign-in pages
    auth_patterns: &'static [&'static str],
}

const PLATFORMS: &[PlatformEntry] = &[
    PlatformEntry {
        kind: PlatformKind::GoogleMeet,
        meeting_hosts: &["meet.google.com"],
        auth_patterns: &["accounts.google.com"],
    },
    PlatformEntry {
        kind: PlatformKind::Zoom,
        meeting_hosts: &["zoom.us", "zoom.com"],
        auth_patterns: &["zoom.us/signin", "zoom.us/oauth", "zoom.com/signin"],
    },
    PlatformEntry {
        kind: PlatformKind::YandexTelemost,
        meeting_hosts: &[
            "telemost.yandex.ru",
            "telemost.yandex.com",
            "telemost.360.yandex.ru",
        ],
        auth_patterns: &["passport.yandex.ru", "passport.yandex.com", "sso.yandex"],
    },
    PlatformEntry {
        kind: PlatformKind::KonturTalk,
        meeting_hosts: &["talk.kontur.ru", "talk.contour.ru", "ktalk.ru"],
        auth_patterns: &["login.contour.ru", "auth.kontur.ru", "login.kontur.ru"],
    },
    PlatformEntry {
        kind: PlatformKind::MicrosoftTeams,
        meeting_hosts: &["teams.microsoft.com", "teams.live.com"],
        auth_patterns: &["login.microsoftonline.com", "login.live.com"],
    },
];

impl PlatformKind {
    pub fn all() -> impl Iterator<Item = PlatformKind> {
        PLATFORMS.iter().map(|p| p.kind)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlatformKind::GoogleMeet => "Google Meet",
            PlatformKind::Zoom => "Zoom",
            PlatformKind::YandexTelemost => "Yandex Telemost",
            PlatformKind::KonturTalk => "Kontur.Talk",
            PlatformKind::MicrosoftTeams => "Microsoft Teams",
        }
    }

    /// True when the URL is a page of this platform that is not a sign-in page
    pub fn owns_url(&self, url: &str) -> bool {
        classify(url) == Classification::Known(*self) && !is_auth_url(url)
    }

    /// Rewrite a shared link into the URL the browser should open.
    /// Zoom `/j/<id>` links are sent to the browser web client.
    pub fn join_url(&self, url: &str) -> String {
        match self {
            PlatformKind::Zoom => rewrite_zoom_web_client(url),
            _ => url.trim().to_string(),
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Lowercased host and `host + path` of a URL. `None` for the host when the
/// input does not parse as a URL with a host.
fn normalized(url: &str) -> (Option<String>, String) {
    let trimmed = url.trim().to_lowercase();
    let parsed = Url::parse(&trimmed)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| Url::parse(&format!("https://{}", trimmed)).ok());

    match parsed.as_ref().and_then(|u| u.host_str().map(|h| (h, u))) {
        Some((host, u)) => (Some(host.to_string()), format!("{}{}", host, u.path())),
        None => (None, trimmed),
    }
}

fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.'
}

/// `pattern` appears in free text as a whole host or a subdomain of one
fn mentions_host(text: &str, pattern: &str) -> bool {
    text.match_indices(pattern).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + pattern.len()..].chars().next();
        let starts = match before {
            None => true,
            Some('.') => true,
            Some(c) => !is_host_char(c),
        };
        starts && !after.map(is_host_char).unwrap_or(false)
    })
}

/// Classify a meeting URL. Case-insensitive, tolerant of trailing slashes and
/// query strings. Text that is not a URL is scanned for a meeting host.
/// Never panics.
pub fn classify(url: &str) -> Classification {
    let (host, text) = normalized(url);
    let hit = |pattern: &str| match &host {
        Some(host) => host_matches(host, pattern),
        None => mentions_host(&text, pattern),
    };
    PLATFORMS
        .iter()
        .find(|p| p.meeting_hosts.iter().any(|&h| hit(h)))
        .map(|p| Classification::Known(p.kind))
        .unwrap_or(Classification::Unknown)
}

/// True when the URL is a sign-in page of any supported platform
pub fn is_auth_url(url: &str) -> bool {
    let (host, host_path) = normalized(url);
    let Some(host) = host else {
        return false;
    };
    PLATFORMS.iter().flat_map(|p| p.auth_patterns).any(|pattern| {
        match pattern.split_once('/') {
            Some((pattern_host, path)) => {
                host_matches(&host, pattern_host)
                    && host_path
                        .strip_prefix(&host)
                        .map(|p| p.trim_start_matches('/').starts_with(path))
                        .unwrap_or(false)
            }
            None => host_matches(&host, pattern),
        }
    })
}

/// True when the URL belongs to any supported meeting platform (and is not a
/// sign-in page)
pub fn is_meeting_url(url: &str) -> bool {
    match classify(url) {
        Classification::Known(kind) => kind.owns_url(url),
        Classification::Unknown => false,
    }
}

fn zoom_join_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(https?://[^/]*zoom\.(?:us|com))/j/(\d+)(.*)$").expect("valid zoom regex")
    })
}

fn rewrite_zoom_web_client(url: &str) -> String {
    let url = url.trim();
    match zoom_join_regex().captures(url) {
        Some(caps) => format!("{}/wc/join/{}{}", &caps[1], &caps[2], &caps[3]),
        None => url.to_string(),
    }
}
