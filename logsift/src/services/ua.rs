// logsift/src/services/ua.rs
//
// User-agent substring rules. One case-insensitive Aho-Corasick pass per
// record; a hit marks the record as suspicious for the bot analyser.

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

static BUILTIN_AC: OnceLock<BotMatcher> = OnceLock::new();

const BUILTIN_PATTERNS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "slurp",
    "scrapy",
    "curl/",
    "wget/",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "go-http-client",
    "java/",
    "okhttp",
    "libwww-perl",
    "httpclient",
    "headlesschrome",
    "phantomjs",
];

pub struct BotMatcher {
    ac:       AhoCorasick,
    patterns: Vec<String>,
}

impl BotMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, aho_corasick::BuildError> {
        let patterns: Vec<String> = patterns
            .iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(&patterns)?;
        Ok(Self { ac, patterns })
    }

    /// Configured patterns, or the builtin list when none are configured.
    pub fn from_config(patterns: &[String]) -> Result<Self, aho_corasick::BuildError> {
        if patterns.is_empty() {
            Self::new(BUILTIN_PATTERNS)
        } else {
            Self::new(patterns)
        }
    }

    pub fn builtin() -> &'static BotMatcher {
        BUILTIN_AC.get_or_init(|| BotMatcher::new(BUILTIN_PATTERNS).expect("UA automaton build failed"))
    }

    /// First configured pattern found in `ua`.
    pub fn matched(&self, ua: &str) -> Option<&str> {
        if self.patterns.is_empty() {
            return None;
        }
        self.ac
            .find(ua)
            .map(|m| self.patterns[m.pattern().as_usize()].as_str())
    }

    pub fn is_bot(&self, ua: &str) -> bool {
        self.matched(ua).is_some()
    }
}
