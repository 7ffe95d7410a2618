//! Client filter (C8): per-client allow/deny rules plus the Claude Code
//! system-prompt heuristic. Rules match on user-agent, path, a request
//! header, or a dotted-path field in the (already peeked) body; the Claude
//! Code check instead scores the system prompt's Dice-bigram similarity
//! against a set of known templates and compares it to a threshold.

use http::HeaderMap;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

#[derive(Debug)]
pub struct ClientRule {
    pub name: String,
    pub user_agent: Option<Regex>,
    pub path: Option<Regex>,
    pub header: Option<(String, Regex)>,
    pub verdict: Verdict,
}

impl ClientRule {
    fn matches(&self, user_agent: Option<&str>, path: &str, headers: &HeaderMap) -> bool {
        if let Some(re) = &self.user_agent
            && !user_agent.is_some_and(|ua| re.is_match(ua))
        {
            return false;
        }
        if let Some(re) = &self.path
            && !re.is_match(path)
        {
            return false;
        }
        if let Some((name, re)) = &self.header {
            let value = headers.get(name).and_then(|v| v.to_str().ok());
            if !value.is_some_and(|v| re.is_match(v)) {
                return false;
            }
        }
        true
    }
}

/// Known Claude Code / Claude Agent SDK system-prompt openings. Real
/// templates are long; this proxy only needs enough text for the bigram
/// scorer to separate a genuine client from a spoofed user-agent.
const CLAUDE_CODE_TEMPLATES: &[&str] = &[
    "You are Claude Code, Anthropic's official CLI for Claude",
    "You are a Claude agent, built on Anthropic's Claude Agent SDK",
];

pub struct ClientFilter {
    rules: Vec<ClientRule>,
    strict_claude_code: bool,
    dice_threshold: f64,
    default_allow_unknown: bool,
}

impl ClientFilter {
    pub fn new(
        rules: Vec<ClientRule>,
        strict_claude_code: bool,
        dice_threshold: f64,
        default_allow_unknown: bool,
    ) -> Self {
        Self {
            rules,
            strict_claude_code,
            dice_threshold,
            default_allow_unknown,
        }
    }

    /// `system_prompt` is whatever text `ProxyClassified::system_prompt_text`
    /// extracted, so this runs the same check across all three dialects.
    pub fn check(
        &self,
        user_agent: Option<&str>,
        path: &str,
        headers: &HeaderMap,
        system_prompt: Option<&str>,
    ) -> Verdict {
        for rule in &self.rules {
            if rule.matches(user_agent, path, headers) {
                return rule.verdict;
            }
        }

        if self.strict_claude_code && looks_like_claude_code(user_agent) {
            return self.check_claude_code_prompt(system_prompt);
        }

        Verdict::Allow
    }

    fn check_claude_code_prompt(&self, system_prompt: Option<&str>) -> Verdict {
        let Some(text) = system_prompt else {
            return if self.default_allow_unknown {
                Verdict::Allow
            } else {
                Verdict::Deny
            };
        };
        let best = CLAUDE_CODE_TEMPLATES
            .iter()
            .map(|template| dice_coefficient(text, template))
            .fold(0.0_f64, f64::max);
        if best >= self.dice_threshold {
            Verdict::Allow
        } else {
            Verdict::Deny
        }
    }
}

fn looks_like_claude_code(user_agent: Option<&str>) -> bool {
    user_agent.is_some_and(|ua| ua.contains("claude-cli"))
}

/// Character-bigram Dice coefficient: `2 * |intersection| / (|A| + |B|)`,
/// counting bigram multiplicity so repeated substrings aren't over-weighted.
pub fn dice_coefficient(a: &str, b: &str) -> f64 {
    let bigrams_a = bigrams(a);
    let bigrams_b = bigrams(b);
    if bigrams_a.is_empty() || bigrams_b.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }

    let mut matches = 0usize;
    let mut used = vec![false; bigrams_b.len()];
    for bg in &bigrams_a {
        if let Some(pos) = bigrams_b.iter().enumerate().find_map(|(i, other)| {
            (!used[i] && other == bg).then_some(i)
        }) {
            used[pos] = true;
            matches += 1;
        }
    }

    (2 * matches) as f64 / (bigrams_a.len() + bigrams_b.len()) as f64
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() < 2 {
        return Vec::new();
    }
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(dice_coefficient("hello", "hello"), 1.0);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(dice_coefficient("abc", "xyz"), 0.0);
    }

    #[test]
    fn near_match_scores_high() {
        let score = dice_coefficient(
            "You are Claude Code, Anthropic's official CLI for Claude",
            "You are Claude Code, the official CLI for Claude",
        );
        assert!(score > 0.8, "expected high similarity, got {score}");
    }

    #[test]
    fn strict_mode_denies_low_similarity_claude_code_prompt() {
        let filter = ClientFilter::new(Vec::new(), true, 0.8, false);
        let headers = HeaderMap::new();
        let verdict = filter.check(
            Some("claude-cli/2.0.53 (external, cli)"),
            "/v1/messages",
            &headers,
            Some("a totally unrelated prompt"),
        );
        assert_eq!(verdict, Verdict::Deny);
    }

    #[test]
    fn strict_mode_allows_high_similarity_claude_code_prompt() {
        let filter = ClientFilter::new(Vec::new(), true, 0.6, false);
        let headers = HeaderMap::new();
        let verdict = filter.check(
            Some("claude-cli/2.0.53 (external, cli)"),
            "/v1/messages",
            &headers,
            Some("You are Claude Code, Anthropic's official CLI for Claude, helping with code"),
        );
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn non_claude_code_user_agent_bypasses_the_prompt_check() {
        let filter = ClientFilter::new(Vec::new(), true, 0.99, false);
        let headers = HeaderMap::new();
        let verdict = filter.check(Some("curl/8.0"), "/v1/messages", &headers, None);
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn explicit_rule_short_circuits_before_claude_code_check() {
        let rules = vec![ClientRule {
            name: "deny-bots".to_string(),
            user_agent: Some(Regex::new("bot").unwrap()),
            path: None,
            header: None,
            verdict: Verdict::Deny,
        }];
        let filter = ClientFilter::new(rules, false, 0.8, true);
        let headers = HeaderMap::new();
        let verdict = filter.check(Some("evilbot/1.0"), "/v1/messages", &headers, None);
        assert_eq!(verdict, Verdict::Deny);
    }
}
