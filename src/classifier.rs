use crate::config::{ClassifierConfig, ConfigError};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One entry of the classifier policy table as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(flatten)]
    pub kind: RuleKind,
    /// Replaces the generated reason when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Regular expression searched anywhere in the username
    Pattern { pattern: String },
    /// Whole username is lowercase hex with at least one digit and one letter
    HexString { min_len: usize },
    /// A digit group immediately repeated so it occurs `min_occurrences` times in a row
    RepeatedDigitGroup {
        min_group_len: usize,
        min_occurrences: usize,
    },
    /// A single digit repeated `min_run` times in a row
    RepeatedDigit { min_run: usize },
}

impl RuleSpec {
    fn pattern(pattern: &str) -> Self {
        Self {
            kind: RuleKind::Pattern {
                pattern: pattern.to_string(),
            },
            reason: None,
        }
    }

    fn with_kind(kind: RuleKind) -> Self {
        Self { kind, reason: None }
    }
}

/// The auxiliary heuristics evaluated after the digit-suffix rule, in order
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::pattern(r"^[a-z]+\d{8}$"),
        RuleSpec::pattern(r"^\w+_\d{5,}$"),
        RuleSpec::pattern(r"\d{6,}$"),
        RuleSpec::pattern(r"^\d{8,}$"),
        RuleSpec::with_kind(RuleKind::HexString { min_len: 12 }),
        RuleSpec::with_kind(RuleKind::RepeatedDigitGroup {
            min_group_len: 2,
            min_occurrences: 3,
        }),
        RuleSpec::with_kind(RuleKind::RepeatedDigit { min_run: 5 }),
        RuleSpec::pattern(r"(?:\d\D*){6}"),
        RuleSpec::pattern(r"^[a-zA-Z]\d{6,}$"),
        RuleSpec::pattern(r"_[12]\d{3}$"),
    ]
}

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    HexString {
        min_len: usize,
    },
    RepeatedDigitGroup {
        min_group_len: usize,
        min_occurrences: usize,
    },
    RepeatedDigit {
        min_run: usize,
    },
}

impl Matcher {
    fn matches(&self, username: &str) -> bool {
        match self {
            Matcher::Regex(regex) => regex.is_match(username),
            Matcher::HexString { min_len } => is_mixed_hex(username, *min_len),
            Matcher::RepeatedDigitGroup {
                min_group_len,
                min_occurrences,
            } => digit_runs(username)
                .any(|run| has_repeated_group(run, *min_group_len, *min_occurrences)),
            Matcher::RepeatedDigit { min_run } => digit_runs(username)
                .any(|run| has_repeated_digit(run, *min_run)),
        }
    }
}

#[derive(Debug, Clone)]
struct Rule {
    matcher: Matcher,
    reason: String,
}

/// Verdict for a single username
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub is_bot: bool,
    pub reason: String,
}

impl Verdict {
    fn human() -> Self {
        Self {
            is_bot: false,
            reason: String::new(),
        }
    }
}

/// Ordered first-match-wins username classifier.
///
/// The digit-suffix rule always runs first, followed by the configured policy table.
/// Any match means bot; order only decides which reason is reported.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ConfigError> {
        Self::new(config.digit_suffix_min, &config.rules)
    }

    pub fn new(digit_suffix_min: usize, table: &[RuleSpec]) -> Result<Self, ConfigError> {
        let suffix_pattern = format!(r"\d{{{digit_suffix_min},}}$");
        let suffix = Regex::new(&suffix_pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: suffix_pattern.clone(),
            message: e.to_string(),
        })?;

        let mut rules = Vec::with_capacity(table.len() + 1);
        rules.push(Rule {
            matcher: Matcher::Regex(suffix),
            reason: format!("Username ends with {digit_suffix_min}+ consecutive digits"),
        });

        for spec in table {
            let (matcher, generated) = match &spec.kind {
                RuleKind::Pattern { pattern } => {
                    let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })?;
                    (
                        Matcher::Regex(regex),
                        format!("Matches suspicious pattern: {pattern}"),
                    )
                }
                RuleKind::HexString { min_len } => (
                    Matcher::HexString { min_len: *min_len },
                    format!("Looks like a {min_len}+ character hex string"),
                ),
                RuleKind::RepeatedDigitGroup {
                    min_group_len,
                    min_occurrences,
                } => {
                    if *min_group_len == 0 || *min_occurrences < 2 {
                        return Err(ConfigError::InvalidValue(
                            "repeated_digit_group needs min_group_len >= 1 and min_occurrences >= 2"
                                .to_string(),
                        ));
                    }
                    (
                        Matcher::RepeatedDigitGroup {
                            min_group_len: *min_group_len,
                            min_occurrences: *min_occurrences,
                        },
                        format!(
                            "Digit group of {min_group_len}+ digits repeated {min_occurrences} times"
                        ),
                    )
                }
                RuleKind::RepeatedDigit { min_run } => {
                    if *min_run < 2 {
                        return Err(ConfigError::InvalidValue(
                            "repeated_digit needs min_run >= 2".to_string(),
                        ));
                    }
                    (
                        Matcher::RepeatedDigit { min_run: *min_run },
                        format!("Same digit repeated {min_run}+ times in a row"),
                    )
                }
            };

            rules.push(Rule {
                matcher,
                reason: spec.reason.clone().unwrap_or(generated),
            });
        }

        Ok(Self { rules })
    }

    /// Classify a username. Never fails; empty input is simply not a bot.
    pub fn classify(&self, username: &str) -> Verdict {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(username))
            .map(|rule| Verdict {
                is_bot: true,
                reason: rule.reason.clone(),
            })
            .unwrap_or_else(Verdict::human)
    }

    pub fn is_bot(&self, username: &str) -> bool {
        self.rules.iter().any(|rule| rule.matcher.matches(username))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Strip a leading `@` and surrounding whitespace; only handle characters are accepted
pub fn normalize_handle(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let handle = trimmed.strip_prefix('@').unwrap_or(trimmed).trim();
    if !handle.is_empty()
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Some(handle.to_string())
    } else {
        None
    }
}

fn is_mixed_hex(username: &str, min_len: usize) -> bool {
    username.len() >= min_len
        && username
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        && username.bytes().any(|b| b.is_ascii_digit())
        && username.bytes().any(|b| b.is_ascii_lowercase())
}

fn digit_runs(username: &str) -> impl Iterator<Item = &[u8]> {
    username
        .as_bytes()
        .split(|b| !b.is_ascii_digit())
        .filter(|run| !run.is_empty())
}

fn has_repeated_digit(run: &[u8], min_run: usize) -> bool {
    let mut count = 0;
    let mut previous = None;
    for &digit in run {
        if previous == Some(digit) {
            count += 1;
        } else {
            count = 1;
            previous = Some(digit);
        }
        if count >= min_run {
            return true;
        }
    }
    false
}

fn has_repeated_group(run: &[u8], min_group_len: usize, min_occurrences: usize) -> bool {
    for start in 0..run.len() {
        let remaining = run.len() - start;
        let max_group = remaining / min_occurrences;
        for group_len in min_group_len..=max_group {
            let group = &run[start..start + group_len];
            let repeated = (1..min_occurrences).all(|n| {
                let offset = start + n * group_len;
                &run[offset..offset + group_len] == group
            });
            if repeated {
                return true;
            }
        }
    }
    false
}
