//! Chat-line grammar.
//!
//! The single structural contract for untrusted input:
//!
//! ```text
//! <actor> has defeated <target> and received (<amount> coins)<anything>
//! ```
//!
//! Matching is case-insensitive, actor and target are the shortest runs that
//! reach the literal keywords, and `<amount>` is digits with optional `,`/`.`
//! grouping. Leading/trailing whitespace around the whole line is ignored, as is
//! anything after the closing `coins)` (trailing punctuation, clan tags).

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const LOOT_PATTERN: &str =
    r"(?i)^(.+?)\s+has\s+defeated\s+(.+?)\s+and\s+received\s+\(\s*([\d.,]+)\s*coins\).*$";

/// A parsed kill-with-loot fact. Transient: the engine turns it into ledger records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootEvent {
    pub actor: String,
    pub target: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    NoMatch,
    EmptyName,
    BadAmount(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch => write!(f, "line does not match the loot grammar"),
            Self::EmptyName => write!(f, "actor and target must be non-empty"),
            Self::BadAmount(raw) => write!(f, "invalid coin amount: {raw:?}"),
        }
    }
}

impl std::error::Error for ParseError {}

fn loot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LOOT_PATTERN).expect("loot pattern is a valid regex"))
}

/// Parse a raw chat line into a [`LootEvent`].
pub fn parse(raw: &str) -> Result<LootEvent, ParseError> {
    let line = raw.trim();
    let caps = loot_re().captures(line).ok_or(ParseError::NoMatch)?;

    let actor = caps[1].trim();
    let target = caps[2].trim();
    if actor.is_empty() || target.is_empty() {
        return Err(ParseError::EmptyName);
    }

    let amount = parse_grouped_amount(&caps[3])?;
    Ok(LootEvent {
        actor: actor.to_string(),
        target: target.to_string(),
        amount,
    })
}

/// Strip `,`/`.` grouping separators and parse base-10.
///
/// Values that would not fit a signed ledger amount are rejected.
pub fn parse_grouped_amount(raw: &str) -> Result<u64, ParseError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(ParseError::BadAmount(raw.to_string()));
    }
    digits
        .parse::<u64>()
        .ok()
        .filter(|v| *v <= i64::MAX as u64)
        .ok_or_else(|| ParseError::BadAmount(raw.to_string()))
}

/// Validate a structured `{killer, victim}` pair from a trusted caller.
///
/// Bypasses the grammar but enforces the same non-empty rule.
pub fn validate_kill(actor: &str, target: &str) -> Result<(String, String), ParseError> {
    let actor = actor.trim();
    let target = target.trim();
    if actor.is_empty() || target.is_empty() {
        return Err(ParseError::EmptyName);
    }
    Ok((actor.to_string(), target.to_string()))
}

/// Parse a manual GP amount: optional sign, grouping commas, optional `k`/`m`/`b`.
///
/// `"1.5m"` is 1 500 000, `"-50k"` is -50 000, `"1,250"` is 1 250.
pub fn parse_gp_amount(raw: &str) -> Result<i64, ParseError> {
    let bad = || ParseError::BadAmount(raw.to_string());
    let text = raw.trim().to_lowercase();

    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(&text)),
    };

    let (number, multiplier) = match body.chars().last() {
        Some('k') => (&body[..body.len() - 1], 1e3),
        Some('m') => (&body[..body.len() - 1], 1e6),
        Some('b') => (&body[..body.len() - 1], 1e9),
        _ => (body, 1.0),
    };

    let number: String = number.chars().filter(|c| *c != ',').collect();
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(bad());
    }

    let value: f64 = number.parse().map_err(|_| bad())?;
    let scaled = (value * multiplier).round();
    if !scaled.is_finite() || scaled > i64::MAX as f64 {
        return Err(bad());
    }

    let amount = scaled as i64;
    Ok(if negative { -amount } else { amount })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grouped_amount_with_trailing_punctuation() {
        let ev = parse("Zezima has defeated Woox and received (1,250,000 coins).").unwrap();
        assert_eq!(
            ev,
            LootEvent {
                actor: "Zezima".to_string(),
                target: "Woox".to_string(),
                amount: 1_250_000,
            }
        );
    }

    #[test]
    fn rejects_text_outside_grammar() {
        assert_eq!(parse("Zezima killed Woox"), Err(ParseError::NoMatch));
        assert_eq!(parse(""), Err(ParseError::NoMatch));
    }

    #[test]
    fn is_case_insensitive_and_tolerates_whitespace() {
        let ev = parse("  Iron Man HAS   DEFEATED  B0aty  and received ( 5.000 Coins) [clan]  ")
            .unwrap();
        assert_eq!(ev.actor, "Iron Man");
        assert_eq!(ev.target, "B0aty");
        assert_eq!(ev.amount, 5_000);
    }

    #[test]
    fn multi_word_names_stop_at_first_keyword() {
        let ev = parse("Big Dave has defeated Small Sam and received (10 coins)").unwrap();
        assert_eq!(ev.actor, "Big Dave");
        assert_eq!(ev.target, "Small Sam");
    }

    #[test]
    fn blank_target_is_rejected() {
        assert_eq!(
            parse("Zezima has defeated   and received (5 coins)"),
            Err(ParseError::EmptyName)
        );
    }

    #[test]
    fn separator_only_amount_is_rejected() {
        assert!(matches!(
            parse("Zezima has defeated Woox and received (,,, coins)"),
            Err(ParseError::BadAmount(_))
        ));
    }

    #[test]
    fn overflowing_amount_is_rejected() {
        assert!(matches!(
            parse("A has defeated B and received (99999999999999999999 coins)"),
            Err(ParseError::BadAmount(_))
        ));
    }

    #[test]
    fn structured_kill_requires_both_names() {
        assert_eq!(
            validate_kill(" Zezima ", "Woox"),
            Ok(("Zezima".to_string(), "Woox".to_string()))
        );
        assert_eq!(validate_kill("Zezima", "  "), Err(ParseError::EmptyName));
    }

    #[test]
    fn gp_amount_suffixes() {
        assert_eq!(parse_gp_amount("1.5m"), Ok(1_500_000));
        assert_eq!(parse_gp_amount("-50k"), Ok(-50_000));
        assert_eq!(parse_gp_amount("2B"), Ok(2_000_000_000));
        assert_eq!(parse_gp_amount("1,250"), Ok(1_250));
        assert_eq!(parse_gp_amount("+7"), Ok(7));
        assert!(parse_gp_amount("k").is_err());
        assert!(parse_gp_amount("12x").is_err());
        assert!(parse_gp_amount("1.2.3").is_err());
    }
}
