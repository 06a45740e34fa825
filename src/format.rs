//! Turns raw model output into a structured answer, and formats rupee
//! amounts the way Indian retail reports write them.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::models::{Citation, ContextBlock, DataPoint, FormattedAnswer, UnitKind};

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.+)$").unwrap());

static RECOMMENDATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:recommend\w*|suggest\w*|consider\w*|should|advis\w*)\b").unwrap()
});

static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:₹|\bRs\.?|\bINR|\$)\s?\d[\d,]*(?:\.\d+)?(?:\s?(?:L|Cr|lakh|crore)\b)?").unwrap()
});

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?\s?%").unwrap());

static QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d[\d,]*\s(?:units?|pcs|pieces|items?|boxes|cartons|cases|kg|orders?)\b")
        .unwrap()
});

/// Structures a raw answer. Never fails; unstructured text simply yields
/// empty insight and recommendation lists.
pub fn format_answer(raw: &str, sources: &[ContextBlock]) -> FormattedAnswer {
    let mut answer = FormattedAnswer::default();

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(caps) = BULLET.captures(line) {
            answer.insights.push(caps[1].trim().to_string());
        }
        if RECOMMENDATION.is_match(trimmed) {
            answer.recommendations.push(trimmed.to_string());
        }
    }

    answer.citations = citations(sources);
    answer.data_points = data_points(raw);
    answer
}

fn citations(sources: &[ContextBlock]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .filter(|b| seen.insert((b.source, b.label.clone())))
        .map(|b| Citation {
            source: b.source.tag().to_string(),
            detail: b.label.clone(),
        })
        .collect()
}

fn data_points(raw: &str) -> Vec<DataPoint> {
    let mut points = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |value: &str, unit: UnitKind| {
        let value = value.trim().to_string();
        if seen.insert((value.clone(), unit as u8)) {
            points.push(DataPoint { value, unit });
        }
    };

    for m in CURRENCY.find_iter(raw) {
        push(m.as_str(), UnitKind::Currency);
    }
    for m in PERCENT.find_iter(raw) {
        push(m.as_str(), UnitKind::Percentage);
    }
    for m in QUANTITY.find_iter(raw) {
        push(m.as_str(), UnitKind::Quantity);
    }
    points
}

/// Formats a rupee amount.
///
/// Below one lakh the full figure is written with Indian digit grouping
/// (`₹99,999`); up to one crore it is shown in lakhs (`₹1.00 L`), and from
/// one crore in crores (`₹1.02 Cr`). The unit is chosen from the unrounded
/// amount, so `9_999_999` is `₹100.00 L`.
pub fn format_inr(amount: f64) -> String {
    let sign = if amount < 0.0 { "-" } else { "" };
    let abs = amount.abs();

    if abs >= 10_000_000.0 {
        format!("{}₹{:.2} Cr", sign, abs / 10_000_000.0)
    } else if abs >= 100_000.0 {
        format!("{}₹{:.2} L", sign, abs / 100_000.0)
    } else {
        format!("{}₹{}", sign, group_indian(abs.round() as u64))
    }
}

/// `1234567` → `12,34,567`: last three digits, then pairs.
fn group_indian(n: u64) -> String {
    let digits = n.to_string();
    if digits.len() <= 3 {
        return digits;
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();
    format!("{},{}", groups.join(","), tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContextSource;

    #[test]
    fn inr_thresholds() {
        assert_eq!(format_inr(99_999.0), "₹99,999");
        assert_eq!(format_inr(100_000.0), "₹1.00 L");
        assert_eq!(format_inr(9_999_999.0), "₹100.00 L");
        assert_eq!(format_inr(10_000_000.0), "₹1.00 Cr");
        assert_eq!(format_inr(10_200_000.0), "₹1.02 Cr");
    }

    #[test]
    fn inr_small_and_negative() {
        assert_eq!(format_inr(0.0), "₹0");
        assert_eq!(format_inr(999.0), "₹999");
        assert_eq!(format_inr(1_000.0), "₹1,000");
        assert_eq!(format_inr(12_345.0), "₹12,345");
        assert_eq!(format_inr(-2_500.0), "-₹2,500");
        assert_eq!(format_inr(-250_000.0), "-₹2.50 L");
    }

    #[test]
    fn indian_grouping() {
        assert_eq!(group_indian(1_234_567), "12,34,567");
        assert_eq!(group_indian(12_345_678_901), "12,34,56,78,901");
    }

    #[test]
    fn splits_insights_and_recommendations() {
        let raw = "Summary of the week.\n\
                   - Sales at VM_DL_001 rose 12% to ₹1.2 L\n\
                   2. Stock of SKU-1001 is down to 40 units\n\
                   We recommend moving stock from Mumbai.\n\
                   * You should reorder SKU-1001 this week";
        let answer = format_answer(raw, &[]);

        assert_eq!(
            answer.insights,
            vec![
                "Sales at VM_DL_001 rose 12% to ₹1.2 L",
                "Stock of SKU-1001 is down to 40 units",
                "You should reorder SKU-1001 this week",
            ]
        );
        assert_eq!(
            answer.recommendations,
            vec![
                "We recommend moving stock from Mumbai.",
                "* You should reorder SKU-1001 this week",
            ]
        );

        let units: Vec<(&str, UnitKind)> = answer
            .data_points
            .iter()
            .map(|d| (d.value.as_str(), d.unit))
            .collect();
        assert!(units.contains(&("₹1.2 L", UnitKind::Currency)));
        assert!(units.contains(&("12%", UnitKind::Percentage)));
        assert!(units.contains(&("40 units", UnitKind::Quantity)));
    }

    #[test]
    fn plain_text_never_fails() {
        let answer = format_answer("No data available for that store.", &[]);
        assert!(answer.insights.is_empty());
        assert!(answer.recommendations.is_empty());
        assert!(answer.data_points.is_empty());
    }

    #[test]
    fn citations_are_deduplicated() {
        let sources = vec![
            ContextBlock::new(ContextSource::Upload, "sales.csv", "a"),
            ContextBlock::new(ContextSource::Upload, "sales.csv", "b"),
            ContextBlock::new(ContextSource::ConfiguredPath, "master/stores.csv", "c"),
        ];
        let answer = format_answer("ok", &sources);
        assert_eq!(
            answer.citations,
            vec![
                Citation {
                    source: "UPLOADED FILE".to_string(),
                    detail: "sales.csv".to_string()
                },
                Citation {
                    source: "CONFIGURED PATH".to_string(),
                    detail: "master/stores.csv".to_string()
                },
            ]
        );
    }
}
