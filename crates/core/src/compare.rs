//! Type-aware comparison of desired and observed values.

use crate::value::{State, Value, ValueKind};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static DAYS_ONLY: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^(-)?(\d+)$").ok());

static TIME_SPAN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(-)?(?:(\d+)\.)?(\d{1,2}):(\d{1,2})(?::(\d{1,2})(?:\.(\d{1,7}))?)?$").ok()
});

/// Compares desired values against observed ones.
///
/// Pure and infallible: values that cannot be interpreted as the requested
/// kind simply compare unequal.
pub struct ValueComparator;

impl ValueComparator {
    /// Whether `observed` satisfies `desired` under `kind`.
    pub fn equal(desired: &Value, observed: &Value, kind: ValueKind) -> bool {
        match kind {
            ValueKind::Scalar => scalar_eq(&desired.render(), &observed.render()),
            ValueKind::OrderedList => {
                let desired = desired.as_list();
                let observed = observed.as_list();
                desired.len() == observed.len()
                    && desired.iter().zip(&observed).all(|(d, o)| scalar_eq(d, o))
            }
            ValueKind::UnorderedSet => to_set(desired) == to_set(observed),
            ValueKind::Boolean => match (desired.as_bool(), observed.as_bool()) {
                (Some(d), Some(o)) => d == o,
                _ => false,
            },
            ValueKind::Duration => {
                match (
                    parse_duration(&desired.render()),
                    parse_duration(&observed.render()),
                ) {
                    (Some(d), Some(o)) => d == o,
                    _ => false,
                }
            }
        }
    }

    /// Whether an observed state satisfies a desired state: both absent, or
    /// both present and [`equal`](Self::equal).
    pub fn satisfied(desired: &State, observed: &State, kind: ValueKind) -> bool {
        match (desired, observed) {
            (State::Absent, State::Absent) => true,
            (State::Present(d), State::Present(o)) => Self::equal(d, o, kind),
            _ => false,
        }
    }
}

fn scalar_eq(desired: &str, observed: &str) -> bool {
    let (desired, observed) = (desired.trim(), observed.trim());
    match (numeric(desired), numeric(observed)) {
        (Some(d), Some(o)) => d == o,
        _ => desired == observed,
    }
}

/// Plain decimal numbers only; `NaN`, `inf` and exponents stay textual.
fn numeric(s: &str) -> Option<f64> {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    let valid = !digits.is_empty()
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1;
    if valid {
        s.parse().ok()
    } else {
        None
    }
}

fn to_set(value: &Value) -> BTreeSet<String> {
    value
        .as_list()
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a time span in the `[-][d.]hh:mm[:ss[.fffffff]]` form, or a bare
/// number of days.
pub fn parse_duration(text: &str) -> Option<chrono::Duration> {
    let text = text.trim();

    if let Some(caps) = DAYS_ONLY.as_ref()?.captures(text) {
        let days: i64 = caps[2].parse().ok()?;
        let span = chrono::Duration::try_days(days)?;
        return Some(if caps.get(1).is_some() { -span } else { span });
    }

    let caps = TIME_SPAN.as_ref()?.captures(text)?;

    let field = |i: usize| -> Option<i64> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let (days, hours, minutes, seconds) = (field(2)?, field(3)?, field(4)?, field(5)?);
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }

    // Fractional seconds are ticks of 100ns, right-padded to seven digits.
    let ticks = match caps.get(6) {
        Some(m) => format!("{:0<7}", m.as_str()).parse::<i64>().ok()?,
        None => 0,
    };

    let total = chrono::Duration::try_days(days)?
        + chrono::Duration::try_hours(hours)?
        + chrono::Duration::try_minutes(minutes)?
        + chrono::Duration::try_seconds(seconds)?
        + chrono::Duration::nanoseconds(ticks * 100);

    Some(if caps.get(1).is_some() { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_scalar_trims_and_is_case_sensitive() {
        assert!(ValueComparator::equal(&"LAN".into(), &" LAN ".into(), ValueKind::Scalar));
        assert!(!ValueComparator::equal(&"LAN".into(), &"lan".into(), ValueKind::Scalar));
    }

    #[test]
    fn test_scalar_numbers_compare_by_value() {
        assert!(ValueComparator::equal(&Value::Integer(0), &"0".into(), ValueKind::Scalar));
        assert!(ValueComparator::equal(&Value::Integer(5), &"05".into(), ValueKind::Scalar));
        assert!(ValueComparator::equal(&"50".into(), &"50.0".into(), ValueKind::Scalar));
        assert!(!ValueComparator::equal(&Value::Integer(5000), &"500".into(), ValueKind::Scalar));
        assert!(ValueComparator::equal(&"NaN".into(), &"NaN ".into(), ValueKind::Scalar));
    }

    #[test]
    fn test_addresses_are_not_numbers() {
        assert!(!ValueComparator::equal(
            &"192.168.10.1".into(),
            &"192.168.10.10".into(),
            ValueKind::Scalar
        ));
    }

    #[test]
    fn test_unordered_set_ignores_order() {
        let desired = list(&["192.168.10.100", "192.168.10.200"]);
        let observed = list(&["192.168.10.200", "192.168.10.100"]);
        assert!(ValueComparator::equal(&desired, &observed, ValueKind::UnorderedSet));
    }

    #[test]
    fn test_unordered_set_scalar_equals_list_of_one() {
        let desired: Value = "192.168.10.100".into();
        let observed = list(&["192.168.10.100"]);
        assert!(ValueComparator::equal(&desired, &observed, ValueKind::UnorderedSet));
    }

    #[test]
    fn test_unordered_set_detects_difference() {
        let desired = list(&["192.168.10.100", "192.168.10.200"]);
        let observed = list(&["192.168.10.100"]);
        assert!(!ValueComparator::equal(&desired, &observed, ValueKind::UnorderedSet));
    }

    #[test]
    fn test_ordered_list_respects_order() {
        let desired = list(&["10.0.0.1", "10.0.0.2"]);
        let reversed = list(&["10.0.0.2", "10.0.0.1"]);
        assert!(ValueComparator::equal(&desired, &desired.clone(), ValueKind::OrderedList));
        assert!(!ValueComparator::equal(&desired, &reversed, ValueKind::OrderedList));
    }

    #[test]
    fn test_boolean_parses_text() {
        assert!(ValueComparator::equal(&Value::Bool(true), &"True".into(), ValueKind::Boolean));
        assert!(ValueComparator::equal(&Value::Bool(false), &"false".into(), ValueKind::Boolean));
        assert!(!ValueComparator::equal(&Value::Bool(true), &"False".into(), ValueKind::Boolean));
        assert!(!ValueComparator::equal(&Value::Bool(true), &"yes".into(), ValueKind::Boolean));
    }

    #[test]
    fn test_duration_normalizes_rendering() {
        assert!(ValueComparator::equal(&"1:00:00".into(), &"01:00:00".into(), ValueKind::Duration));
        assert!(ValueComparator::equal(&"8.00:00:00".into(), &"8".into(), ValueKind::Duration));
        assert!(ValueComparator::equal(&"0".into(), &"00:00:00".into(), ValueKind::Duration));
        assert!(!ValueComparator::equal(&"1:00:00".into(), &"00:30:00".into(), ValueKind::Duration));
        assert!(!ValueComparator::equal(&"1:00:00".into(), &"garbage".into(), ValueKind::Duration));
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("1:00:00"), chrono::Duration::try_hours(1));
        assert_eq!(parse_duration("1.00:00:00"), chrono::Duration::try_days(1));
        assert_eq!(parse_duration("00:00:01.5"), Some(chrono::Duration::milliseconds(1500)));
        assert_eq!(parse_duration("-00:05"), chrono::Duration::try_minutes(-5));
        assert_eq!(parse_duration("24:00:00"), None);
        assert_eq!(parse_duration("1:60"), None);
    }

    #[test]
    fn test_duration_patterns_compile_once() {
        assert!(DAYS_ONLY.is_some());
        assert!(TIME_SPAN.is_some());
        // repeated parses share the compiled patterns
        for _ in 0..3 {
            assert_eq!(parse_duration(" 8 "), chrono::Duration::try_days(8));
        }
    }

    #[test]
    fn test_satisfied_handles_absence() {
        let desired = State::present("LAN");
        assert!(ValueComparator::satisfied(&State::Absent, &State::Absent, ValueKind::Scalar));
        assert!(!ValueComparator::satisfied(&desired, &State::Absent, ValueKind::Scalar));
        assert!(!ValueComparator::satisfied(&State::Absent, &desired, ValueKind::Scalar));
        assert!(ValueComparator::satisfied(&desired, &State::present("LAN"), ValueKind::Scalar));
    }
}
