use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Scale-reported state of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Stable,
    Unstable,
    Overload,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Stable => f.write_str("stable"),
            Status::Unstable => f.write_str("unstable"),
            Status::Overload => f.write_str("overload"),
            Status::Error => f.write_str("error"),
        }
    }
}

/// Decoded outcome of one exchange.
///
/// Weight and unit are either both present or both absent. A present
/// weight always comes with [`Status::Stable`] or [`Status::Unstable`],
/// [`Status::Overload`] and [`Status::Error`] never carry one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightReading {
    weight: Option<f64>,
    unit: Option<String>,
    status: Status,
}

impl WeightReading {
    /// Settled weight. `weight` must be finite and `unit` non-empty, as
    /// [`parse`] guarantees for readings taken off the wire.
    pub fn stable(weight: f64, unit: impl Into<String>) -> Self {
        Self::weighed(Status::Stable, weight, unit.into())
    }

    /// Weight still moving. Same constraints as [`WeightReading::stable`].
    pub fn unstable(weight: f64, unit: impl Into<String>) -> Self {
        Self::weighed(Status::Unstable, weight, unit.into())
    }

    /// Scale answered `I`: still settling, no value available.
    pub fn busy() -> Self {
        Self::bare(Status::Unstable)
    }

    pub fn overload() -> Self {
        Self::bare(Status::Overload)
    }

    pub fn error() -> Self {
        Self::bare(Status::Error)
    }

    fn weighed(status: Status, weight: f64, unit: String) -> Self {
        debug_assert!(matches!(status, Status::Stable | Status::Unstable));
        debug_assert!(weight.is_finite(), "weight must be finite");
        debug_assert!(!unit.is_empty(), "unit must not be empty");
        Self {
            weight: Some(weight),
            unit: Some(unit),
            status,
        }
    }

    fn bare(status: Status) -> Self {
        Self {
            weight: None,
            unit: None,
            status,
        }
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// True if the reading carries a value.
    pub fn is_weighed(&self) -> bool {
        self.weight.is_some()
    }
}

impl fmt::Display for WeightReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.weight, self.unit.as_deref()) {
            (Some(weight), Some(unit)) => write!(f, "{} {} [{}]", weight, unit, self.status),
            _ => write!(f, "[{}]", self.status),
        }
    }
}

impl From<Option<&str>> for WeightReading {
    fn from(line: Option<&str>) -> Self {
        match line {
            Some(line) => parse(line),
            None => WeightReading::error(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    /// `<code>,<value> <unit>`
    Weighed(Status),
    /// Status code only, with a note for the log
    Bare(Status, &'static str),
}

/// Checked top to bottom, first matching prefix wins.
const RULES: [(&str, Rule); 5] = [
    ("ST", Rule::Weighed(Status::Stable)),
    ("US", Rule::Weighed(Status::Unstable)),
    ("I", Rule::Bare(Status::Unstable, "scale busy")),
    ("?", Rule::Bare(Status::Error, "invalid command")),
    ("OL", Rule::Bare(Status::Overload, "overload condition")),
];

/// Decode one response line. Never fails, anything unrecognized or
/// malformed becomes an [`Status::Error`] reading.
pub fn parse(line: &str) -> WeightReading {
    let line = line.trim();

    let Some((_, rule)) = RULES.iter().find(|(prefix, _)| line.starts_with(prefix)) else {
        if line.is_empty() {
            debug!("empty response");
        } else {
            warn!(response = line, "unknown response");
        }
        return WeightReading::error();
    };

    match *rule {
        Rule::Weighed(status) => match parse_payload(line) {
            Some((weight, unit)) => WeightReading::weighed(status, weight, unit.to_string()),
            None => {
                warn!(response = line, "malformed weight payload");
                WeightReading::error()
            }
        },
        Rule::Bare(status, note) => {
            debug!(response = line, "{}", note);
            WeightReading::bare(status)
        }
    }
}

fn parse_payload(line: &str) -> Option<(f64, &str)> {
    let field = line.split(',').nth(1)?;
    let mut tokens = field.split(' ');
    let weight = tokens.next()?.parse::<f64>().ok()?;
    let unit = tokens.next().filter(|unit| !unit.is_empty())?;
    weight.is_finite().then_some((weight, unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bare(reading: &WeightReading, status: Status) {
        assert_eq!(reading.status(), status);
        assert_eq!(reading.weight(), None);
        assert_eq!(reading.unit(), None);
    }

    #[test]
    fn test_stable() {
        let reading = parse("ST,12.34 kg");
        assert_eq!(reading, WeightReading::stable(12.34, "kg"));
        assert_eq!(reading.weight(), Some(12.34));
        assert_eq!(reading.unit(), Some("kg"));
        assert_eq!(reading.status(), Status::Stable);
    }

    #[test]
    fn test_unstable() {
        let reading = parse("US,0.50 kg");
        assert_eq!(reading.weight(), Some(0.5));
        assert_eq!(reading.unit(), Some("kg"));
        assert_eq!(reading.status(), Status::Unstable);
    }

    #[test]
    fn test_signed_zero_padded_value() {
        assert_eq!(parse("ST,+00123.45 g"), WeightReading::stable(123.45, "g"));
        assert_eq!(parse("US,-0002.50 lb"), WeightReading::unstable(-2.5, "lb"));
    }

    #[test]
    fn test_surrounding_whitespace() {
        assert_eq!(parse("  ST,1.5 kg\r\n"), WeightReading::stable(1.5, "kg"));
    }

    #[test]
    fn test_status_only_lines() {
        assert_bare(&parse("OL"), Status::Overload);
        assert_bare(&parse("?"), Status::Error);
        assert_bare(&parse("I"), Status::Unstable);
        assert_bare(&parse(""), Status::Error);
        assert_bare(&WeightReading::from(None), Status::Error);
        assert_eq!(WeightReading::from(Some("I")), WeightReading::busy());
    }

    #[test]
    fn test_malformed_payload() {
        assert_bare(&parse("ST,notanumber kg"), Status::Error);
        assert_bare(&parse("ST"), Status::Error);
        assert_bare(&parse("US,"), Status::Error);
        assert_bare(&parse("ST,12.34"), Status::Error);
        assert_bare(&parse("ST,12.34 "), Status::Error);
        assert_bare(&parse("ST,inf kg"), Status::Error);
        assert_bare(&parse("US,NaN kg"), Status::Error);
    }

    #[test]
    fn test_unknown_lines() {
        assert_bare(&parse("XYZ"), Status::Error);
        // Prefix match is case-sensitive
        assert_bare(&parse("st,1.0 kg"), Status::Error);
        assert_bare(&parse("ol"), Status::Error);
    }

    #[test]
    fn test_prefix_only_governs() {
        assert_bare(&parse("OL,99.9 kg"), Status::Overload);
        assert_bare(&parse("I4 A"), Status::Unstable);
        assert_bare(&parse("?E"), Status::Error);
    }

    #[test]
    fn test_rule_order() {
        let prefixes: Vec<&str> = RULES.iter().map(|(prefix, _)| *prefix).collect();
        assert_eq!(prefixes, ["ST", "US", "I", "?", "OL"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(WeightReading::stable(1.25, "kg").to_string(), "1.25 kg [stable]");
        assert_eq!(WeightReading::overload().to_string(), "[overload]");
    }

    #[test]
    fn test_json() {
        let json = serde_json::to_string(&WeightReading::unstable(0.5, "kg")).unwrap();
        assert_eq!(json, r#"{"weight":0.5,"unit":"kg","status":"unstable"}"#);
        let json = serde_json::to_string(&WeightReading::error()).unwrap();
        assert_eq!(json, r#"{"weight":null,"unit":null,"status":"error"}"#);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "weight must be finite")]
    fn test_stable_rejects_nan() {
        let _ = WeightReading::stable(f64::NAN, "kg");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "unit must not be empty")]
    fn test_unstable_rejects_empty_unit() {
        let _ = WeightReading::unstable(1.0, "");
    }
}
