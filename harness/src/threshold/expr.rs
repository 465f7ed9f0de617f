//! Threshold expression parsing
//!
//! Expressions have the shape `<aggregation> <operator> <number>`, e.g.
//! `p(95)<2000`, `avg <= 150.5` or `rate<0.01`. They are parsed once, when
//! the script is loaded, into a `ThresholdExpr`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdParseError {
    #[error("empty threshold expression")]
    Empty,

    #[error("unknown aggregation '{0}'")]
    UnknownAggregation(String),

    #[error("invalid percentile in '{0}' (expected p(N) with 0 <= N <= 100)")]
    InvalidPercentile(String),

    #[error("missing or unknown comparison operator in '{0}'")]
    MissingOperator(String),

    #[error("invalid threshold value '{0}'")]
    InvalidValue(String),

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("aggregation '{aggregation}' cannot be used on metric '{metric}'")]
    Unsupported { metric: String, aggregation: String },
}

/// Statistic extracted from a metric before comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Rate,
    Count,
    Value,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(p) => write!(f, "p({})", p),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Value => f.write_str("value"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    // Longest operators first so "<=" is not read as "<"
    const TOKENS: [(&'static str, Comparison); 7] = [
        ("===", Comparison::Eq),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn apply(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `<aggregation> <op> <value>` expression
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub value: f64,
}

impl ThresholdExpr {
    pub fn holds(&self, observed: f64) -> bool {
        self.comparison.apply(observed, self.value)
    }
}

impl fmt::Display for ThresholdExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.comparison, self.value)
    }
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let source = input.trim();
        if source.is_empty() {
            return Err(ThresholdParseError::Empty);
        }

        let (aggregation, rest) = parse_aggregation(source)?;
        let rest = rest.trim_start();

        let (comparison, rest) = Comparison::TOKENS
            .iter()
            .find_map(|(token, cmp)| rest.strip_prefix(token).map(|r| (*cmp, r)))
            .ok_or_else(|| ThresholdParseError::MissingOperator(source.to_string()))?;

        let raw_value = rest.trim();
        let value = raw_value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ThresholdParseError::InvalidValue(raw_value.to_string()))?;

        Ok(Self {
            aggregation,
            comparison,
            value,
        })
    }
}

fn parse_aggregation(source: &str) -> Result<(Aggregation, &str), ThresholdParseError> {
    if let Some(after) = source.strip_prefix("p(") {
        let close = after
            .find(')')
            .ok_or_else(|| ThresholdParseError::InvalidPercentile(source.to_string()))?;
        let percentile = after[..close]
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|p| (0.0..=100.0).contains(p))
            .ok_or_else(|| ThresholdParseError::InvalidPercentile(source.to_string()))?;
        return Ok((Aggregation::Percentile(percentile), &after[close + 1..]));
    }

    let end = source
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(source.len());
    let (name, rest) = source.split_at(end);

    let aggregation = match name {
        "avg" => Aggregation::Avg,
        "min" => Aggregation::Min,
        "max" => Aggregation::Max,
        "med" => Aggregation::Med,
        "rate" => Aggregation::Rate,
        "count" => Aggregation::Count,
        "value" => Aggregation::Value,
        other => return Err(ThresholdParseError::UnknownAggregation(other.to_string())),
    };
    Ok((aggregation, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ThresholdExpr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_percentile() {
        let expr = parse("p(95)<2000");
        assert_eq!(expr.aggregation, Aggregation::Percentile(95.0));
        assert_eq!(expr.comparison, Comparison::Lt);
        assert_eq!(expr.value, 2000.0);

        let expr = parse("p(99.9) <= 350.5");
        assert_eq!(expr.aggregation, Aggregation::Percentile(99.9));
        assert_eq!(expr.comparison, Comparison::Le);
        assert_eq!(expr.value, 350.5);
    }

    #[test]
    fn test_parse_named_aggregations() {
        assert_eq!(parse("avg<200").aggregation, Aggregation::Avg);
        assert_eq!(parse("med >= 1").comparison, Comparison::Ge);
        assert_eq!(parse("rate<0.01").value, 0.01);
        assert_eq!(parse("count>10").comparison, Comparison::Gt);
        assert_eq!(parse("max===5").comparison, Comparison::Eq);
        assert_eq!(parse("min != 0").comparison, Comparison::Ne);
        assert_eq!(parse("value==3").aggregation, Aggregation::Value);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::Empty)
        );
        assert!(matches!(
            "mean<3".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::UnknownAggregation(_))
        ));
        assert!(matches!(
            "p(101)<3".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::InvalidPercentile(_))
        ));
        assert!(matches!(
            "p(95<3".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::InvalidPercentile(_))
        ));
        assert!(matches!(
            "avg 200".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::MissingOperator(_))
        ));
        assert!(matches!(
            "avg<fast".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::InvalidValue(_))
        ));
        assert!(matches!(
            "avg<2000ms".parse::<ThresholdExpr>(),
            Err(ThresholdParseError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_holds() {
        let expr = parse("p(95)<2000");
        assert!(expr.holds(1999.9));
        assert!(!expr.holds(2000.0));
        assert!(!expr.holds(2500.0));
    }
}
