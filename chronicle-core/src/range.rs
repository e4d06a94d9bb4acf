//! Roll outcome canonicalization.
//!
//! Every roll is a d100 sample. Its outcome is stored as an interval
//! `"lo-hi"` inside the domain 1..=100. Descriptors arrive either as a
//! numeric span in some loose form, a free-text label in English or
//! Spanish, or not at all; [`canonicalize`] maps all of them onto the
//! fixed tier table below, or onto the roll's own outcome table when the
//! narrative declared one.

use crate::model::OutcomeBand;
use crate::places::slugify;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Smallest value of the roll domain.
pub const DOMAIN_MIN: u8 = 1;

/// Largest value of the roll domain.
pub const DOMAIN_MAX: u8 = 100;

/// Reasons a roll record cannot be kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("no rolled value")]
    MissingValue,

    #[error("rolled value '{0}' is not a number")]
    NotNumeric(String),

    #[error("rolled value {0} is outside 1-100")]
    OutOfDomain(i64),
}

/// A closed interval of the roll domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: u8,
    pub hi: u8,
}

impl Interval {
    pub const fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, value: u8) -> bool {
        self.lo <= value && value <= self.hi
    }

    /// Parse the numeric interval grammar.
    ///
    /// Accepts `lo-hi` with an ASCII hyphen, en or em dash, or the word
    /// `to`; reversed bounds; and a single number `n` meaning `n-n`. Bounds
    /// must lie inside the domain.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().replace(['\u{2013}', '\u{2014}'], "-").to_lowercase();
        if text.is_empty() {
            return None;
        }

        let (lo, hi) = match text.split_once('-').or_else(|| text.split_once(" to ")) {
            Some((lo, hi)) => (parse_bound(lo)?, parse_bound(hi)?),
            None => {
                let n = parse_bound(&text)?;
                (n, n)
            }
        };

        Some(Self::new(lo.min(hi), lo.max(hi)))
    }
}

fn parse_bound(text: &str) -> Option<u8> {
    let n: u16 = text.trim().parse().ok()?;
    if (DOMAIN_MIN as u16..=DOMAIN_MAX as u16).contains(&n) {
        Some(n as u8)
    } else {
        None
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}

/// One of the fixed outcome tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub name: &'static str,
    pub interval: Interval,
    /// Display label for records that carry none.
    pub label: &'static str,
    /// Accepted free-text labels, compared after folding.
    pub synonyms: &'static [&'static str],
}

/// The fixed partition of 1..=100, lowest first.
pub const TIERS: [Tier; 7] = [
    Tier {
        name: "critical_failure",
        interval: Interval::new(1, 5),
        label: "Critical failure",
        synonyms: &["critical failure", "crit fail", "fumble", "fallo critico", "fracaso critico", "pifia"],
    },
    Tier {
        name: "failure",
        interval: Interval::new(6, 25),
        label: "Failure",
        synonyms: &["failure", "fail", "fallo", "fracaso"],
    },
    Tier {
        name: "mixed",
        interval: Interval::new(26, 40),
        label: "Mixed",
        synonyms: &["mixed", "partial", "partial success", "mixto", "exito parcial"],
    },
    Tier {
        name: "status_quo",
        interval: Interval::new(41, 60),
        label: "Status quo",
        synonyms: &["status quo", "neutral", "no change", "statu quo", "sin cambios"],
    },
    Tier {
        name: "success",
        interval: Interval::new(61, 80),
        label: "Success",
        synonyms: &["success", "exito"],
    },
    Tier {
        name: "strong_success",
        interval: Interval::new(81, 95),
        label: "Strong success",
        synonyms: &["strong success", "great success", "gran exito", "exito notable"],
    },
    Tier {
        name: "critical_success",
        interval: Interval::new(96, 100),
        label: "Critical success",
        synonyms: &["critical success", "crit", "critical", "exito critico"],
    },
];

/// The tier containing a value of the domain.
pub fn tier_for(value: u8) -> &'static Tier {
    TIERS
        .iter()
        .find(|tier| tier.interval.contains(value))
        .unwrap_or(if value < DOMAIN_MIN { &TIERS[0] } else { &TIERS[TIERS.len() - 1] })
}

/// Look up a tier by free-text label, ignoring case and diacritics.
pub fn tier_for_label(label: &str) -> Option<&'static Tier> {
    let folded = slugify(label);
    if folded.is_empty() {
        return None;
    }
    TIERS.iter().find(|tier| {
        tier.name == folded || tier.synonyms.iter().any(|s| slugify(s) == folded)
    })
}

/// Map a descriptor to an interval: numeric grammar first, then labels.
pub fn parse_descriptor(descriptor: &str) -> Option<Interval> {
    Interval::parse(descriptor).or_else(|| tier_for_label(descriptor).map(|tier| tier.interval))
}

/// Read the sampled value of a roll.
///
/// Integers, integral floats and numeric strings are accepted.
pub fn sample_value(value: Option<&Value>) -> Result<u8, RangeError> {
    let n = match value {
        None | Some(Value::Null) => return Err(RangeError::MissingValue),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(n) => n,
            None => integral(n.as_f64()).ok_or_else(|| RangeError::NotNumeric(n.to_string()))?,
        },
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(RangeError::MissingValue);
            }
            match trimmed.parse::<i64>() {
                Ok(n) => n,
                Err(_) => integral(trimmed.parse::<f64>().ok()).ok_or_else(|| RangeError::NotNumeric(s.clone()))?,
            }
        }
        Some(other) => return Err(RangeError::NotNumeric(other.to_string())),
    };

    if (DOMAIN_MIN as i64..=DOMAIN_MAX as i64).contains(&n) {
        Ok(n as u8)
    } else {
        Err(RangeError::OutOfDomain(n))
    }
}

/// Whole-valued finite floats such as `74.0`.
fn integral(value: Option<f64>) -> Option<i64> {
    value
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

/// A canonicalized roll outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub rolled: u8,
    pub interval: Interval,
    pub label: String,
    /// The declared interval did not contain the rolled value.
    pub rebucketed: bool,
}

/// Canonicalize a roll's outcome.
///
/// A custom `table` takes precedence: the band containing the rolled value
/// is the outcome. Otherwise the declared `outcome` (numeric or label) and
/// then `label` are tried; with neither, the interval is inferred from the
/// value. A declared interval that misses the value is replaced by the
/// value's tier and flagged as rebucketed.
pub fn canonicalize(
    rolled: Option<&Value>,
    outcome: Option<&str>,
    label: Option<&str>,
    table: &[OutcomeBand],
) -> Result<Outcome, RangeError> {
    let rolled = sample_value(rolled)?;
    let label = label.map(str::trim).filter(|l| !l.is_empty());

    if let Some((interval, band)) = table
        .iter()
        .filter_map(|band| Interval::parse(&band.range).map(|i| (i, band)))
        .find(|(interval, _)| interval.contains(rolled))
    {
        return Ok(Outcome {
            rolled,
            interval,
            label: band.label.clone(),
            rebucketed: false,
        });
    }

    let declared = outcome
        .and_then(parse_descriptor)
        .or_else(|| label.and_then(tier_for_label).map(|tier| tier.interval));

    let fallback = tier_for(rolled);
    match declared {
        Some(interval) if interval.contains(rolled) => {
            let label = label.map(str::to_string).unwrap_or_else(|| {
                TIERS
                    .iter()
                    .find(|tier| tier.interval == interval)
                    .unwrap_or(fallback)
                    .label
                    .to_string()
            });
            Ok(Outcome {
                rolled,
                interval,
                label,
                rebucketed: false,
            })
        }
        Some(_) => Ok(Outcome {
            rolled,
            interval: fallback.interval,
            label: fallback.label.to_string(),
            rebucketed: true,
        }),
        None => Ok(Outcome {
            rolled,
            interval: fallback.interval,
            label: label.unwrap_or(fallback.label).to_string(),
            rebucketed: false,
        }),
    }
}
