//! Temporal constraints and the validator chain
//!
//! A [`Constraint`] is attached to users, roles, admin roles and to each
//! user-role assignment (as an override). The [`ValidatorChain`] evaluates a
//! constraint against the current time and, for timeouts, the session's last
//! access.
//!
//! Field conventions:
//!
//! - `None` means the field is unset: the check is skipped, and in an
//!   assignment override the role's value is inherited. An empty raw
//!   segment decodes to `None`.
//! - `"none"` is the explicit sentinel disabling a time or date check;
//!   `"all"` disables the day mask.
//! - Times are `HHMM`, dates `YYYYMMDD`, the day mask is a subset of the
//!   digits `1`..`7` with Sunday = `1`.

pub mod validator;

pub use validator::{
    ClockTimeValidator, DateValidator, DayMaskValidator, LockDateValidator, TimeoutValidator,
    ValidationContext, Validator, ValidatorChain,
};

use crate::error::{RbacError, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Sentinel disabling a time, date or lock-date check
pub const SENTINEL_NONE: &str = "none";

/// Sentinel disabling the day mask check
pub const DAY_MASK_ALL: &str = "all";

/// Number of fields in the raw constraint encoding
const RAW_FIELD_COUNT: usize = 9;

const RAW_SEPARATOR: char = ',';

/// Temporal constraint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Name of the user or role the constraint belongs to
    pub name: String,

    /// Idle timeout in minutes, 0 = unlimited
    #[serde(default)]
    pub timeout: Option<u32>,

    #[serde(default)]
    pub begin_time: Option<String>,

    #[serde(default)]
    pub end_time: Option<String>,

    #[serde(default)]
    pub begin_date: Option<String>,

    #[serde(default)]
    pub end_date: Option<String>,

    #[serde(default)]
    pub begin_lock_date: Option<String>,

    #[serde(default)]
    pub end_lock_date: Option<String>,

    #[serde(default)]
    pub day_mask: Option<String>,
}

impl Constraint {
    /// Create an empty constraint; every check is disabled
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, minutes: u32) -> Self {
        self.timeout = Some(minutes);
        self
    }

    pub fn with_time_window(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.begin_time = Some(begin.into());
        self.end_time = Some(end.into());
        self
    }

    pub fn with_dates(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.begin_date = Some(begin.into());
        self.end_date = Some(end.into());
        self
    }

    pub fn with_lock_dates(mut self, begin: impl Into<String>, end: impl Into<String>) -> Self {
        self.begin_lock_date = Some(begin.into());
        self.end_lock_date = Some(end.into());
        self
    }

    pub fn with_day_mask(mut self, mask: impl Into<String>) -> Self {
        self.day_mask = Some(mask.into());
        self
    }

    /// True if no temporal field is set
    pub fn is_unset(&self) -> bool {
        self.timeout.is_none()
            && [
                &self.begin_time,
                &self.end_time,
                &self.begin_date,
                &self.end_date,
                &self.begin_lock_date,
                &self.end_lock_date,
                &self.day_mask,
            ]
            .iter()
            .all(|field| is_unset(field))
    }

    /// Merge this override over `base`: set fields win, unset fields inherit.
    ///
    /// The result keeps this constraint's name unless it is empty.
    pub fn merged_over(&self, base: &Constraint) -> Constraint {
        fn pick(over: &Option<String>, base: &Option<String>) -> Option<String> {
            if is_unset(over) {
                base.clone()
            } else {
                over.clone()
            }
        }

        Constraint {
            name: if self.name.is_empty() {
                base.name.clone()
            } else {
                self.name.clone()
            },
            timeout: self.timeout.or(base.timeout),
            begin_time: pick(&self.begin_time, &base.begin_time),
            end_time: pick(&self.end_time, &base.end_time),
            begin_date: pick(&self.begin_date, &base.begin_date),
            end_date: pick(&self.end_date, &base.end_date),
            begin_lock_date: pick(&self.begin_lock_date, &base.begin_lock_date),
            end_lock_date: pick(&self.end_lock_date, &base.end_lock_date),
            day_mask: pick(&self.day_mask, &base.day_mask),
        }
    }

    /// Check every set field parses to a valid range
    ///
    /// A constraint that passes encodes to a raw value decoding back to an
    /// equal constraint.
    pub fn validate(&self) -> Result<()> {
        if self.name.contains(RAW_SEPARATOR) {
            return Err(RbacError::InvalidInput(format!(
                "Constraint name '{}' cannot contain '{}'",
                self.name, RAW_SEPARATOR
            )));
        }

        if self.name.trim() != self.name {
            return Err(RbacError::InvalidInput(format!(
                "Constraint name '{}' has surrounding whitespace",
                self.name
            )));
        }

        for (field, value) in self.text_fields() {
            if value.is_some_and(|v| v.trim().is_empty()) {
                return Err(RbacError::InvalidInput(format!(
                    "Constraint '{}' field {} is blank, leave it unset instead",
                    self.name, field
                )));
            }
        }

        for (field, value) in [("begin_time", &self.begin_time), ("end_time", &self.end_time)] {
            if let Some(raw) = active(value) {
                if parse_time(raw).is_none() {
                    return Err(self.invalid(field, raw, "expected HHMM"));
                }
            }
        }

        for (field, value) in [
            ("begin_date", &self.begin_date),
            ("end_date", &self.end_date),
            ("begin_lock_date", &self.begin_lock_date),
            ("end_lock_date", &self.end_lock_date),
        ] {
            if let Some(raw) = active(value) {
                if parse_date(raw).is_none() {
                    return Err(self.invalid(field, raw, "expected YYYYMMDD"));
                }
            }
        }

        if let Some(mask) = active_day_mask(&self.day_mask) {
            if !day_mask_regex().is_match(mask) {
                return Err(self.invalid("day_mask", mask, "expected digits 1-7 or 'all'"));
            }
        }

        Ok(())
    }

    fn text_fields(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("begin_time", self.begin_time.as_deref()),
            ("end_time", self.end_time.as_deref()),
            ("begin_date", self.begin_date.as_deref()),
            ("end_date", self.end_date.as_deref()),
            ("begin_lock_date", self.begin_lock_date.as_deref()),
            ("end_lock_date", self.end_lock_date.as_deref()),
            ("day_mask", self.day_mask.as_deref()),
        ]
    }

    fn invalid(&self, field: &str, raw: &str, expected: &str) -> RbacError {
        RbacError::InvalidInput(format!(
            "Constraint '{}' field {} = '{}': {}",
            self.name, field, raw, expected
        ))
    }

    /// Encode to the raw attribute form
    ///
    /// `name,timeout,beginTime,endTime,beginDate,endDate,beginLockDate,endLockDate,dayMask`
    pub fn encode(&self) -> String {
        let timeout = self.timeout.map(|t| t.to_string()).unwrap_or_default();
        let fields: [&str; RAW_FIELD_COUNT] = [
            &self.name,
            &timeout,
            self.begin_time.as_deref().unwrap_or(""),
            self.end_time.as_deref().unwrap_or(""),
            self.begin_date.as_deref().unwrap_or(""),
            self.end_date.as_deref().unwrap_or(""),
            self.begin_lock_date.as_deref().unwrap_or(""),
            self.end_lock_date.as_deref().unwrap_or(""),
            self.day_mask.as_deref().unwrap_or(""),
        ];
        fields.join(",")
    }

    /// Decode a raw attribute value into a new constraint
    pub fn decode(raw: &str) -> Result<Self> {
        let mut constraint = Constraint::default();
        constraint.decode_into(raw)?;
        Ok(constraint)
    }

    /// Decode a raw attribute value into this constraint.
    ///
    /// Missing trailing fields stay unset. A name already set on `self` is
    /// kept.
    pub fn decode_into(&mut self, raw: &str) -> Result<()> {
        let tokens: Vec<&str> = raw.split(RAW_SEPARATOR).map(str::trim).collect();
        if tokens.len() > RAW_FIELD_COUNT {
            return Err(RbacError::InvalidInput(format!(
                "Raw constraint has {} fields, expected at most {}",
                tokens.len(),
                RAW_FIELD_COUNT
            )));
        }

        let token = |idx: usize| -> Option<String> {
            tokens
                .get(idx)
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string())
        };

        if self.name.is_empty() {
            if let Some(name) = token(0) {
                self.name = name;
            }
        }

        self.timeout = match token(1) {
            Some(raw_timeout) => Some(raw_timeout.parse::<u32>().map_err(|_| {
                RbacError::InvalidInput(format!(
                    "Raw constraint timeout '{}' is not a number of minutes",
                    raw_timeout
                ))
            })?),
            None => None,
        };
        self.begin_time = token(2);
        self.end_time = token(3);
        self.begin_date = token(4);
        self.end_date = token(5);
        self.begin_lock_date = token(6);
        self.end_lock_date = token(7);
        self.day_mask = token(8);

        Ok(())
    }
}

fn is_unset(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, str::is_empty)
}

/// Value of a time/date field if it enables a check
pub(crate) fn active(field: &Option<String>) -> Option<&str> {
    field
        .as_deref()
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(SENTINEL_NONE))
}

/// Value of the day mask if it enables a check
pub(crate) fn active_day_mask(field: &Option<String>) -> Option<&str> {
    field
        .as_deref()
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(DAY_MASK_ALL))
}

/// Parse `HHMM` into minutes after midnight
pub(crate) fn parse_time(raw: &str) -> Option<u32> {
    if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u32 = raw[..2].parse().ok()?;
    let minutes: u32 = raw[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Parse `YYYYMMDD`
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

fn day_mask_regex() -> &'static Regex {
    static DAY_MASK: OnceLock<Regex> = OnceLock::new();
    DAY_MASK.get_or_init(|| Regex::new(r"^[1-7]{1,7}$").expect("static day mask pattern"))
}
