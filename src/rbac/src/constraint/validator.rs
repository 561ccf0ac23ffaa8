//! Temporal validators and the chain that runs them

use super::{active, active_day_mask, parse_date, parse_time, Constraint};
use crate::config::ValidatorConfig;
use crate::error::ConstraintViolation;
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;

/// Inputs a validator evaluates a constraint against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    /// Current wall-clock time in the directory's time zone
    pub now: NaiveDateTime,

    /// Last access of the session being validated, `None` if never used
    pub last_access: Option<NaiveDateTime>,
}

impl ValidationContext {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            last_access: None,
        }
    }

    pub fn with_last_access(mut self, last_access: Option<NaiveDateTime>) -> Self {
        self.last_access = last_access;
        self
    }
}

/// A stateless temporal check
pub trait Validator: Send + Sync {
    /// Validator name for logging
    fn name(&self) -> &'static str;

    /// Evaluate one constraint
    fn check(
        &self,
        constraint: &Constraint,
        ctx: &ValidationContext,
    ) -> Result<(), ConstraintViolation>;
}

/// Passes if today lies within `[begin_date, end_date]`; each bound may be disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct DateValidator;

impl Validator for DateValidator {
    fn name(&self) -> &'static str {
        "date"
    }

    fn check(
        &self,
        constraint: &Constraint,
        ctx: &ValidationContext,
    ) -> Result<(), ConstraintViolation> {
        let today = ctx.now.date();

        if let Some(raw) = active(&constraint.begin_date) {
            match parse_date(raw) {
                Some(begin) if today >= begin => {}
                _ => return Err(ConstraintViolation::BadDate),
            }
        }

        if let Some(raw) = active(&constraint.end_date) {
            match parse_date(raw) {
                Some(end) if today <= end => {}
                _ => return Err(ConstraintViolation::BadDate),
            }
        }

        Ok(())
    }
}

/// Fails while today lies inside `[begin_lock_date, end_lock_date]`
#[derive(Debug, Default, Clone, Copy)]
pub struct LockDateValidator;

impl Validator for LockDateValidator {
    fn name(&self) -> &'static str {
        "lock_date"
    }

    fn check(
        &self,
        constraint: &Constraint,
        ctx: &ValidationContext,
    ) -> Result<(), ConstraintViolation> {
        let (Some(raw_begin), Some(raw_end)) = (
            active(&constraint.begin_lock_date),
            active(&constraint.end_lock_date),
        ) else {
            return Ok(());
        };

        let (Some(begin), Some(end)) = (parse_date(raw_begin), parse_date(raw_end)) else {
            return Err(ConstraintViolation::Locked);
        };

        let today = ctx.now.date();
        if begin <= today && today <= end {
            return Err(ConstraintViolation::Locked);
        }

        Ok(())
    }
}

/// Passes if the current time of day lies within `[begin_time, end_time]`
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockTimeValidator;

impl Validator for ClockTimeValidator {
    fn name(&self) -> &'static str {
        "clock_time"
    }

    fn check(
        &self,
        constraint: &Constraint,
        ctx: &ValidationContext,
    ) -> Result<(), ConstraintViolation> {
        let (Some(raw_begin), Some(raw_end)) =
            (active(&constraint.begin_time), active(&constraint.end_time))
        else {
            return Ok(());
        };

        // 0000-0000 means around the clock
        if raw_begin == "0000" && raw_end == "0000" {
            return Ok(());
        }

        let (Some(begin), Some(end)) = (parse_time(raw_begin), parse_time(raw_end)) else {
            return Err(ConstraintViolation::BadTime);
        };

        let now = ctx.now.hour() * 60 + ctx.now.minute();
        if begin <= now && now <= end {
            Ok(())
        } else {
            Err(ConstraintViolation::BadTime)
        }
    }
}

/// Passes if today's day digit (Sunday = 1) is in the day mask
#[derive(Debug, Default, Clone, Copy)]
pub struct DayMaskValidator;

impl Validator for DayMaskValidator {
    fn name(&self) -> &'static str {
        "day_mask"
    }

    fn check(
        &self,
        constraint: &Constraint,
        ctx: &ValidationContext,
    ) -> Result<(), ConstraintViolation> {
        let Some(mask) = active_day_mask(&constraint.day_mask) else {
            return Ok(());
        };

        let digit = char::from_digit(ctx.now.weekday().number_from_sunday(), 10);
        match digit {
            Some(day) if mask.contains(day) => Ok(()),
            _ => Err(ConstraintViolation::BadDay),
        }
    }
}

/// Fails once the session has been idle for `timeout` minutes
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeoutValidator;

impl Validator for TimeoutValidator {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn check(
        &self,
        constraint: &Constraint,
        ctx: &ValidationContext,
    ) -> Result<(), ConstraintViolation> {
        let timeout = match constraint.timeout {
            Some(minutes) if minutes > 0 => minutes,
            _ => return Ok(()),
        };

        let Some(last_access) = ctx.last_access else {
            return Ok(());
        };

        let idle = ctx.now.signed_duration_since(last_access);
        if idle < chrono::Duration::minutes(i64::from(timeout)) {
            Ok(())
        } else {
            Err(ConstraintViolation::Timeout)
        }
    }
}

/// Ordered list of validators
///
/// Validators are independent; the order only decides which reason is
/// reported when several would fail.
pub struct ValidatorChain {
    validators: Vec<Box<dyn Validator>>,
}

impl ValidatorChain {
    /// Create a chain from explicit validators
    pub fn new(validators: Vec<Box<dyn Validator>>) -> Self {
        Self { validators }
    }

    /// All five built-in validators
    pub fn standard() -> Self {
        Self::from_config(&ValidatorConfig::default())
    }

    /// Built-in validators enabled by configuration, in fixed order
    pub fn from_config(config: &ValidatorConfig) -> Self {
        let mut validators: Vec<Box<dyn Validator>> = Vec::with_capacity(5);
        if config.clock_time {
            validators.push(Box::new(ClockTimeValidator));
        }
        if config.date {
            validators.push(Box::new(DateValidator));
        }
        if config.day_mask {
            validators.push(Box::new(DayMaskValidator));
        }
        if config.lock_date {
            validators.push(Box::new(LockDateValidator));
        }
        if config.timeout {
            validators.push(Box::new(TimeoutValidator));
        }
        Self::new(validators)
    }

    /// First failure in chain order
    pub fn validate(
        &self,
        constraint: &Constraint,
        ctx: &ValidationContext,
    ) -> Result<(), ConstraintViolation> {
        for validator in &self.validators {
            validator.check(constraint, ctx)?;
        }
        Ok(())
    }

    /// Every failure in chain order
    pub fn validate_all(
        &self,
        constraint: &Constraint,
        ctx: &ValidationContext,
    ) -> Vec<ConstraintViolation> {
        self.validators
            .iter()
            .filter_map(|validator| validator.check(constraint, ctx).err())
            .collect()
    }

    /// Names of the validators in chain order
    pub fn names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl Default for ValidatorChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorChain")
            .field("validators", &self.names())
            .finish()
    }
}
