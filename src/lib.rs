//! Runtime conformance-validation engines for Vulkan pipelines and synchronization.
//!
//! This crate contains the algorithmic core of a conformance-validation layer:
//! it does not talk to a driver, wrap handles, or intercept API calls. A
//! surrounding layer is expected to call into the engines here with read-only
//! snapshots of driver object state and to forward the resulting violations to
//! whatever reporting mechanism it uses.
//!
//! Two engines are provided:
//!
//! - The **shader/pipeline state engine** ([`spirv`], [`shader`], [`pipeline`])
//!   parses a SPIR-V module, reconstructs the types, constants and resource
//!   bindings of an entry point, and checks a pipeline stage against the
//!   declared pipeline layout and the device's features and limits. Adjacent
//!   stages can then be matched against each other.
//! - The **synchronization engine** ([`sync`]) checks pipeline barriers,
//!   render-pass self-dependency barriers and queue submissions (binary and
//!   timeline semaphore operations) for legality.
//!
//! Every engine is synchronous, performs no I/O, and never mutates the
//! snapshots it is given; the caller decides how calls are serialized.
//!
//! Rule violations are accumulated as [`Violation`] values rather than
//! aborting at the first failure. Conditions that make the remaining checks
//! for a unit meaningless (a missing entry point, a specialization fold that
//! corrupts the module) are returned as `Err(Box<ValidationError>)` instead
//! and abort that unit only.

use std::{
    borrow::Cow,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
};

pub mod device;
pub mod pipeline;
pub mod shader;
pub mod spirv;
pub mod sync;

#[cfg(test)]
mod tests;

/// Something that needs to be supported or enabled to allow a particular operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requires {
    DeviceFeature(&'static str),
    DeviceExtension(&'static str),
    DeviceLimit(&'static str),
}

impl Display for Requires {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Requires::DeviceFeature(feature) => write!(f, "device feature `{}`", feature),
            Requires::DeviceExtension(extension) => write!(f, "device extension `{}`", extension),
            Requires::DeviceLimit(limit) => write!(f, "device limit `{}`", limit),
        }
    }
}

/// A set of requirements that must all be met for an operation to be allowed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequiresAllOf(pub &'static [Requires]);

impl Display for RequiresAllOf {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if let Some((first, rest)) = self.0.split_first() {
            write!(f, "{}", first)?;

            for requires in rest {
                write!(f, " + {}", requires)?;
            }
        }

        Ok(())
    }
}

/// One or more alternative sets of requirements; at least one set must be met.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequiresOneOf(pub &'static [RequiresAllOf]);

impl RequiresOneOf {
    /// Returns whether there are any requirements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for RequiresOneOf {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if let Some((first, rest)) = self.0.split_first() {
            write!(f, "{}", first)?;

            for requires_all_of in rest {
                write!(f, " or {}", requires_all_of)?;
            }
        }

        Ok(())
    }
}

/// The description of a single detected conformance problem.
///
/// `context` names the value or call site the problem applies to, `problem`
/// describes what is wrong with it, and `vuids` lists the Vulkan valid-usage
/// identifiers the check corresponds to, where one exists.
#[derive(Clone, Debug, Default)]
pub struct ValidationError {
    pub context: Cow<'static, str>,
    pub problem: Cow<'static, str>,
    pub requires_one_of: RequiresOneOf,
    pub vuids: &'static [&'static str],
}

impl ValidationError {
    /// Prepends an element to `context`.
    pub fn add_context(mut self: Box<Self>, context: impl Into<Cow<'static, str>>) -> Box<Self> {
        let old_context = std::mem::take(&mut self.context);
        let context = context.into();

        if old_context.is_empty() {
            self.context = context;
        } else {
            self.context = format!("{}.{}", context, old_context).into();
        }

        self
    }

    /// Sets the `vuids` field.
    pub fn set_vuids(mut self: Box<Self>, vuids: &'static [&'static str]) -> Box<Self> {
        self.vuids = vuids;
        self
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        write!(f, "{}", self.problem)?;

        if !self.requires_one_of.is_empty() {
            if self.problem.is_empty() {
                write!(f, "requires {}", self.requires_one_of)?;
            } else {
                write!(f, " -- requires {}", self.requires_one_of)?;
            }
        }

        if let Some((first, rest)) = self.vuids.split_first() {
            write!(f, " ({}", first)?;

            for vuid in rest {
                write!(f, ", {}", vuid)?;
            }

            write!(f, ")")?;
        }

        Ok(())
    }
}

impl Error for ValidationError {}

/// How serious a detected violation is.
///
/// There is no `Fatal` variant: conditions that abort validation of a unit are
/// returned as `Err(Box<ValidationError>)` by the engines instead of being
/// accumulated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// A valid-usage rule of the Vulkan specification is violated. The
    /// operation is invalid, but
    /// sibling checks still run.
    Error,
    /// Suspicious but not invalid.
    Warning,
    /// Valid, but likely to perform badly.
    Performance,
}

/// A single accumulated violation: a severity together with its description.
#[derive(Clone, Debug)]
pub struct Violation {
    pub severity: Severity,
    pub error: ValidationError,
}

impl Violation {
    /// Shorthand for an `Error`-severity violation.
    pub fn error(error: ValidationError) -> Self {
        Violation {
            severity: Severity::Error,
            error,
        }
    }

    /// Shorthand for a `Warning`-severity violation.
    pub fn warning(error: ValidationError) -> Self {
        Violation {
            severity: Severity::Warning,
            error,
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Performance => "performance",
        };

        write!(f, "{}: {}", prefix, self.error)
    }
}

/// Where detected violations are delivered.
///
/// Returns `true` ("skip") when the caller should consider the checked
/// operation invalid. Warnings and performance warnings never request a skip.
pub trait DiagnosticSink {
    fn log_violation(&self, violation: &Violation) -> bool;

    /// Delivers every violation in `violations`, returning whether any of them
    /// requested a skip.
    fn log_all(&self, violations: &[Violation]) -> bool {
        let mut skip = false;

        for violation in violations {
            skip |= self.log_violation(violation);
        }

        skip
    }
}

/// A sink that forwards violations to the `log` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn log_violation(&self, violation: &Violation) -> bool {
        match violation.severity {
            Severity::Error => {
                log::error!("{}", violation);
                true
            }
            Severity::Warning => {
                log::warn!("{}", violation);
                false
            }
            Severity::Performance => {
                log::info!("{}", violation);
                false
            }
        }
    }
}

/// A sink that stores violations for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    violations: parking_lot::Mutex<Vec<Violation>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes all violations recorded so far.
    pub fn take(&self) -> Vec<Violation> {
        std::mem::take(&mut self.violations.lock())
    }
}

impl DiagnosticSink for CollectingSink {
    fn log_violation(&self, violation: &Violation) -> bool {
        let skip = violation.severity == Severity::Error;
        self.violations.lock().push(violation.clone());
        skip
    }
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            context: "entry_point".into(),
            problem: "does not exist in the module".into(),
            vuids: &["VUID-VkPipelineShaderStageCreateInfo-pName-00707"],
            ..Default::default()
        };

        assert_eq!(
            err.to_string(),
            "entry_point: does not exist in the module \
             (VUID-VkPipelineShaderStageCreateInfo-pName-00707)",
        );
    }

    #[test]
    fn add_context_prepends() {
        let err = Box::new(ValidationError {
            context: "stages[0]".into(),
            problem: "bad".into(),
            ..Default::default()
        })
        .add_context("create_info");

        assert_eq!(err.context, "create_info.stages[0]");
    }

    #[test]
    fn collecting_sink_skips_on_error_only() {
        let sink = CollectingSink::new();

        let skip = sink.log_violation(&Violation::warning(ValidationError {
            problem: "unconsumed output".into(),
            ..Default::default()
        }));
        assert!(!skip);

        let skip = sink.log_violation(&Violation::error(ValidationError {
            problem: "missing binding".into(),
            ..Default::default()
        }));
        assert!(skip);

        assert_eq!(sink.take().len(), 2);
    }
}
