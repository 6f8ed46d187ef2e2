use std::fmt;

/// Non-fatal conditions raised during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// The pass ceiling was reached before a fixed point.
    NotConverged { passes: usize },
    /// Undersized features without any merge-compatible neighbor.
    IsolatedSlivers { count: usize },
    /// A column holds values that do not fit its declared type.
    TypeRestoration { column: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConverged { passes } =>
                write!(f, "did not fully converge after {passes} passes"),
            Self::IsolatedSlivers { count } =>
                write!(f, "{count} undersized feature(s) have no merge-compatible neighbor"),
            Self::TypeRestoration { column } =>
                write!(f, "the type of column {column:?} could not be restored"),
        }
    }
}

/// Summary of one simplification run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimplifyReport {
    pub passes: usize,
    pub converged: bool,
    pub input_features: usize,
    pub output_features: usize,
    pub remaining_slivers: usize,
    pub warnings: Vec<Warning>,
}

impl SimplifyReport {
    /// Log every warning at `warn` level.
    pub(crate) fn emit(&self) {
        for warning in &self.warnings {
            tracing::warn!("{warning}");
        }
    }
}

/// Summary of a partitioned run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionReport {
    pub quadrants: Vec<SimplifyReport>,
    pub deferred: usize,
    pub global: SimplifyReport,
}
