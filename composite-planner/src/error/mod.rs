use std::fmt::Display;
use std::fmt::Formatter;

use apollo_compiler::validation::DiagnosticList;
use apollo_compiler::validation::WithErrors;

/// Create an internal error.
///
/// # Example
/// ```rust
/// use composite_planner::internal_error;
/// use composite_planner::error::CompositeError;
/// # fn may_be_none() -> Option<()> { None }
///
/// const NAME: &str = "the thing";
/// let result: Result<(), CompositeError> = may_be_none()
///     .ok_or_else(|| internal_error!("Expected {NAME} to be Some"));
/// ```
#[macro_export]
macro_rules! internal_error {
    ( $( $arg:tt )+ ) => {
        $crate::error::CompositeError::internal(format!( $( $arg )+ ))
    }
}

/// Break out of the current function, returning an internal error.
#[macro_export]
macro_rules! bail {
    ( $( $arg:tt )+ ) => {
        return Err($crate::internal_error!( $( $arg )+ ).into())
    }
}

/// A safe assertion: in debug mode, it panics on failure, and in production, it returns an
/// internal error.
///
/// Treat this as an assertion. It must only be used for conditions that *should never happen*
/// in normal operation.
#[macro_export]
macro_rules! ensure {
    ( $expr:expr, $( $arg:tt )+ ) => {
        #[cfg(debug_assertions)]
        {
            if false {
                return Err($crate::error::CompositeError::internal("ensure!() must be used in a function that returns a Result").into());
            }
            assert!($expr, $( $arg )+);
        }

        #[cfg(not(debug_assertions))]
        if !$expr {
            $crate::bail!( $( $arg )+ );
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SingleCompositeError {
    #[error(
        "An internal error has occurred, please report this bug to the composite planner maintainers.\n\nDetails: {message}"
    )]
    Internal { message: String },
    #[error("{diagnostics}")]
    InvalidGraphQL { diagnostics: DiagnosticList },
    #[error("Invalid composite schema: {message}")]
    InvalidCompositeSchema { message: String },
    #[error("Selection set `{selection_set}` was never registered in the selection set index")]
    UnregisteredSelectionSet { selection_set: String },
    #[error("No operation named {}", name.as_deref().map_or_else(|| "<anonymous>".to_owned(), |name| format!("`{name}`")))]
    UnknownOperation { name: Option<String> },
    #[error(
        "Operation {} cannot be planned against this composite schema: no source schema can resolve the selections at `{path}`",
        operation.as_deref().map_or_else(|| "<anonymous>".to_owned(), |name| format!("`{name}`"))
    )]
    NoViablePlan {
        operation: Option<String>,
        path: String,
    },
    #[error("Planning was aborted after evaluating {limit} candidate plans")]
    PlanningLimitExceeded { limit: u32 },
}

impl SingleCompositeError {
    pub fn code(&self) -> &'static str {
        self.into()
    }
}

impl From<DiagnosticList> for SingleCompositeError {
    fn from(diagnostics: DiagnosticList) -> Self {
        SingleCompositeError::InvalidGraphQL { diagnostics }
    }
}

impl<T> From<WithErrors<T>> for SingleCompositeError {
    fn from(value: WithErrors<T>) -> Self {
        value.errors.into()
    }
}

#[derive(Debug, Clone, thiserror::Error, Default)]
pub struct MultipleCompositeErrors {
    pub errors: Vec<SingleCompositeError>,
}

impl MultipleCompositeErrors {
    pub fn new() -> Self {
        Self { errors: vec![] }
    }

    pub fn push(&mut self, error: CompositeError) {
        match error {
            CompositeError::SingleCompositeError(error) => {
                self.errors.push(error);
            }
            CompositeError::MultipleCompositeErrors(errors) => {
                self.errors.extend(errors.errors);
            }
        }
    }

    /// Returns `Ok(())` when no error was collected.
    pub fn into_result(self) -> Result<(), CompositeError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.into_iter().next().map_or_else(
                || CompositeError::internal("Expected a single collected error"),
                CompositeError::from,
            )),
            _ => Err(self.into()),
        }
    }
}

impl Display for MultipleCompositeErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "The following errors occurred:")?;
        for error in &self.errors {
            write!(f, "\n  - ")?;
            for c in error.to_string().chars() {
                if c == '\n' {
                    write!(f, "\n    ")?;
                } else {
                    f.write_fmt(format_args!("{c}"))?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CompositeError {
    #[error(transparent)]
    SingleCompositeError(#[from] SingleCompositeError),
    #[error(transparent)]
    MultipleCompositeErrors(#[from] MultipleCompositeErrors),
}

impl CompositeError {
    pub fn internal(message: impl Into<String>) -> Self {
        SingleCompositeError::Internal {
            message: message.into(),
        }
        .into()
    }

    /// Returns the single error wrapped by this value, if there is exactly one.
    pub fn as_single(&self) -> Option<&SingleCompositeError> {
        match self {
            CompositeError::SingleCompositeError(error) => Some(error),
            CompositeError::MultipleCompositeErrors(errors) if errors.errors.len() == 1 => {
                errors.errors.first()
            }
            CompositeError::MultipleCompositeErrors(_) => None,
        }
    }

    pub fn errors(&self) -> Vec<&SingleCompositeError> {
        match self {
            CompositeError::SingleCompositeError(error) => vec![error],
            CompositeError::MultipleCompositeErrors(errors) => errors.errors.iter().collect(),
        }
    }
}

impl From<DiagnosticList> for CompositeError {
    fn from(value: DiagnosticList) -> Self {
        SingleCompositeError::from(value).into()
    }
}

impl<T> From<WithErrors<T>> for CompositeError {
    fn from(value: WithErrors<T>) -> Self {
        SingleCompositeError::from(value).into()
    }
}
