use std::{
    error::Error,
    fmt::{Display, Formatter},
};

/// Reasons a grading request is refused before anything touches the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    EmptySql,
    MultipleStatements,
    NotReadOnly,
    InvalidBody(String),
    InvalidCasesJson(String),
    NoCases,
}

impl Display for RequestError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RequestError::EmptySql => write!(f, "sql must be a non-empty string"),
            RequestError::MultipleStatements => write!(
                f,
                "only a single SQL statement is allowed (at most one trailing semicolon)"
            ),
            RequestError::NotReadOnly => write!(f, "only SELECT / WITH queries are allowed"),
            RequestError::InvalidBody(reason) => write!(f, "invalid request body: {}", reason),
            RequestError::InvalidCasesJson(reason) => {
                write!(f, "tablesJson is not valid JSON: {}", reason)
            }
            RequestError::NoCases => write!(f, "no cases (or tables) were found"),
        }
    }
}

impl Error for RequestError {}

/// Failure scoped to a single case, either while loading fixtures or while
/// running the candidate query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseError {
    Setup(String),
    Backend(String),
}

impl CaseError {
    pub fn message(&self) -> &str {
        match self {
            CaseError::Setup(message) | CaseError::Backend(message) => message,
        }
    }
}

impl Display for CaseError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl Error for CaseError {}

/// Faults that abort a whole grading run
#[derive(Debug)]
pub enum RunError {
    NoCases,
    Pool(r2d2::Error),
    Worker(tokio::task::JoinError),
}

impl Display for RunError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RunError::NoCases => write!(f, "a grading run needs at least one case"),
            RunError::Pool(e) => write!(f, "could not acquire a database session: {}", e),
            RunError::Worker(e) => write!(f, "grading worker failed: {}", e),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunError::NoCases => None,
            RunError::Pool(e) => Some(e),
            RunError::Worker(e) => Some(e),
        }
    }
}

impl From<r2d2::Error> for RunError {
    fn from(e: r2d2::Error) -> Self {
        RunError::Pool(e)
    }
}

impl From<tokio::task::JoinError> for RunError {
    fn from(e: tokio::task::JoinError) -> Self {
        RunError::Worker(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_error_displays_backend_message_verbatim() {
        let err = CaseError::Backend("relation \"missing\" does not exist".into());
        assert_eq!(err.to_string(), "relation \"missing\" does not exist");
    }

    #[test]
    fn request_errors_are_human_readable() {
        assert_eq!(
            RequestError::NotReadOnly.to_string(),
            "only SELECT / WITH queries are allowed"
        );
        assert!(RequestError::InvalidCasesJson("EOF".into())
            .to_string()
            .ends_with("EOF"));
    }
}
