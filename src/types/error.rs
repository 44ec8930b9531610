use thiserror::Error;

use crate::parse::ParseIssue;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("law '{law}' is invalid: {}", join_issues(issues))]
    InvalidLaw { law: String, issues: Vec<ParseIssue> },
}

fn join_issues(issues: &[ParseIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_law_message() {
        let err = CompileError::InvalidLaw {
            law: "voting".into(),
            issues: vec![ParseIssue::NoSubjects, ParseIssue::NoActionsOrConditions],
        };
        assert_eq!(
            err.to_string(),
            "law 'voting' is invalid: no subjects found in law; no actions or conditions found in law"
        );
    }
}
