use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Delete,
    Rename,
    Favorite,
    CreateFolder,
    Move,
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Rename => write!(f, "rename"),
            Self::Favorite => write!(f, "favorite"),
            Self::CreateFolder => write!(f, "create_folder"),
            Self::Move => write!(f, "move"),
        }
    }
}

impl std::str::FromStr for MutationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete" => Ok(Self::Delete),
            "rename" => Ok(Self::Rename),
            "favorite" => Ok(Self::Favorite),
            "create_folder" => Ok(Self::CreateFolder),
            "move" => Ok(Self::Move),
            _ => Err(format!("unknown mutation kind: {s}")),
        }
    }
}

/// Completion status of a mutation: `error_code == 0` means success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub error_code: i64,
    pub error_description: String,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            error_code: 0,
            error_description: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }
}

impl From<&AppError> for Outcome {
    fn from(err: &AppError) -> Self {
        Self {
            error_code: err.error_code(),
            error_description: err.to_string(),
        }
    }
}

impl From<Result<(), AppError>> for Outcome {
    fn from(result: Result<(), AppError>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(err) => Self::from(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_kind_text_round_trip() {
        for kind in [
            MutationKind::Delete,
            MutationKind::Rename,
            MutationKind::Favorite,
            MutationKind::CreateFolder,
            MutationKind::Move,
        ] {
            assert_eq!(kind.to_string().parse::<MutationKind>(), Ok(kind));
        }
    }

    #[test]
    fn outcome_from_error_carries_code_and_message() {
        let outcome = Outcome::from(Err(AppError::PermissionDenied(
            "no permission to delete".to_string(),
        )));
        assert!(!outcome.is_success());
        assert_eq!(outcome.error_description, "no permission to delete");
        assert_eq!(Outcome::from(Ok(())), Outcome::success());
    }
}
