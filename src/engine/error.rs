use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

pub const MATCH_NOT_FOUND: &str = "Matching member not found.";
pub const MULTIPLE_MEMBERS: &str = "multiple members found.";
pub const MULTIPLE_ORGANIZATIONS: &str = "Multiple organization records found for user.";

/// The engine entry point that raised an error; reported back in error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EligibilityMethod {
    Standard,
    Alternate,
    Overeligibility,
    ClientSpecific,
    NoDob,
    Multistep,
    GetById,
    GetByOrgIdentity,
    CreateVerificationForUser,
    DeactivateVerificationForUser,
    CreateTestMemberRecords,
    Basic,
    Employer,
    HealthPlan,
    PreEligibility,
}

impl EligibilityMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Alternate => "alternate",
            Self::Overeligibility => "overeligibility",
            Self::ClientSpecific => "client-specific",
            Self::NoDob => "no-dob",
            Self::Multistep => "multistep",
            Self::GetById => "get-by-id",
            Self::GetByOrgIdentity => "get-by-org-identity",
            Self::CreateVerificationForUser => "create-verification-for-user",
            Self::DeactivateVerificationForUser => "deactivate-verification-for-user",
            Self::CreateTestMemberRecords => "create-test-member-records",
            Self::Basic => "basic",
            Self::Employer => "employer",
            Self::HealthPlan => "healthplan",
            Self::PreEligibility => "pre-eligibility",
        }
    }
}

impl fmt::Display for EligibilityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EligibilityError {
    #[error("{message}")]
    Match {
        method: EligibilityMethod,
        message: String,
    },
    #[error("{message}")]
    MatchMultiple {
        method: EligibilityMethod,
        message: String,
    },
    #[error("{message}")]
    MemberSearch {
        method: EligibilityMethod,
        message: String,
    },
    #[error("{0}")]
    GetMatch(String),
    #[error("{0}")]
    IdentityMatch(String),
    #[error("{message}")]
    Validation {
        method: Option<EligibilityMethod>,
        message: String,
        /// Offending request fields.
        fields: Vec<String>,
    },
    #[error("{0}")]
    ClientSpecificConfiguration(String),
    #[error(
        "This client specific check is currently unavailable due to an upstream error: [{implementation}] {cause}"
    )]
    UpstreamClientSpecific {
        implementation: String,
        cause: String,
    },
    #[error("Could not find a member with provided credentials.")]
    ClientSpecificMatch { implementation: String },
    #[error("{0}")]
    NoDobMatch(String),
    #[error("Organization not found: {0}")]
    OrganizationNotFound(i64),
    #[error("{0}")]
    CreateVerification(String),
    #[error("{0}")]
    RecordAlreadyClaimed(String),
    #[error("{0}")]
    DeactivateVerification(String),
    #[error("this operation is not permitted in production")]
    ForbiddenInProduction { method: EligibilityMethod },
    /// v1 and v2 member tables disagree.
    #[error("{0}")]
    Inconsistent(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type EligibilityResult<T> = Result<T, EligibilityError>;

impl EligibilityError {
    pub fn not_found(method: EligibilityMethod) -> Self {
        Self::Match {
            method,
            message: MATCH_NOT_FOUND.to_string(),
        }
    }

    pub fn inactive_organization(method: EligibilityMethod) -> Self {
        Self::Match {
            method,
            message: format!(
                "Member record(s) found by {method} belong to inactive organization."
            ),
        }
    }

    pub fn multiple(method: EligibilityMethod) -> Self {
        Self::MatchMultiple {
            method,
            message: MULTIPLE_MEMBERS.to_string(),
        }
    }

    pub fn no_dob_match() -> Self {
        Self::NoDobMatch("Could not find a member with email and name.".to_string())
    }

    pub fn validation(
        method: Option<EligibilityMethod>,
        message: impl Into<String>,
        fields: &[&str],
    ) -> Self {
        Self::Validation {
            method,
            message: message.into(),
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }

    pub fn method(&self) -> Option<EligibilityMethod> {
        match self {
            Self::Match { method, .. }
            | Self::MatchMultiple { method, .. }
            | Self::MemberSearch { method, .. }
            | Self::ForbiddenInProduction { method } => Some(*method),
            Self::Validation { method, .. } => *method,
            Self::GetMatch(_) => Some(EligibilityMethod::GetById),
            Self::IdentityMatch(_) => Some(EligibilityMethod::GetByOrgIdentity),
            Self::ClientSpecificConfiguration(_)
            | Self::UpstreamClientSpecific { .. }
            | Self::ClientSpecificMatch { .. } => Some(EligibilityMethod::ClientSpecific),
            Self::NoDobMatch(_) => Some(EligibilityMethod::NoDob),
            Self::OrganizationNotFound(_) => Some(EligibilityMethod::CreateTestMemberRecords),
            Self::CreateVerification(_) | Self::RecordAlreadyClaimed(_) => {
                Some(EligibilityMethod::CreateVerificationForUser)
            }
            Self::DeactivateVerification(_) => {
                Some(EligibilityMethod::DeactivateVerificationForUser)
            }
            Self::Inconsistent(_) | Self::Store(_) => None,
        }
    }
}
