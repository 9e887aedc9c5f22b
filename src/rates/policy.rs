use std::collections::HashSet;

use uuid::Uuid;

use crate::model::{ExecutionRequest, Flag};

/// Decides which runs of a request are left out of rate counting.
///
/// A run is excluded when its test case is a prerequisite and
/// [`Flag::IgnorePrerequisiteInPassRate`] is set, or a validation case and
/// [`Flag::IgnoreValidationInPassRate`] is set.
#[derive(Debug, Clone, Default)]
pub struct IgnorePolicy {
    ignored_cases: HashSet<Uuid>,
}

impl IgnorePolicy {
    pub fn for_request(request: &ExecutionRequest) -> Self {
        let mut ignored_cases = HashSet::new();
        if let Some(scope) = &request.test_scope {
            if request.has_flag(Flag::IgnorePrerequisiteInPassRate) {
                if let Some(ids) = &scope.prerequisite_case_ids {
                    ignored_cases.extend(ids.iter().copied());
                }
            }
            if request.has_flag(Flag::IgnoreValidationInPassRate) {
                if let Some(ids) = &scope.validation_case_ids {
                    ignored_cases.extend(ids.iter().copied());
                }
            }
        }
        Self { ignored_cases }
    }

    pub fn excludes(&self, test_case_id: Uuid) -> bool {
        self.ignored_cases.contains(&test_case_id)
    }

    pub fn is_empty(&self) -> bool {
        self.ignored_cases.is_empty()
    }
}
