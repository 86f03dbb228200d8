//! Newtype identifiers for every persistent-identity entity.
//!
//! Grounded in the teacher's `CaseId` pattern (`src/case.rs`): a thin
//! `Uuid` wrapper with `Display`, serde, and a `new()` constructor, so
//! identifiers from different entities can never be accidentally swapped
//! at a call site.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(SourceId);
id_type!(DocumentId);
id_type!(AssessmentId);
id_type!(WorkflowDefinitionId);
id_type!(TaskDefinitionId);
id_type!(ExecutionId);
id_type!(TaskInstanceId);
id_type!(ScheduledTaskId);
id_type!(TaskExecutionId);
id_type!(TriggerId);
id_type!(ErrorEventId);
