use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CreateOptions {
    /// Validate and return the would-be object without persisting it.
    pub dry_run: bool,
    pub field_manager: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GetOptions {
    /// Require the stored object to be at exactly this version.
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListOptions {
    /// Label selector, e.g. `team=core,!deprecated`.
    pub label_selector: Option<String>,
    pub limit: Option<usize>,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateOptions {
    pub dry_run: bool,
    /// Create the object when it does not exist yet.
    pub force_allow_create: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeleteOptions {
    pub dry_run: bool,
    pub preconditions: Option<Preconditions>,
}
