//! Operations a request can perform and the selectors rules use to name them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation requested on a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read a single document
    Get,
    /// Query a collection
    List,
    /// Write a document that does not exist yet
    Create,
    /// Modify an existing document
    Update,
    /// Remove an existing document
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Get,
        Operation::List,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Whether the target document is expected to exist already
    pub fn has_pre_image(&self) -> bool {
        !matches!(self, Operation::Create)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "get" => Ok(Operation::Get),
            "list" => Ok(Operation::List),
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            _ => Err(format!(
                "Invalid operation '{}'. Valid options: get, list, create, update, delete",
                s
            )),
        }
    }
}

/// Operation names accepted in an `allow` declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationSelector {
    Get,
    List,
    Create,
    Update,
    Delete,
    /// get + list
    Read,
    /// create + update + delete
    Write,
    /// Every operation
    #[serde(rename = "*")]
    All,
}

impl OperationSelector {
    /// Concrete operations covered by this selector
    pub fn expand(&self) -> &'static [Operation] {
        match self {
            OperationSelector::Get => &[Operation::Get],
            OperationSelector::List => &[Operation::List],
            OperationSelector::Create => &[Operation::Create],
            OperationSelector::Update => &[Operation::Update],
            OperationSelector::Delete => &[Operation::Delete],
            OperationSelector::Read => &[Operation::Get, Operation::List],
            OperationSelector::Write => &[Operation::Create, Operation::Update, Operation::Delete],
            OperationSelector::All => &Operation::ALL,
        }
    }

    /// Check if this selector covers `operation`
    pub fn covers(&self, operation: Operation) -> bool {
        self.expand().contains(&operation)
    }
}

impl From<Operation> for OperationSelector {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Get => OperationSelector::Get,
            Operation::List => OperationSelector::List,
            Operation::Create => OperationSelector::Create,
            Operation::Update => OperationSelector::Update,
            Operation::Delete => OperationSelector::Delete,
        }
    }
}
