use async_trait::async_trait;
use portcore::{ActivityContext, ActivityError, ApprovalStatus, FlowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Decides the status of one approval attached to an activity
#[async_trait]
pub trait ApprovalResolver: Send + Sync {
    async fn resolve(
        &self,
        ctx: &ActivityContext,
        options: &HashMap<String, String>,
    ) -> Result<ApprovalStatus, FlowError>;

    /// Check the options when the flow is parsed.
    fn validate(&self, _options: &HashMap<String, String>) -> Result<(), String> {
        Ok(())
    }
}

/// Combined status of several approvals: any rejection wins, then any
/// pending one. No approvals at all counts as approved.
pub fn aggregate(statuses: &[ApprovalStatus]) -> ApprovalStatus {
    if statuses.contains(&ApprovalStatus::Rejected) {
        ApprovalStatus::Rejected
    } else if statuses.iter().all(|s| *s == ApprovalStatus::Approved) {
        ApprovalStatus::Approved
    } else {
        ApprovalStatus::Pending
    }
}

/// Waits for a decision recorded from outside the run.
pub struct ManualApproval;

#[async_trait]
impl ApprovalResolver for ManualApproval {
    async fn resolve(
        &self,
        _ctx: &ActivityContext,
        _options: &HashMap<String, String>,
    ) -> Result<ApprovalStatus, FlowError> {
        Ok(ApprovalStatus::Pending)
    }
}

/// Compares two templated operands.
///
/// Options: `left`, `op` (default `==`), `right`, and `reject_on_false`.
/// Numbers compare numerically, anything else as text.
pub struct ConditionApproval;

const OPERATORS: [&str; 13] = [
    "==", "eq", "!=", "ne", ">", "gt", ">=", "ge", "<", "lt", "<=", "le", "contains",
];

impl ConditionApproval {
    fn compare(left: &str, op: &str, right: &str) -> Result<bool, ActivityError> {
        let numbers = left.trim().parse::<f64>().ok().zip(right.trim().parse::<f64>().ok());
        let ordering = match numbers {
            Some((l, r)) => l.partial_cmp(&r),
            None => Some(left.cmp(right)),
        };

        use std::cmp::Ordering::*;
        Ok(match op {
            "==" | "eq" => ordering == Some(Equal),
            "!=" | "ne" => ordering != Some(Equal),
            ">" | "gt" => ordering == Some(Greater),
            ">=" | "ge" => matches!(ordering, Some(Greater | Equal)),
            "<" | "lt" => ordering == Some(Less),
            "<=" | "le" => matches!(ordering, Some(Less | Equal)),
            "contains" => left.contains(right),
            other => {
                return Err(ActivityError::InvalidParameter {
                    name: "op".to_string(),
                    expected: "comparison operator".to_string(),
                    actual: other.to_string(),
                })
            }
        })
    }
}

#[async_trait]
impl ApprovalResolver for ConditionApproval {
    async fn resolve(
        &self,
        ctx: &ActivityContext,
        options: &HashMap<String, String>,
    ) -> Result<ApprovalStatus, FlowError> {
        let left = options
            .get("left")
            .ok_or_else(|| ActivityError::MissingParameter("left".to_string()))?;
        let op = options.get("op").map(String::as_str).unwrap_or("==");
        let right = options.get("right").map(String::as_str).unwrap_or("");
        let reject_on_false = options
            .get("reject_on_false")
            .map(|v| v == "true")
            .unwrap_or(false);

        if Self::compare(&ctx.resolve(left), op, &ctx.resolve(right))? {
            Ok(ApprovalStatus::Approved)
        } else if reject_on_false {
            Ok(ApprovalStatus::Rejected)
        } else {
            Ok(ApprovalStatus::Pending)
        }
    }

    fn validate(&self, options: &HashMap<String, String>) -> Result<(), String> {
        if !options.contains_key("left") {
            return Err("condition approval needs a 'left' operand".to_string());
        }
        match options.get("op") {
            Some(op) if !OPERATORS.contains(&op.as_str()) => {
                Err(format!("unknown comparison operator '{}'", op))
            }
            _ => Ok(()),
        }
    }
}

/// Named approval resolvers available to flows
pub struct ApprovalRegistry {
    resolvers: HashMap<String, Arc<dyn ApprovalResolver>>,
}

impl ApprovalRegistry {
    /// Registry with the `manual` and `condition` resolvers
    pub fn new() -> Self {
        let mut registry = Self {
            resolvers: HashMap::new(),
        };
        registry.register("manual", Arc::new(ManualApproval));
        registry.register("condition", Arc::new(ConditionApproval));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, resolver: Arc<dyn ApprovalResolver>) {
        let name = name.into();
        tracing::info!("Registering approval resolver: {}", name);
        self.resolvers.insert(name, resolver);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ApprovalResolver>> {
        self.resolvers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }
}

impl Default for ApprovalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
