//! Execution mode policies.

use crate::graph::ActivityInstance;
use portcore::{ExecutionMode, ExecutionOptions, QueueItem};
use std::cmp::Reverse;
use std::sync::Arc;

/// Decides how interactive work is batched and whether a run keeps going
/// after a batch.
pub trait ModeStrategy: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    fn batch_size(&self, options: &ExecutionOptions) -> usize;

    fn requires_interaction(&self, activity: &ActivityInstance) -> bool {
        activity.requires_interaction()
    }

    /// Pick the interactive items to run: selected first, then by priority,
    /// then in queue order.
    fn select(&self, mut candidates: Vec<QueueItem>, batch_size: usize) -> Vec<QueueItem> {
        candidates.sort_by_key(|item| (Reverse(item.selected), Reverse(item.priority), item.sequence));
        candidates.truncate(batch_size);
        candidates
    }

    /// Whether to keep cycling after an interactive batch
    fn should_continue(&self) -> bool;
}

pub struct AutomaticMode;

impl ModeStrategy for AutomaticMode {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Automatic
    }

    fn batch_size(&self, options: &ExecutionOptions) -> usize {
        options.max_parallel.max(1)
    }

    fn should_continue(&self) -> bool {
        true
    }
}

/// Interactive activities only run once selected from outside. The run
/// pauses when ready interactive work has no selection.
pub struct ManualMode;

impl ModeStrategy for ManualMode {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Manual
    }

    fn batch_size(&self, options: &ExecutionOptions) -> usize {
        options.max_parallel.max(1)
    }

    fn select(&self, candidates: Vec<QueueItem>, batch_size: usize) -> Vec<QueueItem> {
        let mut selected: Vec<QueueItem> = candidates.into_iter().filter(|i| i.selected).collect();
        selected.sort_by_key(|item| (Reverse(item.priority), item.sequence));
        selected.truncate(batch_size);
        selected
    }

    fn should_continue(&self) -> bool {
        true
    }
}

/// One activity per run call, every activity treated as interactive.
pub struct StepByStepMode;

impl ModeStrategy for StepByStepMode {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::StepByStep
    }

    fn batch_size(&self, _options: &ExecutionOptions) -> usize {
        1
    }

    fn requires_interaction(&self, _activity: &ActivityInstance) -> bool {
        true
    }

    fn should_continue(&self) -> bool {
        false
    }
}

pub fn mode_strategy(mode: ExecutionMode) -> Arc<dyn ModeStrategy> {
    match mode {
        ExecutionMode::Automatic => Arc::new(AutomaticMode),
        ExecutionMode::Manual => Arc::new(ManualMode),
        ExecutionMode::StepByStep => Arc::new(StepByStepMode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcore::{ActivityId, ExecutionStatus};

    fn item(id: &str, selected: bool, priority: i32, sequence: u64) -> QueueItem {
        QueueItem {
            activity_id: ActivityId::from(id),
            status: ExecutionStatus::Ready,
            activation: 0,
            selected,
            priority,
            sequence,
            reason: None,
        }
    }

    fn ids(items: &[QueueItem]) -> Vec<&str> {
        items.iter().map(|i| i.activity_id.as_str()).collect()
    }

    #[test]
    fn selection_prefers_selected_then_priority() {
        let candidates = vec![
            item("a", false, 0, 1),
            item("b", false, 5, 2),
            item("c", true, 0, 3),
            item("d", false, 5, 0),
        ];
        let picked = AutomaticMode.select(candidates, 3);
        assert_eq!(ids(&picked), vec!["c", "d", "b"]);
    }

    #[test]
    fn manual_mode_only_runs_selected() {
        let candidates = vec![item("a", false, 9, 0), item("b", true, 0, 1)];
        assert_eq!(ids(&ManualMode.select(candidates, 10)), vec!["b"]);
    }

    #[test]
    fn step_mode_is_one_at_a_time() {
        let options = ExecutionOptions {
            instance_id: uuid::Uuid::new_v4(),
            mode: ExecutionMode::StepByStep,
            max_parallel: 8,
        };
        assert_eq!(StepByStepMode.batch_size(&options), 1);
        assert!(!StepByStepMode.should_continue());
    }
}
