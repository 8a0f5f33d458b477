//! Validation of the semaphore operations of queue submissions.
//!
//! [`SubmitTracker`] projects the effect of each batch onto a per-semaphore
//! state map before checking the next one, so that a signal in batch *n* is
//! visible to a wait in batch *n + 1* of the same call. Binary semaphores
//! are checked for forward progress (every wait must have a signal that can
//! reach it), timeline semaphores for monotonicity and the device's maximum
//! value difference.

use crate::{
    device::DeviceContext, Requires, RequiresAllOf, RequiresOneOf, ValidationError, Violation,
};
use ash::vk;
use foldhash::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SemaphoreKind {
    Binary,
    Timeline,
}

/// The queue-visible state of one semaphore at the time of the submit call.
#[derive(Clone, Debug)]
pub struct SemaphoreState {
    pub kind: SemaphoreKind,
    /// Binary only: the semaphore is currently signaled.
    pub signaled: bool,
    /// Timeline only: the highest value known to be completed.
    pub completed_value: u64,
    /// Timeline only: values of signal operations submitted earlier but not
    /// yet completed.
    pub pending_signals: Vec<u64>,
    /// Binary only: a signal operation was submitted earlier and has not
    /// been consumed by a wait yet.
    pub has_pending_signal: bool,
    /// Binary only: a wait operation was submitted earlier and has not been
    /// resolved by a signal yet.
    pub has_pending_wait: bool,
}

impl SemaphoreState {
    pub fn binary(signaled: bool) -> Self {
        SemaphoreState {
            kind: SemaphoreKind::Binary,
            signaled,
            completed_value: 0,
            pending_signals: Vec::new(),
            has_pending_signal: false,
            has_pending_wait: false,
        }
    }

    pub fn timeline(completed_value: u64) -> Self {
        SemaphoreState {
            kind: SemaphoreKind::Timeline,
            signaled: false,
            completed_value,
            pending_signals: Vec::new(),
            has_pending_signal: false,
            has_pending_wait: false,
        }
    }
}

/// One semaphore named in the wait or signal list of a batch.
#[derive(Clone, Copy, Debug)]
pub struct SemaphoreSubmitOp {
    pub semaphore: vk::Semaphore,
}

/// The values attached to a batch for its timeline semaphores, in the order
/// of the wait and signal lists.
#[derive(Clone, Debug)]
pub struct TimelineSemaphoreSubmitInfo {
    pub wait_values: Vec<u64>,
    pub signal_values: Vec<u64>,
}

/// One batch of a queue submission.
#[derive(Clone, Debug, Default)]
pub struct SubmitBatch {
    pub wait_semaphores: Vec<SemaphoreSubmitOp>,
    pub signal_semaphores: Vec<SemaphoreSubmitOp>,
    pub timeline_info: Option<TimelineSemaphoreSubmitInfo>,
}

/// Validates the semaphore operations of queue submissions against the
/// state of the semaphores they name.
pub struct SubmitTracker<'a> {
    device: &'a DeviceContext,
}

impl<'a> SubmitTracker<'a> {
    pub fn new(device: &'a DeviceContext) -> Self {
        SubmitTracker { device }
    }

    /// Checks the batches of one submit call, in order.
    ///
    /// `lookup` returns the state of a semaphore at the time of the call;
    /// `None` means the handle is unknown, in which case its operations are
    /// skipped rather than reported.
    pub fn add_submission(
        &self,
        batches: &[SubmitBatch],
        lookup: impl Fn(vk::Semaphore) -> Option<SemaphoreState>,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut projected: HashMap<vk::Semaphore, SemaphoreState> = HashMap::default();

        for (batch_index, batch) in batches.iter().enumerate() {
            self.check_batch(batch, batch_index, &lookup, &mut projected, &mut violations);
        }

        violations
    }

    fn check_batch(
        &self,
        batch: &SubmitBatch,
        batch_index: usize,
        lookup: &impl Fn(vk::Semaphore) -> Option<SemaphoreState>,
        projected: &mut HashMap<vk::Semaphore, SemaphoreState>,
        violations: &mut Vec<Violation>,
    ) {
        let timeline_count = |ops: &[SemaphoreSubmitOp]| {
            ops.iter()
                .filter(|op| {
                    projected
                        .get(&op.semaphore)
                        .cloned()
                        .or_else(|| lookup(op.semaphore))
                        .is_some_and(|state| state.kind == SemaphoreKind::Timeline)
                })
                .count()
        };

        let timeline_waits = timeline_count(&batch.wait_semaphores);
        let timeline_signals = timeline_count(&batch.signal_semaphores);

        if (timeline_waits != 0 || timeline_signals != 0) && !self.device.features.timeline_semaphore
        {
            violations.push(Violation::error(ValidationError {
                context: format!("batches[{}]", batch_index).into(),
                problem: "a timeline semaphore is used".into(),
                requires_one_of: RequiresOneOf(&[RequiresAllOf(&[Requires::DeviceFeature(
                    "timeline_semaphore",
                )])]),
                ..Default::default()
            }));
        }

        match &batch.timeline_info {
            None => {
                if timeline_waits != 0 || timeline_signals != 0 {
                    violations.push(Violation::error(ValidationError {
                        context: format!("batches[{}]", batch_index).into(),
                        problem: "the batch uses timeline semaphores, but does not provide \
                            a `TimelineSemaphoreSubmitInfo`"
                            .into(),
                        vuids: &["VUID-VkSubmitInfo-pWaitSemaphores-03239"],
                        ..Default::default()
                    }));
                    return;
                }
            }
            Some(info) => {
                let mut counts_ok = true;

                if timeline_waits != 0 && info.wait_values.len() != batch.wait_semaphores.len() {
                    violations.push(Violation::error(ValidationError {
                        context: format!("batches[{}].timeline_info.wait_values", batch_index)
                            .into(),
                        problem: format!(
                            "contains {} values, but the batch waits on {} semaphores",
                            info.wait_values.len(),
                            batch.wait_semaphores.len(),
                        )
                        .into(),
                        vuids: &["VUID-VkSubmitInfo-pNext-03240"],
                        ..Default::default()
                    }));
                    counts_ok = false;
                }

                if timeline_signals != 0 && info.signal_values.len() != batch.signal_semaphores.len()
                {
                    violations.push(Violation::error(ValidationError {
                        context: format!("batches[{}].timeline_info.signal_values", batch_index)
                            .into(),
                        problem: format!(
                            "contains {} values, but the batch signals {} semaphores",
                            info.signal_values.len(),
                            batch.signal_semaphores.len(),
                        )
                        .into(),
                        vuids: &["VUID-VkSubmitInfo-pNext-03241"],
                        ..Default::default()
                    }));
                    counts_ok = false;
                }

                if !counts_ok {
                    return;
                }
            }
        }

        for (wait_index, op) in batch.wait_semaphores.iter().enumerate() {
            let Some(state) = projected
                .get(&op.semaphore)
                .cloned()
                .or_else(|| lookup(op.semaphore))
            else {
                continue;
            };

            let context = format!("batches[{}].wait_semaphores[{}]", batch_index, wait_index);
            let mut state = state;

            match state.kind {
                SemaphoreKind::Binary => {
                    if state.has_pending_wait {
                        violations.push(Violation::error(ValidationError {
                            context: context.into(),
                            problem: "the binary semaphore already has an unresolved wait \
                                operation pending; two waits cannot consume one signal"
                                .into(),
                            vuids: &["VUID-vkQueueSubmit-pWaitSemaphores-03238"],
                            ..Default::default()
                        }));
                    } else if !state.signaled && !state.has_pending_signal {
                        violations.push(Violation::error(ValidationError {
                            context: context.into(),
                            problem: "the binary semaphore is not signaled and no signal \
                                operation is pending; the wait can never complete"
                                .into(),
                            vuids: &["VUID-vkQueueSubmit-pWaitSemaphores-03238"],
                            ..Default::default()
                        }));
                    }

                    // A wait consumes the signal.
                    if state.signaled {
                        state.signaled = false;
                    } else if state.has_pending_signal {
                        state.has_pending_signal = false;
                    } else {
                        state.has_pending_wait = true;
                    }
                }
                SemaphoreKind::Timeline => {
                    let Some(info) = &batch.timeline_info else {
                        continue;
                    };
                    let value = info.wait_values[wait_index];
                    let max_diff = self.device.properties.max_timeline_semaphore_value_difference;

                    if value > state.completed_value
                        && value - state.completed_value > max_diff
                    {
                        violations.push(Violation::error(ValidationError {
                            context: context.into(),
                            problem: format!(
                                "the wait value {} differs from the current value {} of the \
                                timeline semaphore by more than \
                                `max_timeline_semaphore_value_difference`",
                                value, state.completed_value,
                            )
                            .into(),
                            vuids: &["VUID-VkTimelineSemaphoreSubmitInfo-pWaitSemaphoreValues-03243"],
                            ..Default::default()
                        }));
                    }
                }
            }

            projected.insert(op.semaphore, state);
        }

        for (signal_index, op) in batch.signal_semaphores.iter().enumerate() {
            let Some(state) = projected
                .get(&op.semaphore)
                .cloned()
                .or_else(|| lookup(op.semaphore))
            else {
                continue;
            };

            let context = format!(
                "batches[{}].signal_semaphores[{}]",
                batch_index, signal_index,
            );
            let mut state = state;

            match state.kind {
                SemaphoreKind::Binary => {
                    if state.signaled || state.has_pending_signal {
                        violations.push(Violation::error(ValidationError {
                            context: context.into(),
                            problem: "the binary semaphore is already signaled, or has a \
                                signal operation pending that no wait consumes first"
                                .into(),
                            vuids: &["VUID-vkQueueSubmit-pSignalSemaphores-00067"],
                            ..Default::default()
                        }));
                    }

                    state.has_pending_signal = true;
                }
                SemaphoreKind::Timeline => {
                    let Some(info) = &batch.timeline_info else {
                        continue;
                    };
                    let value = info.signal_values[signal_index];
                    let max_diff = self.device.properties.max_timeline_semaphore_value_difference;

                    let highest_pending = state
                        .pending_signals
                        .iter()
                        .copied()
                        .max()
                        .unwrap_or(state.completed_value)
                        .max(state.completed_value);

                    if value == highest_pending {
                        violations.push(Violation::error(ValidationError {
                            context: context.into(),
                            problem: format!(
                                "the signal value {} is already the current or a pending \
                                value of the timeline semaphore; each signal must strictly \
                                increase the value",
                                value,
                            )
                            .into(),
                            vuids: &["VUID-VkSubmitInfo-pSignalSemaphores-03242"],
                            ..Default::default()
                        }));
                    } else if value < highest_pending {
                        violations.push(Violation::error(ValidationError {
                            context: context.into(),
                            problem: format!(
                                "the signal value {} is smaller than the current or a \
                                pending value ({}) of the timeline semaphore",
                                value, highest_pending,
                            )
                            .into(),
                            vuids: &["VUID-VkSubmitInfo-pSignalSemaphores-03242"],
                            ..Default::default()
                        }));
                    } else if value - state.completed_value > max_diff {
                        violations.push(Violation::error(ValidationError {
                            context: context.into(),
                            problem: format!(
                                "the signal value {} differs from the current value {} of \
                                the timeline semaphore by more than \
                                `max_timeline_semaphore_value_difference`",
                                value, state.completed_value,
                            )
                            .into(),
                            vuids: &[
                                "VUID-VkTimelineSemaphoreSubmitInfo-pSignalSemaphoreValues-03244",
                            ],
                            ..Default::default()
                        }));
                    }

                    state.pending_signals.push(value);
                }
            }

            projected.insert(op.semaphore, state);
        }
    }
}
