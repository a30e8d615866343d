//! Checkpointed batch processing as a pure state machine.
//!
//! The driver feeds [`BatchMsg`]s into [`update`] and executes the returned
//! [`BatchEffect`]s in order. Records below the resume offset were finished by
//! an earlier run and are never processed again.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPhase {
    #[default]
    Idle,
    Running,
    /// Every record is processed; waiting for the final output to be written.
    Finishing,
    Finished,
    /// Stopped early; the checkpoint is left for the next run.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchMsg {
    Start,
    RecordDone { index: usize },
    /// Processing, checkpoint append or output write failed.
    Failed { reason: String },
    Cancelled,
    OutputWritten,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEffect {
    Process { index: usize },
    /// Durably append the results of these records before continuing.
    AppendCheckpoint { indices: Vec<usize> },
    WriteOutput,
    ClearCheckpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchState {
    total: usize,
    resume_offset: usize,
    checkpoint_every: usize,
    next: usize,
    unflushed: Vec<usize>,
    processed_now: usize,
    phase: BatchPhase,
    failure: Option<String>,
}

impl BatchState {
    pub fn new(total: usize, resume_offset: usize, checkpoint_every: usize) -> Self {
        let resume_offset = resume_offset.min(total);
        Self {
            total,
            resume_offset,
            checkpoint_every: checkpoint_every.max(1),
            next: resume_offset,
            unflushed: Vec::new(),
            processed_now: 0,
            phase: BatchPhase::Idle,
            failure: None,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn resume_offset(&self) -> usize {
        self.resume_offset
    }

    /// Records processed by this run, excluding resumed ones.
    pub fn processed_now(&self) -> usize {
        self.processed_now
    }

    /// Records processed but not yet in the checkpoint.
    pub fn unflushed(&self) -> &[usize] {
        &self.unflushed
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn advance(&mut self) -> BatchEffect {
        if self.next < self.total {
            BatchEffect::Process { index: self.next }
        } else {
            self.phase = BatchPhase::Finishing;
            BatchEffect::WriteOutput
        }
    }
}

/// Applies a message to the batch state and returns the effects to run.
pub fn update(mut state: BatchState, msg: BatchMsg) -> (BatchState, Vec<BatchEffect>) {
    let effects = match msg {
        BatchMsg::Start => {
            if state.phase != BatchPhase::Idle {
                return (state, Vec::new());
            }
            state.phase = BatchPhase::Running;
            vec![state.advance()]
        }
        BatchMsg::RecordDone { index } => {
            if state.phase != BatchPhase::Running || index != state.next {
                return (state, Vec::new());
            }
            state.next += 1;
            state.processed_now += 1;
            state.unflushed.push(index);

            let mut effects = Vec::with_capacity(2);
            // Flush on absolute position so a resumed run keeps the same cadence.
            if state.next < state.total && state.next % state.checkpoint_every == 0 {
                effects.push(BatchEffect::AppendCheckpoint {
                    indices: std::mem::take(&mut state.unflushed),
                });
            }
            effects.push(state.advance());
            effects
        }
        BatchMsg::Failed { reason } => {
            if matches!(state.phase, BatchPhase::Running | BatchPhase::Finishing) {
                state.phase = BatchPhase::Aborted;
                state.failure = Some(reason);
            }
            Vec::new()
        }
        BatchMsg::Cancelled => {
            if matches!(state.phase, BatchPhase::Idle | BatchPhase::Running) {
                state.phase = BatchPhase::Aborted;
                state.failure = Some("cancelled".to_string());
            }
            Vec::new()
        }
        BatchMsg::OutputWritten => {
            if state.phase != BatchPhase::Finishing {
                return (state, Vec::new());
            }
            state.phase = BatchPhase::Finished;
            state.unflushed.clear();
            vec![BatchEffect::ClearCheckpoint]
        }
    };

    (state, effects)
}
