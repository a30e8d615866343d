use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use engine_logging::{engine_error, engine_info, engine_warn};
use harvest_core::{update, BatchEffect, BatchMsg, BatchPhase, BatchState};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointError, CheckpointRecord, CheckpointStore};
use crate::persist::PersistError;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("record {index} ({key}) failed: {reason}")]
    Record {
        index: usize,
        key: String,
        reason: String,
    },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Output(#[from] PersistError),
    #[error("batch cancelled after {processed} records; checkpoint kept for resume")]
    Cancelled { processed: usize },
    #[error(
        "checkpoint {path:?} belongs to another batch (entry {key} matches no record); \
         delete it or use a different checkpoint path"
    )]
    StaleCheckpoint { path: PathBuf, key: String },
}

/// Turns one input record into a checkpointable result.
#[async_trait::async_trait]
pub trait RecordProcessor: Send {
    type Record: Sync;
    type Output: CheckpointRecord + Send;

    /// Stable key matching an input record to its checkpointed output.
    fn key(&self, record: &Self::Record) -> String;

    async fn process(
        &mut self,
        index: usize,
        record: &Self::Record,
    ) -> Result<Self::Output, BatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport<O> {
    /// One output per record, in record order.
    pub outputs: Vec<O>,
    pub resumed: usize,
    pub processed_now: usize,
}

/// Runs `processor` over `records`, appending results to `store` every
/// `checkpoint_every` records.
///
/// Checkpointed outputs are matched back to their records by key, and the
/// run resumes at the first record without one. A checkpoint entry whose key
/// matches no record fails the run with [`BatchError::StaleCheckpoint`]
/// before anything is processed. `write_output` runs once every record is
/// done, and the checkpoint is cleared only after it succeeds. Any failure or
/// cancellation leaves the checkpoint in place.
pub async fn run_checkpointed<P, W>(
    processor: &mut P,
    records: &[P::Record],
    store: &CheckpointStore,
    checkpoint_every: usize,
    cancel: &CancellationToken,
    write_output: W,
) -> Result<BatchReport<P::Output>, BatchError>
where
    P: RecordProcessor,
    W: FnOnce(&[P::Output]) -> Result<(), BatchError>,
{
    let resume = store.load::<P::Output>()?;
    let checkpointed = resume.offset;

    let keys: Vec<String> = records.iter().map(|r| processor.key(r)).collect();
    let mut slots: Vec<Option<P::Output>> = records.iter().map(|_| None).collect();
    if let Some(key) = remerge(&keys, resume.records, &mut slots) {
        engine_error!("checkpoint {:?} entry {} is not part of this batch", store.path(), key);
        return Err(BatchError::StaleCheckpoint {
            path: store.path().to_path_buf(),
            key,
        });
    }

    let resume_offset = slots.iter().position(Option::is_none).unwrap_or(slots.len());
    if resume_offset != checkpointed {
        engine_warn!(
            "checkpoint {:?} holds {} entries but covers records 0..{}; resuming there",
            store.path(),
            checkpointed,
            resume_offset
        );
    }

    let mut state = BatchState::new(records.len(), resume_offset, checkpoint_every);
    let mut queue: VecDeque<BatchEffect> = VecDeque::new();
    let mut write_output = Some(write_output);
    let mut failure: Option<BatchError> = None;
    let mut outputs: Vec<P::Output> = Vec::new();

    let (next, effects) = update(state, BatchMsg::Start);
    state = next;
    queue.extend(effects);

    while let Some(effect) = queue.pop_front() {
        let msg = match effect {
            BatchEffect::Process { index } => {
                if cancel.is_cancelled() {
                    engine_warn!("batch cancelled before record {} ({})", index, keys[index]);
                    BatchMsg::Cancelled
                } else {
                    match processor.process(index, &records[index]).await {
                        Ok(output) => {
                            slots[index] = Some(output);
                            BatchMsg::RecordDone { index }
                        }
                        Err(err) => {
                            engine_error!("record {} ({}) failed: {}", index, keys[index], err);
                            let reason = err.to_string();
                            failure = Some(err);
                            BatchMsg::Failed { reason }
                        }
                    }
                }
            }
            BatchEffect::AppendCheckpoint { indices } => {
                let done: Vec<&P::Output> =
                    indices.iter().filter_map(|&i| slots[i].as_ref()).collect();
                match store.append(&done) {
                    Ok(()) => {
                        engine_info!(
                            "checkpoint saved: {}/{} records",
                            indices.last().map_or(0, |i| i + 1),
                            records.len()
                        );
                        continue;
                    }
                    Err(err) => {
                        engine_error!("checkpoint append failed: {}", err);
                        let reason = err.to_string();
                        failure = Some(err.into());
                        BatchMsg::Failed { reason }
                    }
                }
            }
            BatchEffect::WriteOutput => {
                outputs = slots.drain(..).flatten().collect();
                let result = match write_output.take() {
                    Some(write) => write(&outputs),
                    None => Ok(()),
                };
                match result {
                    Ok(()) => BatchMsg::OutputWritten,
                    Err(err) => {
                        engine_error!("batch output failed: {}", err);
                        let reason = err.to_string();
                        failure = Some(err);
                        BatchMsg::Failed { reason }
                    }
                }
            }
            BatchEffect::ClearCheckpoint => {
                store.clear()?;
                continue;
            }
        };

        let (next, effects) = update(state, msg);
        state = next;
        queue.extend(effects);
    }

    match state.phase() {
        BatchPhase::Finished => Ok(BatchReport {
            outputs,
            resumed: state.resume_offset(),
            processed_now: state.processed_now(),
        }),
        _ => Err(failure.unwrap_or(BatchError::Cancelled {
            processed: state.processed_now(),
        })),
    }
}

/// Places checkpointed outputs back at the index of the record with the same
/// key. The first output for a key wins. Returns the first key that matches
/// no record.
fn remerge<O: CheckpointRecord>(
    keys: &[String],
    resumed: Vec<O>,
    slots: &mut [Option<O>],
) -> Option<String> {
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        index_of.entry(key.as_str()).or_insert(i);
    }

    for record in resumed {
        let found = index_of.get(record.key()).copied();
        match found {
            Some(i) if slots[i].is_none() => slots[i] = Some(record),
            Some(_) => engine_warn!("duplicate checkpoint entry for {}; keeping the first", record.key()),
            None => return Some(record.key().to_string()),
        }
    }
    None
}
