//! Completion writer: turns an outcome into the statements that record it.

use crate::job::JobPayload;
use crate::outcome::Outcome;
use crate::sql::{self, StatementBatch};
use crate::transport::FetchResponse;

#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionWriter;

impl CompletionWriter {
    /// `CreateResponse(...)` followed by the success routine, if any.
    pub fn write_success(&self, job: &JobPayload, response: &FetchResponse) -> StatementBatch {
        let mut batch = StatementBatch::new();
        batch.push(sql::create_response(&job.identifier, response));
        if let Some(routine) = &job.on_success {
            batch.push(sql::call_routine(routine, &job.identifier));
        }
        batch
    }

    /// Marks the request failed and calls the failure routine, if any.
    pub fn write_fail(&self, job: &JobPayload, message: &str) -> StatementBatch {
        let mut batch = StatementBatch::new();
        batch.push(sql::mark_failed(&job.identifier, message));
        if let Some(routine) = &job.on_failure {
            batch.push(sql::call_routine(routine, &job.identifier));
        }
        batch
    }

    pub fn write(&self, job: &JobPayload, outcome: &Outcome) -> StatementBatch {
        match outcome {
            Outcome::Success(response) => self.write_success(job, response),
            Outcome::Failure { message } => self.write_fail(job, message),
        }
    }
}
