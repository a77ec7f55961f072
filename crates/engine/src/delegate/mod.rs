//! Delegate task dispatch and response correlation.

mod nats;
mod response;
mod service;
mod task;
mod wait_notify;

pub use nats::{
    subscribe_responses, DelegateResponseEnvelope, DelegateTaskNotification, NatsDelegateService,
    DEFAULT_RESPONSE_SUBJECT, DEFAULT_STREAM, DEFAULT_TASK_SUBJECT,
};
pub use response::{
    CommandExecutionStatus, DelegateMetaInfo, DelegateTaskResponse, ErrorNotifyResponse,
    ResponseData,
};
pub use service::{
    append_delegate_task_details, queue_and_record, DelegateService,
    InMemoryDelegateService, InMemoryStateExecutionService, SelectionLog, StateExecutionService,
};
pub use task::{
    DelegateTask, DelegateTaskBuilder, DelegateTaskDetails, SetupAbstractions,
    DEFAULT_ASYNC_CALL_TIMEOUT,
};
pub use wait_notify::{NotifyOutcome, WaitNotifyEngine};
