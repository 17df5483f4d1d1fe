pub mod signature;
mod store;

pub use store::{
    InsertEvent, InsertOutcome, StoreError, bump_failure, bump_received, get_event,
    get_event_by_webhook_id, insert_event, last_event_age_s, link_fanout_job,
    mark_event_completed, mark_event_failed, record_failure_health, record_success_health,
    replay_event,
};
