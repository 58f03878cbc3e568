//! Asynchronous job tracking
//!
//! Long-running stages (images, voiceovers, the server-side full pipeline)
//! answer with a job id. [`JobPoller`] polls `GET /jobs/{id}` on a fixed
//! interval until the job is terminal and publishes clamped progress through
//! a `watch` channel.
//!
//! Policy:
//! - the first poll happens one interval after the job starts
//! - a `null` progress keeps the last value; lower values never regress it
//! - completion always reports 100
//! - polling stops with [`Error::JobTimeout`](crate::Error::JobTimeout) after
//!   `max_poll_secs`
//! - up to `max_poll_errors` consecutive failed polls are tolerated, the next
//!   one fails the job with [`Error::RequestFailed`](crate::Error::RequestFailed)

mod poller;

pub use poller::{JobPoller, PollHandle};
