//! Security telemetry event types for Vigil.
//!
//! Every producer, whether an in-process collector or an external process
//! writing to the ingress socket, ends up speaking the [`Event`] schema
//! defined here. Loosely structured producer input is modelled by
//! [`RawEvent`]; the event bus normalizes it into an [`Event`].

mod event;
mod event_type;
mod id;
mod raw;
mod severity;
mod timestamp;

pub use event::Event;
pub use event_type::{EventType, UNKNOWN_SOURCE};
pub use id::EventId;
pub use raw::RawEvent;
pub use severity::Severity;
pub use timestamp::EventTimestamp;
