//! Scripted receptionist for telephony calls
//!
//! A phase state machine that walks a caller from greeting through
//! identification, reason and urgency, slot selection and confirmation.

mod config;
mod engine;
mod slots;

pub use config::{DialogueConfig, ReasonKeyword, ReplyTemplates};
pub use engine::{Appointment, Dialogue, Phase, Reply, Urgency};
pub use slots::{Slot, SlotProvider, TomorrowSlots};
