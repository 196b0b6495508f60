//! Multi-turn slot filling for voxcal scheduling requests.
//!
//! Accumulates partially extracted fields across conversation turns, keeps
//! one context per conversation, and decodes the extraction oracle's payload.

pub mod conversation_store;
pub mod extraction_payload;
pub mod slot_context;

pub use conversation_store::ConversationStore;
pub use extraction_payload::{
    guidance_for_missing, normalize_field, ExtractionPayload, ExtractionPayloadError,
};
pub use slot_context::{
    PartialSlot, ScheduleRequest, ScheduleRequestError, SlotField, SlotFillingContext,
};
