// Consultation generation: the job pipeline and its HTTP entry point.
// All model calls go through llm_client; all record writes through content_store.

pub mod handlers;
pub mod pipeline;
