// Consultation domain: codes, prompt assembly, result contracts and validation.
// Pure code only. Network calls live in llm_client and content_store.

pub mod codes;
pub mod library;
pub mod models;
pub mod prompts;
pub mod schema;
pub mod validation;
