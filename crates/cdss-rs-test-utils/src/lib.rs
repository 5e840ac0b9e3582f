//! Test helpers shared across CDSS crates.

pub mod completion;
pub mod identity;
pub mod knowledge;
pub mod pipeline;

pub use completion::{
    ContextEchoCompletion, FailingCompletion, FixedCompletion, HangingCompletion,
    RecordingCompletion,
};
pub use identity::StaticIdentity;
pub use knowledge::{FailingKnowledgeStore, StubKnowledgeStore, product_result, rule_result};
pub use pipeline::{TestPipeline, test_pipeline};
