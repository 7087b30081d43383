//! Text analysis capability for the caseflow platform.
//!
//! Support workflows use three operations:
//!
//! - **Suggestions**: Draft a reply for an agent to review
//! - **Conversation analysis**: Sentiment, topics, and follow-up actions
//! - **Tags**: Labels for routing and reporting
//!
//! [`TextService`] is the contract; [`KeywordTextService`] is a rule-based
//! implementation that needs no model.

pub mod error;
pub mod keyword;
pub mod text;

pub use error::AiError;
pub use keyword::KeywordTextService;
pub use text::{ConversationAnalysis, Message, Role, Sentiment, TextService};
