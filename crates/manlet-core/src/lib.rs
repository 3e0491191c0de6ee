pub mod art;
pub mod autonomous;
pub mod bridge;
pub mod directive;
pub mod facade;
pub mod message;
pub mod reasoning;
pub mod stream;
pub mod tools;

// Re-export key types
pub use autonomous::{AutonomousLoop, LoopSettings, LoopState};
pub use bridge::{ActionBridge, ActionDispatch, ActionOutcome, ActionRequest, NodeRuntime};
pub use directive::DirectiveSource;
pub use facade::ActionFacade;
pub use message::{ConversationMessage, Role};
pub use reasoning::{ReasoningEngine, RigReasoningEngine};
pub use stream::{StreamAccumulator, StreamEvent};
pub use tools::ToolRegistry;
