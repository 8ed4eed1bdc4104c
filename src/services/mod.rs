pub mod budget;
pub mod conversation;
pub mod critic_router;
pub mod curator;
pub mod engine;
pub mod integrity;
pub mod strategy_selector;
pub mod validator;

pub use budget::BudgetTracker;
pub use conversation::ConversationStore;
pub use critic_router::CriticRouter;
pub use curator::ContextCurator;
pub use engine::Engine;
pub use integrity::IntegrityGate;
pub use strategy_selector::StrategySelector;
pub use validator::SchemaValidator;
