pub mod chat;
pub mod health;
pub mod logs;
pub mod mode;

pub use chat::ChatCommand;
pub use health::HealthCommand;
pub use logs::LogsCommand;
pub use mode::ModeCommand;
