pub mod claude;
pub mod codex;
pub mod openai;
