pub mod canonical;
pub mod legacy;
pub mod ollama;
pub mod openai_chat;
