pub mod clock;
pub mod openai;
pub mod poller;
pub mod retry;
pub mod videos;
