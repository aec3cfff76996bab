pub mod events;
pub mod jobs;
pub mod progress;
pub mod receipts;
pub mod request;
pub mod result;
