pub mod client;
pub mod health;
pub mod request_id;
