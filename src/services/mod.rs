pub mod batch;
pub mod bulk;
pub mod client;
pub mod desired_date;
