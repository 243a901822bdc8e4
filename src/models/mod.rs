pub mod record;
pub mod task;
