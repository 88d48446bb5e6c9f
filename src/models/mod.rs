pub mod record;
pub mod token;
