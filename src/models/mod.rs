pub mod event;
pub mod operation;
pub mod record;
pub mod search;
pub mod sort;
