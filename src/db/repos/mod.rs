pub mod fix_history;
pub mod learning;
pub mod monitoring;
pub mod predictions;
