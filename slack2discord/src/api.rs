pub mod attachment;
pub mod discord;
pub mod dry_run;
