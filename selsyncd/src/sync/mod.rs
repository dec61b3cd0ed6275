pub mod backoff;
pub mod journal;
pub mod paths;
