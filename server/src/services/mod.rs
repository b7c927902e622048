pub mod death_log;
pub mod dispatch;
pub mod levels;
pub mod membership;
pub mod pool;
pub mod source;
pub mod tracker;
pub mod world;
