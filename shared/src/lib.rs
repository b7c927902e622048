pub mod events;
pub mod player;
pub mod subscription;

pub use events::*;
pub use player::*;
pub use subscription::Subscription;
