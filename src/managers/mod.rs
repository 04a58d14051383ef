pub mod animation;
pub mod connection;
pub mod page;
pub mod widget;

pub use animation::AnimationManager;
pub use connection::{ConnectionManager, ConnectionTiming};
pub use page::PageManager;
pub use widget::WidgetManager;
