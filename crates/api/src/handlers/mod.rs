pub mod dispatch;
pub mod nodes;
pub mod root;
pub mod routing;
