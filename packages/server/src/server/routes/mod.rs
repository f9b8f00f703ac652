// HTTP routes
pub mod crawl;
pub mod health;

pub use crawl::*;
pub use health::*;
