pub mod http;
pub mod mock;

pub use http::HttpModelClient;
pub use mock::MockModelClient;
