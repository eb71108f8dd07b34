pub mod http;
pub mod preview;
pub mod relay;
pub mod shutdown;
