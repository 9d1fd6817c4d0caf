pub mod dispatcher;
pub mod pipeline;
pub mod throttle;
