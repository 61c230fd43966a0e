mod requests;
mod responses;

pub use requests::Command;
pub use responses::{event_frame, Response};
