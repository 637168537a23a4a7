mod dimensions;
mod id;
mod request;

pub use dimensions::{DimensionValue, Dimensions};
pub use id::RequestId;
pub use request::{TaskProperties, TaskRequest};
