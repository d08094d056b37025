//! Request descriptors, cancel tokens and call results.
//!
//! A [`RequestDescriptor`] describes one API operation and never changes once
//! built. A [`CancelToken`] lets the caller abandon a call and is rearmed
//! automatically when the call fails. Every call ends in a [`CallResult`].

mod cancel;
mod descriptor;
mod payload;

pub use cancel::{CancelState, CancelToken};
pub use descriptor::{
    DescriptorBuilder, HttpMethod, MapError, QueryValue, RequestBody, RequestDescriptor,
    ResponseMapper, ResponseShape,
};
pub use payload::{CallResult, FromPayload, Payload};
