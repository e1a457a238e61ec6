//! Edge security policies: viewer protocol and allowed methods.
//!
//! Both run in front of the cache so that a rejected request never reaches the
//! cache or the origin.

mod middleware;

pub use middleware::{
    AllowedMethods, AllowedMethodsMiddleware, ViewerProtocolMiddleware, ViewerProtocolPolicy,
    ViewerScheme,
};
